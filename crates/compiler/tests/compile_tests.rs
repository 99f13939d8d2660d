//! End-to-end compiler tests: source text in, packed instruction array out.

use muf_compiler::{compile, CompileError, CompileRequest, MacroTable};
use muf_core::{Dbref, MemDb, ObjType, ObjectDb, Op, Prim, Program, PropValue, RecordedOutput};

struct Fixture {
    db: MemDb,
    output: RecordedOutput,
    macros: MacroTable,
    player: Dbref,
    program: Dbref,
}

impl Fixture {
    fn new() -> Self {
        let mut db = MemDb::new();
        let player = db.create_player("Tester");
        let program = db.create_program("test.muf", player);
        Fixture {
            db,
            output: RecordedOutput::default(),
            macros: MacroTable::new(),
            player,
            program,
        }
    }

    fn compile_lines(&mut self, lines: &[&str]) -> Result<Program, CompileError> {
        self.db
            .set_program_source(self.program, lines.iter().map(|s| s.to_string()).collect());
        compile(CompileRequest {
            db: &mut self.db,
            output: &mut self.output,
            macros: &self.macros,
            publics_view: None,
            player: self.player,
            program: self.program,
            force_err_display: true,
            generation: 1,
        })
    }
}

fn ops(program: &Program) -> Vec<&Op> {
    program.instructions.iter().map(|i| &i.op).collect()
}

#[test]
fn addition_folds_to_single_push() {
    let mut fx = Fixture::new();
    let program = fx.compile_lines(&[": main 2 3 + ;"]).unwrap();
    let ops = ops(&program);
    assert!(matches!(ops[0], Op::Function(_)));
    assert!(matches!(ops[1], Op::Int(5)));
    assert!(matches!(ops[2], Op::Ret));
    assert!(matches!(ops[3], Op::Cleared));
    assert_eq!(program.start, 0);
}

#[test]
fn define_expands_to_constant_push() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&["$define GREET \"hello\" $enddef", ": main GREET ;"])
        .unwrap();
    let ops = ops(&program);
    assert!(matches!(&ops[1], Op::Str(s) if s.as_str() == "hello"));
}

#[test]
fn try_catch_structure_compiles() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": main 1 try 0 / catch pop \"ok\" endcatch ;"])
        .unwrap();
    // the TRY must target the CATCH handler primitive
    let try_target = program
        .instructions
        .iter()
        .find_map(|i| match i.op {
            Op::Try(t) => Some(t),
            _ => None,
        })
        .expect("try instruction present");
    assert!(matches!(
        program.instructions[try_target].op,
        Op::Primitive(Prim::Catch)
    ));
}

#[test]
fn foreach_compiles_to_iterator_loop() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": main { \"a\" \"b\" \"c\" }list foreach pop pop repeat ;"])
        .unwrap();
    let ops = ops(&program);
    assert!(ops
        .iter()
        .any(|op| matches!(op, Op::Primitive(Prim::Foreach))));
    assert!(ops
        .iter()
        .any(|op| matches!(op, Op::Primitive(Prim::ForIter))));
    assert!(ops
        .iter()
        .any(|op| matches!(op, Op::Primitive(Prim::ForPop))));
}

#[test]
fn branch_targets_stay_inside_program() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[
            ": helper 1 ;",
            ": main",
            "  5 0 > if \"big\" else \"small\" then pop",
            "  begin 1 not until",
            "  1 10 1 for pop repeat",
            "  helper pop",
            ";",
        ])
        .unwrap();
    let count = program.instructions.len();
    for instr in &program.instructions {
        if let Some(target) = instr.op.branch_target() {
            assert!(target < count, "target {target} outside 0..{count}");
        }
    }
}

#[test]
fn me_swap_notify_becomes_tell() {
    let mut fx = Fixture::new();
    let program = fx.compile_lines(&[": main me @ swap notify ;"]).unwrap();
    let ops = ops(&program);
    assert!(matches!(ops[1], Op::Primitive(Prim::Tell)));
    assert_eq!(program.instructions.len(), 4);
}

#[test]
fn me_string_notify_keeps_the_string() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": main me @ \"hi\" notify ;"])
        .unwrap();
    let ops = ops(&program);
    assert!(matches!(&ops[1], Op::Str(s) if s.as_str() == "hi"));
    assert!(matches!(ops[2], Op::Primitive(Prim::Tell)));
}

#[test]
fn zero_equals_becomes_not() {
    let mut fx = Fixture::new();
    let program = fx.compile_lines(&[": main 0 = ;"]).unwrap();
    assert!(matches!(ops(&program)[1], Op::Primitive(Prim::Not)));
}

#[test]
fn divide_by_zero_fold_is_refused_with_warning() {
    let mut fx = Fixture::new();
    let program = fx.compile_lines(&[": main 1 0 / ;"]).unwrap();
    let ops = ops(&program);
    assert!(matches!(ops[1], Op::Int(1)));
    assert!(matches!(ops[2], Op::Int(0)));
    assert!(matches!(ops[3], Op::Primitive(Prim::Div)));
    let warnings: Vec<_> = fx
        .output
        .notifies
        .iter()
        .filter(|(_, m)| m.contains("Divide by zero"))
        .collect();
    assert_eq!(warnings.len(), 1, "warning must fire exactly once per site");
}

#[test]
fn int_min_overflow_fold_is_refused() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": main -2147483648 -1 / ;"])
        .unwrap();
    assert!(ops(&program)
        .iter()
        .any(|op| matches!(op, Op::Primitive(Prim::Div))));
}

#[test]
fn scoped_var_read_before_store_gets_clearing_fetch() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": main[ a -- ] a @ 1 + a ! ;"])
        .unwrap();
    let ops = ops(&program);
    assert!(matches!(ops[1], Op::SVarAtClear(0)));
    assert!(matches!(ops[4], Op::SVarBang(0)));
}

#[test]
fn var_read_inside_branch_is_not_cleared() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": main[ a -- ] a @ pop a @ if a ! then ;"])
        .unwrap();
    let ops = ops(&program);
    // the second fetch feeds a conditional store; both fetches must stay
    // plain reads (the first is blocked by the re-read, the second by the
    // branch)
    assert!(ops.iter().all(|op| !matches!(op, Op::SVarAtClear(_))));
}

#[test]
fn publics_carry_permission_levels() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[
            ": helper 1 ;",
            ": admin 2 ;",
            "public helper",
            "wizcall admin",
            ": main ;",
        ])
        .unwrap();
    assert_eq!(program.publics.len(), 2);
    let helper = program.find_public("helper").unwrap();
    assert_eq!(helper.mlev, 1);
    assert!(matches!(
        program.instructions[helper.entry].op,
        Op::Function(_)
    ));
    assert_eq!(program.find_public("ADMIN").unwrap().mlev, 4);
}

#[test]
fn entrypoint_overrides_default_start() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": first 1 ;", ": second 2 ;", "$entrypoint second"])
        .unwrap();
    assert!(matches!(
        &program.instructions[program.start].op,
        Op::Function(header) if header.name == "second"
    ));
}

#[test]
fn version_directive_writes_property() {
    let mut fx = Fixture::new();
    fx.compile_lines(&["$version 1.5", ": main ;"]).unwrap();
    assert_eq!(
        fx.db.get_prop(fx.program, "_version"),
        Some(PropValue::Str("1.5".into()))
    );
}

#[test]
fn ifdef_skips_the_dead_branch() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[
            "$define COLOR 1 $enddef",
            ": main",
            "$ifdef COLOR",
            "  1",
            "$else",
            "  2",
            "$endif",
            ";",
        ])
        .unwrap();
    let ops = ops(&program);
    assert!(matches!(ops[1], Op::Int(1)));
    assert!(!ops.iter().any(|op| matches!(op, Op::Int(2))));
}

#[test]
fn ifndef_takes_the_else_branch() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[
            ": main",
            "$ifndef MISSING",
            "  1",
            "$else",
            "  2",
            "$endif",
            ";",
        ])
        .unwrap();
    assert!(matches!(ops(&program)[1], Op::Int(1)));
}

#[test]
fn include_sweeps_defines_from_object() {
    let mut fx = Fixture::new();
    let lib = fx.db.create(ObjType::Program, "lib.muf", fx.player);
    fx.db
        .set_prop(lib, "_defs/shade", PropValue::Str("42".into()));
    fx.db
        .set_prop(Dbref(0), "_reg/lib/colors", PropValue::Ref(lib));
    let program = fx
        .compile_lines(&["$include $lib/colors", ": main shade ;"])
        .unwrap();
    assert!(matches!(ops(&program)[1], Op::Int(42)));
}

#[test]
fn abort_directive_stops_the_compile() {
    let mut fx = Fixture::new();
    let err = fx
        .compile_lines(&["$abort giving up early", ": main ;"])
        .unwrap_err();
    assert!(matches!(err, CompileError::Aborted { .. }));
    assert!(err.to_string().contains("giving up early"));
}

#[test]
fn unknown_pragma_is_an_error() {
    let mut fx = Fixture::new();
    let err = fx
        .compile_lines(&["$pragma frobnicate", ": main ;"])
        .unwrap_err();
    assert!(matches!(err, CompileError::BadPragma { .. }));
}

#[test]
fn unknown_word_reports_line() {
    let mut fx = Fixture::new();
    let err = fx
        .compile_lines(&[": main", "  frobozz", ";"])
        .unwrap_err();
    assert_eq!(err.line(), 2);
    assert!(err.to_string().contains("frobozz"));
}

#[test]
fn unmatched_then_is_an_error() {
    let mut fx = Fixture::new();
    let err = fx.compile_lines(&[": main then ;"]).unwrap_err();
    assert!(err.to_string().contains("THEN without IF"));
}

#[test]
fn missing_semicolon_is_unexpected_eof() {
    let mut fx = Fixture::new();
    let err = fx.compile_lines(&[": main 1 2 +"]).unwrap_err();
    assert!(matches!(err, CompileError::UnexpectedEof { .. }));
}

#[test]
fn quoted_procedure_reference_pins_an_address() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&[": helper 1 ;", ": main 'helper execute ;"])
        .unwrap();
    let cell = program
        .instructions
        .iter()
        .find_map(|i| match &i.op {
            Op::Addr(cell) => Some(cell.clone()),
            _ => None,
        })
        .expect("address literal packed");
    assert_eq!(cell.program, fx.program);
    assert!(matches!(
        program.instructions[cell.index].op,
        Op::Function(_)
    ));
    // the packed address pins the program
    assert!(program.instance_count() >= 1);
}

#[test]
fn macro_expansion_comes_from_the_macro_table() {
    let mut fx = Fixture::new();
    fx.macros.insert("greet", "\"hi\" tell", Dbref(1));
    let program = fx.compile_lines(&[": main .greet ;"]).unwrap();
    let ops = ops(&program);
    assert!(matches!(&ops[1], Op::Str(s) if s.as_str() == "hi"));
    assert!(matches!(ops[2], Op::Primitive(Prim::Tell)));
}

#[test]
fn escaped_token_skips_define_expansion() {
    let mut fx = Fixture::new();
    let program = fx
        .compile_lines(&["$define pop 1 $enddef", ": main \\pop ;"])
        .unwrap();
    assert!(matches!(ops(&program)[1], Op::Primitive(Prim::Pop)));
}

#[test]
fn string_terminator_cell_is_cleared_poison() {
    let mut fx = Fixture::new();
    let program = fx.compile_lines(&[": main ;"]).unwrap();
    assert!(matches!(
        program.instructions.last().unwrap().op,
        Op::Cleared
    ));
}
