//! Compile state: the intermediate list, control-structure stack, address
//! table and variable tables threaded through the whole compile.

use std::rc::Rc;

use muf_config::{MAX_VAR, RES_VAR};
use muf_core::{Dbref, FuncHeader, ObjectDb, Op, Outbound, PublicEntry};

use crate::defines::{DefineTable, MacroTable};
use crate::error::{CompileError, CompileResult};
use crate::token::SourceCursor;

/// Compile-time view into other programs' public tables, for
/// `$ifcancall`. The lifecycle glue provides one; compiles without it
/// treat every `$ifcancall` as false.
pub trait PublicsView {
    /// Whether `player` could `call` the named public of `prog`.
    fn can_call(&self, player: Dbref, prog: Dbref, func: &str) -> bool;
}

/// One intermediate instruction.
///
/// `op` holds address-table slots in its branch payloads until the resolver
/// rewrites them; an address literal (quoted procedure reference) has no
/// final form yet at all and is carried as [`IrOp::AddrLit`].
#[derive(Debug, Clone)]
pub(crate) struct Intermediate {
    pub line: i32,
    pub op: IrOp,
    /// Emitted inside an open TRY region; fences several optimizations.
    pub in_try: bool,
    /// A fold warning has already been issued for this site.
    pub warned: bool,
}

/// Intermediate operation: a final-form op, or a compile-only placeholder.
#[derive(Debug, Clone)]
pub(crate) enum IrOp {
    Op(Op),
    /// Address literal; payload is an address-table slot.
    AddrLit(usize),
}

impl IrOp {
    /// Address-table slot of a branch-carrying operation.
    pub fn branch_slot(&self) -> Option<usize> {
        match self {
            IrOp::Op(op) => op.branch_target(),
            IrOp::AddrLit(_) => None,
        }
    }

    /// Rewrites the address-table slot of a branch-carrying operation.
    pub fn set_branch_slot(&mut self, slot: usize) {
        if let IrOp::Op(op) = self {
            op.set_branch_target(slot);
        }
    }
}

/// Control-structure kinds tracked on the compile-time stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CtrlKind {
    If,
    Else,
    Begin,
    For,
    Try,
    Catch,
}

/// One open control structure.
#[derive(Debug)]
pub(crate) struct Control {
    pub kind: CtrlKind,
    /// The placeholder (or loop-top) intermediate position.
    pub place: usize,
    /// Loop-exit placeholders (`WHILE`, `BREAK`) awaiting resolution.
    pub exits: Vec<usize>,
}

/// An address-table entry: an intermediate position plus a fixed offset
/// applied after final renumbering.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AddrEntry {
    pub pos: usize,
    pub offset: usize,
}

/// A procedure the program has declared.
#[derive(Debug)]
pub(crate) struct ProcEntry {
    pub name: String,
    /// Position of the function-entry intermediate.
    pub pos: usize,
}

/// The function currently being compiled.
#[derive(Debug)]
pub(crate) struct CurrProc {
    /// Position of the function-entry intermediate.
    pub pos: usize,
    pub name: String,
    pub vars: usize,
    pub args: usize,
}

/// Everything a compile carries from first token to packed program.
pub(crate) struct CompileState<'a> {
    pub db: &'a mut dyn ObjectDb,
    pub output: &'a mut dyn Outbound,
    pub macros: &'a MacroTable,
    pub publics_view: Option<&'a dyn PublicsView>,
    pub player: Dbref,
    pub program: Dbref,
    pub force_err_display: bool,

    pub cursor: SourceCursor,
    pub defines: DefineTable,

    pub words: Vec<Intermediate>,
    pub addr_table: Vec<AddrEntry>,
    pub control: Vec<Control>,
    pub procs: Vec<ProcEntry>,
    pub publics: Vec<PublicEntry>,
    pub curr_proc: Option<CurrProc>,

    /// Frame variables; the first [`RES_VAR`] entries are reserved.
    pub variables: Vec<String>,
    /// Program-local variables.
    pub localvars: Vec<String>,
    /// Scoped variables of the function being compiled.
    pub scopedvars: Vec<String>,

    /// Open TRY count, for BREAK/WHILE cleanup emission and region fencing.
    pub nested_trys: usize,

    /// `$entrypoint` selection, checked against `procs` when seen.
    pub entrypoint: Option<String>,
}

impl<'a> CompileState<'a> {
    pub fn new(
        db: &'a mut dyn ObjectDb,
        output: &'a mut dyn Outbound,
        macros: &'a MacroTable,
        publics_view: Option<&'a dyn PublicsView>,
        player: Dbref,
        program: Dbref,
        force_err_display: bool,
        lines: Vec<String>,
    ) -> Self {
        let mut variables = Vec::with_capacity(MAX_VAR);
        for name in ["me", "loc", "trigger", "command"] {
            variables.push(name.to_string());
        }
        debug_assert_eq!(variables.len(), RES_VAR);

        CompileState {
            db,
            output,
            macros,
            publics_view,
            player,
            program,
            force_err_display,
            cursor: SourceCursor::new(lines),
            defines: DefineTable::new(),
            words: Vec::new(),
            addr_table: Vec::new(),
            control: Vec::new(),
            procs: Vec::new(),
            publics: Vec::new(),
            curr_proc: None,
            variables,
            localvars: Vec::new(),
            scopedvars: Vec::new(),
            nested_trys: 0,
            entrypoint: None,
        }
    }

    /// Sends a compile-time message to the compiling player when error
    /// display is on.
    pub fn compile_message(&mut self, message: &str) {
        if self.force_err_display {
            self.output.notify(self.player, message);
        }
    }

    /// Shorthand for a syntax error at the cursor's line.
    pub fn abort<S: Into<String>>(&self, message: S) -> CompileError {
        CompileError::syntax(self.cursor.lineno, message)
    }

    /// Appends an intermediate and returns its position.
    pub fn emit(&mut self, op: IrOp) -> usize {
        let pos = self.words.len();
        self.words.push(Intermediate {
            line: self.cursor.lineno,
            op,
            in_try: self.nested_trys > 0,
            warned: false,
        });
        pos
    }

    /// Shorthand for emitting a final-form op.
    pub fn emit_op(&mut self, op: Op) -> usize {
        self.emit(IrOp::Op(op))
    }

    /// Position the next emitted intermediate will land at.
    pub fn next_pos(&self) -> usize {
        self.words.len()
    }

    /// Interns an `(intermediate position, offset)` pair in the address
    /// table and returns its slot.
    pub fn get_address(&mut self, pos: usize, offset: usize) -> usize {
        for (slot, entry) in self.addr_table.iter().enumerate() {
            if entry.pos == pos && entry.offset == offset {
                return slot;
            }
        }
        self.addr_table.push(AddrEntry { pos, offset });
        self.addr_table.len() - 1
    }

    /// Pushes a control structure.
    pub fn add_control(&mut self, kind: CtrlKind, place: usize) {
        self.control.push(Control {
            kind,
            place,
            exits: Vec::new(),
        });
    }

    /// The innermost open control structure's kind.
    pub fn innermost_control(&self) -> Option<CtrlKind> {
        self.control.last().map(|c| c.kind)
    }

    /// Pops the innermost control structure; the caller has already checked
    /// the kind.
    pub fn pop_control(&mut self) -> CompileResult<Control> {
        self.control
            .pop()
            .ok_or_else(|| self.abort("Control structure mismatch."))
    }

    /// Whether any loop is open.
    pub fn in_loop(&self) -> bool {
        self.control
            .iter()
            .any(|c| matches!(c.kind, CtrlKind::Begin | CtrlKind::For))
    }

    /// TRY blocks open inside the innermost loop; BREAK/WHILE/CONTINUE emit
    /// one TRYPOP per entry before leaving.
    pub fn count_trys_inside_loop(&self) -> usize {
        let mut count = 0;
        for ctrl in self.control.iter().rev() {
            match ctrl.kind {
                CtrlKind::Begin | CtrlKind::For => break,
                CtrlKind::Try => count += 1,
                _ => {}
            }
        }
        count
    }

    /// Registers a loop-exit placeholder on the innermost loop.
    pub fn add_loop_exit(&mut self, pos: usize) -> CompileResult<()> {
        for ctrl in self.control.iter_mut().rev() {
            if matches!(ctrl.kind, CtrlKind::Begin | CtrlKind::For) {
                ctrl.exits.push(pos);
                return Ok(());
            }
        }
        Err(self.abort("Loop start not found."))
    }

    /// The innermost loop's top position (BEGIN top or FORITER), for
    /// CONTINUE.
    pub fn innermost_loop_place(&self) -> Option<usize> {
        self.control
            .iter()
            .rev()
            .find(|c| matches!(c.kind, CtrlKind::Begin | CtrlKind::For))
            .map(|c| c.place)
    }

    /// Patches every registered exit of the innermost loop to the given
    /// address slot.
    pub fn resolve_loop_addrs(&mut self, slot: usize) {
        let exits = match self
            .control
            .iter_mut()
            .rev()
            .find(|c| matches!(c.kind, CtrlKind::Begin | CtrlKind::For))
        {
            Some(ctrl) => std::mem::take(&mut ctrl.exits),
            None => return,
        };
        for pos in exits {
            self.words[pos].op.set_branch_slot(slot);
        }
    }

    /// Declares a frame variable.
    pub fn add_variable(&mut self, name: &str) -> CompileResult<usize> {
        if self.variables.len() >= MAX_VAR {
            return Err(CompileError::TooManyVariables {
                line: self.cursor.lineno,
            });
        }
        self.variables.push(name.to_string());
        Ok(self.variables.len() - 1)
    }

    /// Declares a scoped variable in the current function.
    pub fn add_scopedvar(&mut self, name: &str) -> CompileResult<usize> {
        if self.scopedvars.len() >= MAX_VAR {
            return Err(CompileError::TooManyVariables {
                line: self.cursor.lineno,
            });
        }
        self.scopedvars.push(name.to_string());
        Ok(self.scopedvars.len() - 1)
    }

    /// Declares a program-local variable.
    pub fn add_localvar(&mut self, name: &str) -> CompileResult<usize> {
        if self.localvars.len() >= MAX_VAR {
            return Err(CompileError::TooManyVariables {
                line: self.cursor.lineno,
            });
        }
        self.localvars.push(name.to_string());
        Ok(self.localvars.len() - 1)
    }

    /// Looks up a frame variable.
    pub fn find_variable(&self, name: &str) -> Option<usize> {
        self.variables
            .iter()
            .position(|v| v.eq_ignore_ascii_case(name))
    }

    /// Looks up a scoped variable of the current function.
    pub fn find_scopedvar(&self, name: &str) -> Option<usize> {
        self.scopedvars
            .iter()
            .position(|v| v.eq_ignore_ascii_case(name))
    }

    /// Looks up a program-local variable.
    pub fn find_localvar(&self, name: &str) -> Option<usize> {
        self.localvars
            .iter()
            .position(|v| v.eq_ignore_ascii_case(name))
    }

    /// Looks up a declared procedure.
    pub fn find_proc(&self, name: &str) -> Option<&ProcEntry> {
        self.procs
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Finalizes the current function's header into its function-entry
    /// intermediate.
    pub fn finalize_proc(&mut self) -> CompileResult<()> {
        let Some(curr) = self.curr_proc.take() else {
            return Err(self.abort("Procedure end without body."));
        };
        let header = FuncHeader {
            name: curr.name,
            vars: curr.vars,
            args: curr.args,
            var_names: std::mem::take(&mut self.scopedvars),
        };
        self.words[curr.pos].op = IrOp::Op(Op::Function(Rc::new(header)));
        Ok(())
    }
}
