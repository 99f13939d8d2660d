//! # MUF Compiler
//!
//! Single-pass, Forth-style compiler for the MUF language: raw tokenizer
//! with three comment disciplines, `$define`/macro preprocessor, `$`
//! directive processor with conditional compilation, intermediate builder
//! with forward-reference patching for nested control structures, peephole
//! optimizer, address resolver and bytecode packer.
//!
//! The entry point is [`compile`]: it reads the program's source through the
//! database accessors, runs the whole pipeline, and hands back a packed
//! [`muf_core::Program`] ready for the interpreter.

mod builder;
pub mod defines;
mod directives;
pub mod error;
mod optimizer;
mod packer;
mod resolver;
mod state;
pub mod token;

use muf_core::{Dbref, ObjectDb, Outbound, Program};

pub use defines::{DefineTable, Macro, MacroTable};
pub use error::{CompileError, CompileResult};
pub use state::PublicsView;
pub use token::CommentMode;

use state::CompileState;

/// Everything one compile needs from its surroundings.
pub struct CompileRequest<'a> {
    /// Object database the source, properties and ownership come from.
    pub db: &'a mut dyn ObjectDb,
    /// Where `$echo` and compile warnings go.
    pub output: &'a mut dyn Outbound,
    /// The server-wide macro table.
    pub macros: &'a MacroTable,
    /// Cross-program public visibility for `$ifcancall`; `None` makes every
    /// such check false.
    pub publics_view: Option<&'a dyn PublicsView>,
    /// Who is compiling.
    pub player: Dbref,
    /// The program being compiled.
    pub program: Dbref,
    /// Whether warnings and `$echo` reach the player.
    pub force_err_display: bool,
    /// Instruction-array generation stamped into minted address cells.
    pub generation: u64,
}

/// Compiles a program from its stored source text.
pub fn compile(req: CompileRequest<'_>) -> CompileResult<Program> {
    let Some(lines) = req.db.program_source(req.program) else {
        return Err(CompileError::syntax(0, "Missing program text."));
    };
    if lines.iter().all(|l| l.trim().is_empty()) {
        return Err(CompileError::syntax(0, "Missing program text."));
    }

    let mut st = CompileState::new(
        req.db,
        req.output,
        req.macros,
        req.publics_view,
        req.player,
        req.program,
        req.force_err_display,
        lines,
    );

    directives::seed_defines(&mut st);
    builder::build(&mut st)?;
    optimizer::optimize(&mut st);
    resolver::resolve(&mut st)?;
    let program = packer::pack(&mut st, req.generation)?;

    log::info!(
        "compiled program {}: {} instruction(s), {} public(s)",
        program.dbref,
        program.instructions.len(),
        program.publics.len()
    );
    Ok(program)
}
