//! The bytecode packer: copies resolved intermediates into the flat
//! instruction array a frame can execute.

use std::collections::HashMap;
use std::rc::Rc;

use muf_core::{AddressCell, Instr, Op, Program};

use crate::error::{CompileError, CompileResult};
use crate::state::{CompileState, IrOp};

/// Packs the compile state into a [`Program`].
///
/// String payloads are interned so identical literals share one handle;
/// address literals become address cells pinning the new program; the array
/// gets one extra terminator cell so a branch just past the last
/// instruction stays in bounds.
pub(crate) fn pack(st: &mut CompileState, generation: u64) -> CompileResult<Program> {
    let mut program = Program::new(st.program);
    program.version = generation;
    let pin = program.pin.clone();

    let mut strings: HashMap<String, Rc<String>> = HashMap::new();
    let mut intern = |s: &Rc<String>| -> Rc<String> {
        strings
            .entry(s.as_ref().clone())
            .or_insert_with(|| s.clone())
            .clone()
    };

    let mut instructions = Vec::with_capacity(st.words.len() + 1);
    for word in &st.words {
        let op = match &word.op {
            IrOp::Op(Op::Str(s)) => Op::Str(intern(s)),
            IrOp::Op(op) => op.clone(),
            IrOp::AddrLit(index) => Op::Addr(Rc::new(AddressCell {
                program: st.program,
                index: *index,
                version: generation,
                pin: pin.clone(),
            })),
        };
        instructions.push(Instr { line: word.line, op });
    }
    instructions.push(Instr {
        line: 0,
        op: Op::Cleared,
    });

    program.instructions = instructions;
    program.publics = std::mem::take(&mut st.publics);

    program.start = match &st.entrypoint {
        Some(name) => {
            let proc = st.find_proc(name).ok_or_else(|| {
                CompileError::syntax(0, "Internal error: lost $entrypoint procedure.")
            })?;
            proc.pos
        }
        None => {
            let proc = st
                .procs
                .first()
                .ok_or_else(|| CompileError::syntax(0, "Missing procedure definition."))?;
            proc.pos
        }
    };

    Ok(program)
}
