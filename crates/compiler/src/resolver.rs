//! Address resolution: rewrites every address-table slot reference to a
//! final instruction index once the intermediate list has stopped moving.

use crate::error::{CompileError, CompileResult};
use crate::state::{CompileState, IrOp};

/// Resolves branch payloads, address literals and publics to final
/// instruction indices.
///
/// A final index may equal the instruction count: control structures that
/// close at the very end of a procedure land on the packer's terminator
/// cell. Anything past that is a compiler fault.
pub(crate) fn resolve(st: &mut CompileState) -> CompileResult<()> {
    let len = st.words.len();
    let resolve_slot = |slot: usize| -> CompileResult<usize> {
        let entry = st
            .addr_table
            .get(slot)
            .copied()
            .ok_or_else(|| CompileError::syntax(0, "Internal error: bad address slot."))?;
        let target = entry.pos + entry.offset;
        if target > len {
            return Err(CompileError::syntax(
                0,
                "Internal error: branch target outside program.",
            ));
        }
        Ok(target)
    };

    let mut resolved: Vec<(usize, usize)> = Vec::new();
    for (pos, word) in st.words.iter().enumerate() {
        let slot = match &word.op {
            IrOp::Op(op) => op.branch_target(),
            IrOp::AddrLit(slot) => Some(*slot),
        };
        if let Some(slot) = slot {
            resolved.push((pos, resolve_slot(slot)?));
        }
    }
    for (pos, target) in resolved {
        match &mut st.words[pos].op {
            IrOp::Op(op) => op.set_branch_target(target),
            IrOp::AddrLit(slot) => *slot = target,
        }
    }

    for public in &mut st.publics {
        let entry = st.addr_table[public.entry];
        let target = entry.pos + entry.offset;
        if target >= len {
            return Err(CompileError::syntax(
                0,
                "Internal error: public entry outside program.",
            ));
        }
        public.entry = target;
    }

    Ok(())
}
