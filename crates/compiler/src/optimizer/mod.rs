//! The peephole optimizer.
//!
//! Runs local rewrites over the intermediate list until a pass removes
//! nothing (capped at five passes). Every rewrite window is guarded: no
//! instruction after the window's first may be a branch target, and a window
//! never straddles a TRY-region boundary. A separate flow pass rewrites
//! dead-after-read variable fetches to their clearing forms.

mod flow;
mod patterns;

use muf_core::Op;

use crate::state::{CompileState, IrOp};

/// Maximum optimizer passes over the intermediate list.
const MAX_PASSES: usize = 5;

/// Optimizes the intermediate list in place; returns the total number of
/// instructions removed.
pub(crate) fn optimize(st: &mut CompileState) -> usize {
    let mut total = 0;
    for _ in 0..MAX_PASSES {
        let removed = run_pass(st);
        total += removed;
        if removed == 0 {
            break;
        }
    }
    log::debug!(
        "optimizer: program {} shrank by {} instruction(s)",
        st.program,
        total
    );
    total
}

fn run_pass(st: &mut CompileState) -> usize {
    let mut referenced = mark_referenced(st);
    let mut removed = 0;
    let mut i = 0;
    while i < st.words.len() {
        if patterns::try_rewrite(st, i, &mut referenced, &mut removed) {
            // a rewrite may expose another match at the same position
            continue;
        }
        flow::maybe_clear_var_read(st, i);
        i += 1;
    }
    removed
}

/// Marks every intermediate that something branches to, plus function
/// entries reachable through the procedure table and publics.
fn mark_referenced(st: &CompileState) -> Vec<bool> {
    let len = st.words.len();
    let mut flags = vec![false; len];
    let mut mark = |pos: usize| {
        if pos < len {
            flags[pos] = true;
        }
    };

    for word in &st.words {
        let slot = match &word.op {
            IrOp::Op(op) => op.branch_target(),
            IrOp::AddrLit(slot) => Some(*slot),
        };
        if let Some(slot) = slot {
            let entry = st.addr_table[slot];
            mark(entry.pos + entry.offset);
        }
    }
    for public in &st.publics {
        let entry = st.addr_table[public.entry];
        mark(entry.pos + entry.offset);
    }
    for proc in &st.procs {
        mark(proc.pos);
    }
    flags
}

/// Removes the intermediate at `pos`, sliding the address table and the
/// reference flags so every entry keeps pointing at the same logical
/// target.
pub(crate) fn remove_intermediate(st: &mut CompileState, referenced: &mut Vec<bool>, pos: usize) {
    st.words.remove(pos);
    referenced.remove(pos);
    for entry in st.addr_table.iter_mut() {
        if entry.pos > pos {
            entry.pos -= 1;
        }
    }
    for proc in st.procs.iter_mut() {
        if proc.pos > pos {
            proc.pos -= 1;
        }
    }
}

/// Whether the window starting at `start` spans `len` intermediates none of
/// which (past the first) is a branch target, without crossing a TRY-region
/// boundary or a function entry.
pub(crate) fn window_clear(
    st: &CompileState,
    referenced: &[bool],
    start: usize,
    len: usize,
) -> bool {
    if start + len > st.words.len() {
        return false;
    }
    let in_try = st.words[start].in_try;
    for offset in 1..len {
        let pos = start + offset;
        if referenced[pos] || st.words[pos].in_try != in_try {
            return false;
        }
        if let IrOp::Op(Op::Function(_)) = st.words[pos].op {
            return false;
        }
    }
    true
}
