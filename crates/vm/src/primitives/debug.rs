//! Debugger primitives.

use muf_core::{Prim, Value};

use crate::debugger::Breakpoint;
use crate::error::VmResult;
use crate::frame::Frame;
use crate::interp::InterpCtx;
use crate::primitives::{PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::DebugOn, prim_debug_on);
    table.set(Prim::DebugOff, prim_debug_off);
    table.set(Prim::DebugLine, prim_debug_line);
    table.set(Prim::DebuggerBreak, prim_debugger_break);
}

fn prim_debug_on(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.debug_trace = true;
    Ok(())
}

fn prim_debug_off(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    frame.debug_trace = false;
    Ok(())
}

/// Emits one trace line for the current position without turning tracing
/// on.
fn prim_debug_line(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, call: &PrimCall) -> VmResult<()> {
    let line = cx
        .engine
        .registry
        .instr(call.program, call.pc)
        .map(|i| i.line)
        .unwrap_or(0);
    let player = frame.player;
    let stack: Vec<String> = frame
        .data
        .as_slice()
        .iter()
        .map(Value::display_for_stack)
        .collect();
    cx.output.notify(
        player,
        &format!("line {}: [{}]", line, stack.join(", ")),
    );
    Ok(())
}

/// Arms the debugger and breaks on the next instruction of this program.
fn prim_debugger_break(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    call: &PrimCall,
) -> VmResult<()> {
    frame.brkpt.debugging = true;
    frame.brkpt.add(
        Breakpoint {
            program: call.program,
            line: None,
            pc: None,
            temp: true,
        },
        cx.engine.tunables.max_breakpoints,
    )
}
