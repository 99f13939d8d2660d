//! Stack manipulation primitives.

use muf_core::{Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::InterpCtx;
use crate::primitives::{pop_int, protected, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::Pop, prim_pop);
    table.set(Prim::PopN, prim_popn);
    table.set(Prim::Dup, prim_dup);
    table.set(Prim::Over, prim_over);
    table.set(Prim::Pick, prim_pick);
    table.set(Prim::Put, prim_put);
    table.set(Prim::Swap, prim_swap);
    table.set(Prim::Rot, prim_rot);
    table.set(Prim::RRot, prim_rrot);
    table.set(Prim::Rotate, prim_rotate);
    table.set(Prim::Nip, prim_nip);
    table.set(Prim::Tuck, prim_tuck);
    table.set(Prim::Depth, prim_depth);
    table.set(Prim::FullDepth, prim_fulldepth);
    table.set(Prim::MarkStart, prim_mark);
    table.set(Prim::MarkCount, prim_mark_count);
}

fn prim_pop(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.data.pop(protected(frame))?;
    Ok(())
}

fn prim_popn(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let n = pop_int(frame)?;
    if n < 0 {
        return Err(VmError::type_error("Operand not a positive integer."));
    }
    for _ in 0..n {
        frame.data.pop(protected(frame))?;
    }
    Ok(())
}

fn prim_dup(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let top = frame.data.peek(0)?.clone();
    frame.data.push(top)
}

fn prim_over(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let second = frame.data.peek(1)?.clone();
    frame.data.push(second)
}

fn prim_pick(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let n = pop_int(frame)?;
    if n < 1 {
        return Err(VmError::type_error("Operand not a positive integer."));
    }
    let value = frame.data.peek(n as usize - 1)?.clone();
    frame.data.push(value)
}

fn prim_put(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let n = pop_int(frame)?;
    if n < 1 {
        return Err(VmError::type_error("Operand not a positive integer."));
    }
    let value = frame.data.pop(protected(frame))?;
    let slot = frame.data.peek_mut(n as usize - 1)?;
    *slot = value;
    Ok(())
}

fn prim_swap(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.data.require(2, protected(frame))?;
    frame.data.swap(0, 1)
}

fn prim_rot(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.data.require(3, protected(frame))?;
    let third = frame.data.remove(2)?;
    frame.data.push(third)
}

fn prim_rrot(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.data.require(3, protected(frame))?;
    let top = frame.data.pop(protected(frame))?;
    frame.data.insert(2, top)
}

fn prim_rotate(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let n = pop_int(frame)?;
    match n {
        -1..=1 => Ok(()),
        n if n > 1 => {
            frame.data.require(n as usize, protected(frame))?;
            let item = frame.data.remove(n as usize - 1)?;
            frame.data.push(item)
        }
        n => {
            let count = (-n) as usize;
            frame.data.require(count, protected(frame))?;
            let top = frame.data.pop(protected(frame))?;
            frame.data.insert(count - 1, top)
        }
    }
}

fn prim_nip(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.data.require(2, protected(frame))?;
    frame.data.remove(1)?;
    Ok(())
}

fn prim_tuck(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.data.require(2, protected(frame))?;
    let top = frame.data.peek(0)?.clone();
    frame.data.insert(2, top)
}

fn prim_depth(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let depth = frame.data.depth() - protected(frame);
    frame.data.push(Value::Int(depth as i32))
}

fn prim_fulldepth(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let depth = frame.data.depth();
    frame.data.push(Value::Int(depth as i32))
}

fn prim_mark(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.data.push(Value::Mark)
}

fn prim_mark_count(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let Some(depth) = frame.data.find_mark() else {
        return Err(VmError::bounds("No matching mark found on the stack."));
    };
    frame.data.remove(depth)?;
    frame.data.push(Value::Int(depth as i32))
}
