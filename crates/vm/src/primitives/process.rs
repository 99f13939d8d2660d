//! Process-control primitives: pids, kill, fork, multitask modes.

use muf_core::{Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::{Frame, Multitask};
use crate::interp::InterpCtx;
use crate::primitives::{pop_int, pop_object, pop_string, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::Pid, prim_pid);
    table.set(Prim::IsPid, prim_ispid);
    table.set(Prim::Kill, prim_kill);
    table.set(Prim::Fork, prim_fork);
    table.set(Prim::Preempt, prim_preempt);
    table.set(Prim::Foreground, prim_foreground);
    table.set(Prim::Background, prim_background);
    table.set(Prim::CanCallP, prim_cancallp);
    table.set(Prim::Abort, prim_abort);
    table.set(Prim::AbortSilent, prim_abort_silent);
}

fn require_mlev(call: &PrimCall, needed: u8) -> VmResult<()> {
    if call.mlev < needed {
        return Err(VmError::permission(format!(
            "Mucker level {needed} primitive."
        )));
    }
    Ok(())
}

fn prim_pid(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let pid = frame.pid;
    frame.data.push(Value::Int(pid))
}

fn prim_ispid(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let pid = pop_int(frame)?;
    let alive = pid == frame.pid || cx.engine.pid_alive(pid);
    frame.data.push(Value::Int(alive as i32))
}

fn prim_kill(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, call: &PrimCall) -> VmResult<()> {
    let pid = pop_int(frame)?;
    if pid == frame.pid {
        frame.die_requested = true;
        return frame.data.push(Value::Int(1));
    }
    let allowed = call.mlev >= 4
        || cx
            .engine
            .queue
            .frame_mut(pid)
            .map(|f| f.player == frame.player)
            .unwrap_or(false);
    if !allowed {
        if cx.engine.pid_alive(pid) {
            return Err(VmError::permission("Permission denied."));
        }
        return frame.data.push(Value::Int(0));
    }

    // this frame may be watching its victim; the termination path cannot
    // reach a running frame, so deliver the exit event here
    if frame.watchees.contains(&pid) {
        frame.watchees.retain(|p| *p != pid);
        if let Some(target) = cx.engine.queue.frame_mut(pid) {
            target.watchers.retain(|p| *p != frame.pid);
        }
        frame.enqueue_event(format!("PROC.EXIT.{pid}"), Value::Int(pid));
    }

    let killed = cx.engine.kill_parked(cx.db, cx.output, pid);
    frame.data.push(Value::Int(killed as i32))
}

fn prim_fork(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, call: &PrimCall) -> VmResult<()> {
    require_mlev(call, 3)?;
    let child_pid = cx.engine.fork_frame(frame)?;
    frame.data.push(Value::Int(child_pid))
}

fn prim_preempt(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame.multitask = Multitask::Preempt;
    Ok(())
}

fn prim_foreground(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    if frame.been_background {
        return Err(VmError::permission(
            "Cannot foreground a BGthread.",
        ));
    }
    frame.multitask = Multitask::Foreground;
    Ok(())
}

fn prim_background(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    frame.multitask = Multitask::Background;
    frame.writeonly = true;
    frame.been_background = true;
    Ok(())
}

fn prim_cancallp(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let func = pop_string(frame)?;
    let target = pop_object(frame)?;
    if !cx.db.valid(target) {
        return Err(VmError::InvalidObject { obj: target });
    }
    let now = cx.engine.now;
    let player = frame.player;
    let compiled = cx
        .engine
        .registry
        .ensure_compiled(cx.db, cx.output, &cx.engine.macros, player, target, now, false)
        .is_ok();
    let can = compiled
        && cx
            .engine
            .registry
            .get(target)
            .and_then(|p| p.find_public(&func))
            .is_some();
    frame.data.push(Value::Int(can as i32))
}

fn prim_abort(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let message = pop_string(frame)?;
    Err(VmError::aborted(message))
}

fn prim_abort_silent(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    // checked at the top of the loop; a surrounding try cannot intercept it
    frame.die_requested = true;
    Ok(())
}
