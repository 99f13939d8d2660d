//! Event and watch primitives.

use indexmap::IndexMap;

use muf_core::array::{self, ArrayKey};
use muf_core::{MufArray, Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::{ErrorInfo, Frame};
use crate::interp::{effective_uid, InterpCtx};
use crate::primitives::{pop_int, pop_string, protected, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::EventCount, prim_event_count);
    table.set(Prim::EventExists, prim_event_exists);
    table.set(Prim::EventSend, prim_event_send);
    table.set(Prim::WatchPid, prim_watchpid);
    table.set(Prim::TimerStart, prim_timer_start);
    table.set(Prim::TimerStop, prim_timer_stop);
}

fn require_mlev(call: &PrimCall, needed: u8) -> VmResult<()> {
    if call.mlev < needed {
        return Err(VmError::permission(format!(
            "Mucker level {needed} primitive."
        )));
    }
    Ok(())
}

fn prim_event_count(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let count = frame.events.len();
    frame.data.push(Value::Int(count as i32))
}

fn prim_event_exists(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let wanted = pop_string(frame)?;
    let count = frame
        .events
        .iter()
        .filter(|e| e.event.eq_ignore_ascii_case(&wanted))
        .count();
    frame.data.push(Value::Int(count as i32))
}

/// `event_send ( pid name data -- )`: wraps the payload in the standard
/// delivery dictionary and queues it as `USER.<name>` on the target.
fn prim_event_send(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, call: &PrimCall) -> VmResult<()> {
    require_mlev(call, 3)?;
    let data = frame.data.pop(protected(frame))?;
    let name = pop_string(frame)?;
    let pid = pop_int(frame)?;

    let uid = effective_uid(cx.db, frame, call.program);
    let mut entries = IndexMap::new();
    entries.insert(ArrayKey::Str("data".into()), data.deep_copy());
    entries.insert(ArrayKey::Str("caller_pid".into()), Value::Int(frame.pid));
    entries.insert(ArrayKey::Str("descr".into()), Value::Int(frame.descr));
    entries.insert(
        ArrayKey::Str("caller_prog".into()),
        Value::Object(call.program),
    );
    entries.insert(ArrayKey::Str("trigger".into()), Value::Object(frame.trigger));
    entries.insert(ArrayKey::Str("prog_uid".into()), Value::Object(uid));
    entries.insert(ArrayKey::Str("player".into()), Value::Object(frame.player));
    let payload = Value::Array(array::new_dict(entries));

    let event = format!("USER.{}", truncate_name(&name));
    cx.engine.deliver_event(frame, pid, event, payload);
    Ok(())
}

fn truncate_name(name: &str) -> String {
    name.chars().take(32).collect()
}

/// `watchpid ( pid -- )`: links the frames, or delivers the exit event
/// immediately when the target is already gone.
fn prim_watchpid(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, call: &PrimCall) -> VmResult<()> {
    require_mlev(call, 3)?;
    let pid = pop_int(frame)?;
    if pid == frame.pid {
        return Err(VmError::type_error("Narcissistic processes not allowed."));
    }
    if let Some(target) = cx.engine.queue.frame_mut(pid) {
        if !target.watchers.contains(&frame.pid) {
            target.watchers.push(frame.pid);
        }
        if !frame.watchees.contains(&pid) {
            frame.watchees.push(pid);
        }
    } else {
        frame.enqueue_event(format!("PROC.EXIT.{pid}"), Value::Int(pid));
    }
    Ok(())
}

/// `timer_start ( secs name -- )`.
fn prim_timer_start(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let name = pop_string(frame)?;
    let secs = pop_int(frame)?;
    if secs < 0 {
        return Err(VmError::type_error("Timer delay must not be negative."));
    }
    if frame.timer_count >= cx.engine.tunables.process_timer_limit {
        return Err(VmError::resource("Too many timers!"));
    }
    cx.engine.start_timer(frame, secs as u64, &name);
    Ok(())
}

/// `timer_stop ( name -- )`.
fn prim_timer_stop(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let name = pop_string(frame)?;
    cx.engine.stop_timer(frame, &name);
    Ok(())
}

/// Builds the dictionary CATCH_DETAILED delivers.
pub(crate) fn error_dictionary(info: &ErrorInfo) -> MufArray {
    let mut entries = IndexMap::new();
    entries.insert(
        ArrayKey::Str("error".into()),
        Value::string(info.message.clone()),
    );
    entries.insert(
        ArrayKey::Str("instr".into()),
        Value::string(info.instr.clone()),
    );
    entries.insert(ArrayKey::Str("line".into()), Value::Int(info.line));
    entries.insert(
        ArrayKey::Str("program".into()),
        Value::Object(info.program),
    );
    array::new_dict(entries)
}
