//! Player I/O primitives. `read` suspends and is handled by the loop.

use muf_core::{Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::InterpCtx;
use crate::primitives::{pop_string, protected, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::Notify, prim_notify);
    table.set(Prim::Tell, prim_tell);
}

fn prim_notify(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let message = pop_string(frame)?;
    let target = frame.data.pop(protected(frame))?;
    let Value::Object(obj) = target else {
        return Err(VmError::type_error("Non-object argument (1)."));
    };
    if !cx.db.valid(obj) {
        return Err(VmError::InvalidObject { obj });
    }
    cx.output.notify(obj, &message);
    Ok(())
}

/// The optimizer's strength-reduced `me @ swap notify`.
fn prim_tell(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let message = pop_string(frame)?;
    let player = frame.player;
    cx.output.notify(player, &message);
    Ok(())
}
