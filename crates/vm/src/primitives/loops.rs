//! The internal loop primitives FOR/FOREACH/FORITER, emitted only by
//! control-structure compilation.
//!
//! A loop runs as `FOR`/`FOREACH` (opens the record), then per iteration
//! `FORITER` followed by a conditional branch: FORITER pushes the iteration
//! value(s) plus a continue flag, or just a false flag when the loop is
//! done. The branch's false exit lands on `FORPOP`, which the interpreter
//! loop handles directly.

use muf_core::{Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::{ForRecord, Frame};
use crate::interp::InterpCtx;
use crate::primitives::protected;

/// FOR pops `start end step`; FOREACH pops an array.
pub(crate) fn open_for(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    prim: Prim,
) -> VmResult<()> {
    let record = if prim == Prim::For {
        let step = pop_for_int(frame)?;
        let end = pop_for_int(frame)?;
        let start = pop_for_int(frame)?;
        ForRecord::Counter {
            current: start,
            end,
            step,
            didfirst: false,
        }
    } else {
        let value = frame.data.pop(protected(frame))?;
        let Value::Array(array) = value else {
            return Err(VmError::type_error("Array argument expected in FOREACH."));
        };
        ForRecord::Iter { array, pos: 0 }
    };
    frame.for_stack.push(record);
    Ok(())
}

fn pop_for_int(frame: &mut Frame) -> VmResult<i32> {
    match frame.data.pop(protected(frame))? {
        Value::Int(n) => Ok(n),
        other => Err(VmError::type_error(format!(
            "Non-integer argument in FOR ({}).",
            other.type_name()
        ))),
    }
}

/// Advances the innermost loop; pushes value(s) and a continue flag.
pub(crate) fn iterate_for(frame: &mut Frame) -> VmResult<()> {
    let record = frame
        .for_stack
        .last_mut()
        .ok_or_else(|| VmError::internal("FORITER with no FOR loop."))?;

    match record {
        ForRecord::Counter {
            current,
            end,
            step,
            didfirst,
        } => {
            if *didfirst {
                *current = current.wrapping_add(*step);
            } else {
                *didfirst = true;
            }
            let alive = if *step >= 0 {
                *current <= *end
            } else {
                *current >= *end
            };
            if alive {
                let value = *current;
                frame.data.push(Value::Int(value))?;
                frame.data.push(Value::Int(1))?;
            } else {
                frame.data.push(Value::Int(0))?;
            }
        }
        ForRecord::Iter { array, pos } => {
            let entry = {
                let data = array.borrow();
                data.entries().get(*pos).cloned()
            };
            match entry {
                Some((key, value)) => {
                    *pos += 1;
                    frame.data.push(key.to_value())?;
                    frame.data.push(value)?;
                    frame.data.push(Value::Int(1))?;
                }
                None => {
                    frame.data.push(Value::Int(0))?;
                }
            }
        }
    }
    Ok(())
}
