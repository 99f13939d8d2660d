//! Variable fetch/store primitives.
//!
//! These are the generic `@` and `!` forms that take a variable reference
//! off the stack; the optimizer rewrites the common push-then-fetch shapes
//! into the fused single instructions, which the loop executes directly.

use muf_core::{Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::{local_get, local_set, InterpCtx};
use crate::primitives::{pop_int, protected, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::At, prim_at);
    table.set(Prim::Bang, prim_bang);
    table.set(Prim::Variable, prim_variable);
    table.set(Prim::LocalVar, prim_localvar);
}

fn prim_at(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, call: &PrimCall) -> VmResult<()> {
    let reference = frame.data.pop(protected(frame))?;
    let value = match reference {
        Value::Var(n) => frame.var_get(n)?,
        Value::SVar(n) => frame.scoped_get(n)?,
        Value::LVar(n) => local_get(frame, call.program, n)?,
        other => {
            return Err(VmError::type_error(format!(
                "Non-variable argument ({}).",
                other.type_name()
            )))
        }
    };
    frame.data.push(value)
}

fn prim_bang(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, call: &PrimCall) -> VmResult<()> {
    let reference = frame.data.pop(protected(frame))?;
    let value = frame.data.pop(protected(frame))?;
    match reference {
        Value::Var(n) => frame.var_set(n, value),
        Value::SVar(n) => frame.scoped_set(n, value),
        Value::LVar(n) => local_set(frame, call.program, n, value),
        other => Err(VmError::type_error(format!(
            "Non-variable argument ({}).",
            other.type_name()
        ))),
    }
}

fn prim_variable(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let n = pop_int(frame)?;
    if n < 0 || n as usize >= muf_config::MAX_VAR {
        return Err(VmError::bounds("Variable number out of range."));
    }
    frame.data.push(Value::Var(n as usize))
}

fn prim_localvar(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let n = pop_int(frame)?;
    if n < 0 || n as usize >= muf_config::MAX_VAR {
        return Err(VmError::bounds("Local variable number out of range."));
    }
    frame.data.push(Value::LVar(n as usize))
}
