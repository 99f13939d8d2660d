//! Arithmetic, comparison and logic primitives.

use muf_core::{Dbref, Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::InterpCtx;
use crate::primitives::{protected, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::Add, prim_add);
    table.set(Prim::Sub, prim_sub);
    table.set(Prim::Mul, prim_mul);
    table.set(Prim::Div, prim_div);
    table.set(Prim::Mod, prim_mod);
    table.set(Prim::Inc, prim_inc);
    table.set(Prim::Dec, prim_dec);
    table.set(Prim::Abs, prim_abs);
    table.set(Prim::Sign, prim_sign);
    table.set(Prim::Eq, prim_eq);
    table.set(Prim::Lt, prim_lt);
    table.set(Prim::Gt, prim_gt);
    table.set(Prim::Le, prim_le);
    table.set(Prim::Ge, prim_ge);
    table.set(Prim::Ne, prim_ne);
    table.set(Prim::Not, prim_not);
    table.set(Prim::And, prim_and);
    table.set(Prim::Or, prim_or);
    table.set(Prim::Xor, prim_xor);
}

/// A numeric operand: int, float or dbref.
enum Num {
    Int(i32),
    Float(f64),
    Object(i32),
}

fn pop_num(frame: &mut Frame) -> VmResult<Num> {
    match frame.data.pop(protected(frame))? {
        Value::Int(n) => Ok(Num::Int(n)),
        Value::Float(f) => Ok(Num::Float(f)),
        Value::Object(Dbref(n)) => Ok(Num::Object(n)),
        other => Err(VmError::type_error(format!(
            "Non-numeric argument ({}).",
            other.type_name()
        ))),
    }
}

fn as_f64(num: &Num) -> f64 {
    match num {
        Num::Int(n) | Num::Object(n) => *n as f64,
        Num::Float(f) => *f,
    }
}

/// Applies an int/float binary operation, promoting to float when either
/// side is one.
fn binary(
    frame: &mut Frame,
    int_op: fn(i32, i32) -> VmResult<i32>,
    float_op: fn(f64, f64) -> f64,
) -> VmResult<()> {
    let b = pop_num(frame)?;
    let a = pop_num(frame)?;
    let result = match (&a, &b) {
        (Num::Float(_), _) | (_, Num::Float(_)) => Value::Float(float_op(as_f64(&a), as_f64(&b))),
        (Num::Object(x), Num::Int(y)) => Value::Object(Dbref(int_op(*x, *y)?)),
        (Num::Int(x), Num::Object(y)) => Value::Object(Dbref(int_op(*x, *y)?)),
        (Num::Object(x), Num::Object(y)) => Value::Object(Dbref(int_op(*x, *y)?)),
        (Num::Int(x), Num::Int(y)) => Value::Int(int_op(*x, *y)?),
    };
    frame.data.push(result)
}

fn prim_add(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    binary(frame, |a, b| Ok(a.wrapping_add(b)), |a, b| a + b)
}

fn prim_sub(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    binary(frame, |a, b| Ok(a.wrapping_sub(b)), |a, b| a - b)
}

fn prim_mul(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    binary(frame, |a, b| Ok(a.wrapping_mul(b)), |a, b| a * b)
}

fn prim_div(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    binary(
        frame,
        |a, b| {
            if b == 0 {
                Err(VmError::DivideByZero)
            } else if a == i32::MIN && b == -1 {
                Err(VmError::IntegerOverflow)
            } else {
                Ok(a / b)
            }
        },
        |a, b| a / b,
    )
}

fn prim_mod(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    binary(
        frame,
        |a, b| {
            if b == 0 {
                Err(VmError::DivideByZero)
            } else if a == i32::MIN && b == -1 {
                Err(VmError::IntegerOverflow)
            } else {
                Ok(a % b)
            }
        },
        |a, b| a % b,
    )
}

fn prim_inc(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    step_by(frame, 1)
}

fn prim_dec(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    step_by(frame, -1)
}

fn step_by(frame: &mut Frame, delta: i32) -> VmResult<()> {
    let value = match frame.data.pop(protected(frame))? {
        Value::Int(n) => Value::Int(n.wrapping_add(delta)),
        Value::Float(f) => Value::Float(f + delta as f64),
        Value::Object(Dbref(n)) => Value::Object(Dbref(n.wrapping_add(delta))),
        other => {
            return Err(VmError::type_error(format!(
                "Non-numeric argument ({}).",
                other.type_name()
            )))
        }
    };
    frame.data.push(value)
}

fn prim_abs(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let value = match frame.data.pop(protected(frame))? {
        Value::Int(n) => Value::Int(n.wrapping_abs()),
        Value::Float(f) => Value::Float(f.abs()),
        other => {
            return Err(VmError::type_error(format!(
                "Non-numeric argument ({}).",
                other.type_name()
            )))
        }
    };
    frame.data.push(value)
}

fn prim_sign(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let sign = match frame.data.pop(protected(frame))? {
        Value::Int(n) => n.signum(),
        Value::Float(f) => {
            if f > 0.0 {
                1
            } else if f < 0.0 {
                -1
            } else {
                0
            }
        }
        other => {
            return Err(VmError::type_error(format!(
                "Non-numeric argument ({}).",
                other.type_name()
            )))
        }
    };
    frame.data.push(Value::Int(sign))
}

fn compare(frame: &mut Frame, test: fn(f64, f64) -> bool) -> VmResult<()> {
    let b = pop_num(frame)?;
    let a = pop_num(frame)?;
    let result = test(as_f64(&a), as_f64(&b));
    frame.data.push(Value::Int(result as i32))
}

fn prim_eq(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    compare(frame, |a, b| a == b)
}

fn prim_lt(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    compare(frame, |a, b| a < b)
}

fn prim_gt(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    compare(frame, |a, b| a > b)
}

fn prim_le(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    compare(frame, |a, b| a <= b)
}

fn prim_ge(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    compare(frame, |a, b| a >= b)
}

fn prim_ne(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    compare(frame, |a, b| a != b)
}

fn prim_not(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let value = frame.data.pop(protected(frame))?;
    frame.data.push(Value::Int(value.is_false() as i32))
}

fn prim_and(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let b = frame.data.pop(protected(frame))?;
    let a = frame.data.pop(protected(frame))?;
    frame
        .data
        .push(Value::Int((a.is_true() && b.is_true()) as i32))
}

fn prim_or(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let b = frame.data.pop(protected(frame))?;
    let a = frame.data.pop(protected(frame))?;
    frame
        .data
        .push(Value::Int((a.is_true() || b.is_true()) as i32))
}

fn prim_xor(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let b = frame.data.pop(protected(frame))?;
    let a = frame.data.pop(protected(frame))?;
    frame
        .data
        .push(Value::Int((a.is_true() != b.is_true()) as i32))
}
