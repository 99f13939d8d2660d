//! String primitives.

use muf_core::{Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::InterpCtx;
use crate::primitives::{pop_string, protected, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::StrCmp, prim_strcmp);
    table.set(Prim::StringCmp, prim_stringcmp);
    table.set(Prim::StrCat, prim_strcat);
    table.set(Prim::StrLen, prim_strlen);
    table.set(Prim::IntoStr, prim_intostr);
    table.set(Prim::Atoi, prim_atoi);
}

/// C-style ordering number: negative, zero or positive.
fn cmp_value(a: &str, b: &str) -> i32 {
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

fn prim_strcmp(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let b = pop_string(frame)?;
    let a = pop_string(frame)?;
    frame.data.push(Value::Int(cmp_value(&a, &b)))
}

fn prim_stringcmp(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let b = pop_string(frame)?.to_lowercase();
    let a = pop_string(frame)?.to_lowercase();
    frame.data.push(Value::Int(cmp_value(&a, &b)))
}

fn prim_strcat(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let b = pop_string(frame)?;
    let a = pop_string(frame)?;
    frame.data.push(Value::string(format!("{a}{b}")))
}

fn prim_strlen(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let s = pop_string(frame)?;
    frame.data.push(Value::Int(s.chars().count() as i32))
}

fn prim_intostr(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let text = match frame.data.pop(protected(frame))? {
        Value::Int(n) => n.to_string(),
        Value::Float(f) => format!("{f}"),
        Value::Object(obj) => obj.0.to_string(),
        Value::Str(s) => s.as_ref().clone(),
        other => {
            return Err(VmError::type_error(format!(
                "Invalid argument type ({}).",
                other.type_name()
            )))
        }
    };
    frame.data.push(Value::string(text))
}

fn prim_atoi(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let s = pop_string(frame)?;
    let n = s.trim().parse::<i32>().unwrap_or(0);
    frame.data.push(Value::Int(n))
}
