//! Array primitives.

use indexmap::IndexMap;

use muf_core::array::{self, ArrayKey};
use muf_core::{Prim, Value};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::InterpCtx;
use crate::primitives::{pop_int, protected, PrimCall, PrimTable};

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::ArrayMake, prim_array_make);
    table.set(Prim::ArrayMakeDict, prim_array_make_dict);
    table.set(Prim::ArrayCount, prim_array_count);
    table.set(Prim::ArrayGetItem, prim_array_getitem);
    table.set(Prim::ArraySetItem, prim_array_setitem);
    table.set(Prim::ArrayAppendItem, prim_array_appenditem);
}

fn prim_array_make(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let n = pop_int(frame)?;
    if n < 0 {
        return Err(VmError::type_error("Item count must not be negative."));
    }
    let mut items = Vec::with_capacity(n as usize);
    for _ in 0..n {
        items.push(frame.data.pop(protected(frame))?);
    }
    items.reverse();
    frame.data.push(Value::Array(array::new_list(items)))
}

fn prim_array_make_dict(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let n = pop_int(frame)?;
    if n < 0 {
        return Err(VmError::type_error("Item count must not be negative."));
    }
    let mut pairs = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let value = frame.data.pop(protected(frame))?;
        let key = frame.data.pop(protected(frame))?;
        let key = ArrayKey::from_value(&key).map_err(|e| VmError::type_error(e.to_string()))?;
        pairs.push((key, value));
    }
    pairs.reverse();
    let mut entries = IndexMap::new();
    for (key, value) in pairs {
        entries.insert(key, value);
    }
    frame.data.push(Value::Array(array::new_dict(entries)))
}

fn prim_array_count(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let value = frame.data.pop(protected(frame))?;
    let Value::Array(arr) = value else {
        return Err(VmError::type_error("Array argument expected."));
    };
    let count = arr.borrow().len();
    frame.data.push(Value::Int(count as i32))
}

fn prim_array_getitem(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let key = frame.data.pop(protected(frame))?;
    let value = frame.data.pop(protected(frame))?;
    let Value::Array(arr) = value else {
        return Err(VmError::type_error("Array argument expected."));
    };
    let key = ArrayKey::from_value(&key).map_err(|e| VmError::type_error(e.to_string()))?;
    // a missing entry reads as integer zero
    let result = arr.borrow().get(&key).unwrap_or(Value::Int(0));
    frame.data.push(result)
}

fn prim_array_setitem(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let key = frame.data.pop(protected(frame))?;
    let arr_value = frame.data.pop(protected(frame))?;
    let value = frame.data.pop(protected(frame))?;
    let Value::Array(arr) = arr_value else {
        return Err(VmError::type_error("Array argument expected."));
    };
    let key = ArrayKey::from_value(&key).map_err(|e| VmError::type_error(e.to_string()))?;
    arr.borrow_mut()
        .set(key, value)
        .map_err(|e| VmError::bounds(e.to_string()))?;
    frame.data.push(Value::Array(arr))
}

fn prim_array_appenditem(
    _cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    _call: &PrimCall,
) -> VmResult<()> {
    let arr_value = frame.data.pop(protected(frame))?;
    let value = frame.data.pop(protected(frame))?;
    let Value::Array(arr) = arr_value else {
        return Err(VmError::type_error("Array argument expected."));
    };
    arr.borrow_mut()
        .push(value)
        .map_err(|e| VmError::type_error(e.to_string()))?;
    frame.data.push(Value::Array(arr))
}
