//! Miscellaneous primitives, plus the crash-metadata property writer.

use rand::Rng;

use muf_core::{Dbref, ObjectDb, Prim, PropValue, Value};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::InterpCtx;
use crate::primitives::{PrimCall, PrimTable};

/// Property directory runtime error metadata is kept under.
const ERRORS_PROPDIR: &str = "_sys/errors";

pub(crate) fn register(table: &mut PrimTable) {
    table.set(Prim::Random, prim_random);
    table.set(Prim::SysTime, prim_systime);
    table.set(Prim::Version, prim_version);
}

fn prim_random(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let value = frame.rng.gen_range(0..i32::MAX);
    frame.data.push(Value::Int(value))
}

fn prim_systime(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    let now = cx.engine.now;
    frame.data.push(Value::Int(now as i32))
}

fn prim_version(_cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, _call: &PrimCall) -> VmResult<()> {
    frame
        .data
        .push(Value::string(env!("CARGO_PKG_VERSION")))
}

/// Bumps the program's crash counters after an uncaught error.
pub(crate) fn record_crash(db: &mut dyn ObjectDb, program: Dbref, err: &VmError, now: u64) {
    let count_prop = format!("{ERRORS_PROPDIR}/count");
    let count = match db.get_prop(program, &count_prop) {
        Some(PropValue::Int(n)) => n + 1,
        _ => 1,
    };
    db.set_prop(program, &count_prop, PropValue::Int(count));
    db.set_prop(
        program,
        &format!("{ERRORS_PROPDIR}/last"),
        PropValue::Str(err.to_string()),
    );
    db.set_prop(
        program,
        &format!("{ERRORS_PROPDIR}/lastcrashtime"),
        PropValue::Int(now as i32),
    );
}
