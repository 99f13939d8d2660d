//! Primitive dispatch.
//!
//! A dense table maps primitive ids to handlers of one fixed signature.
//! Handlers do their own stack checks and raise errors through the normal
//! error path; the loop increments the instruction pointer after a handler
//! returns. Primitives that suspend or transfer control never reach this
//! table - the loop interprets those itself.

pub mod arrays;
pub mod debug;
pub mod events;
pub mod io;
pub mod loops;
pub mod math;
pub mod misc;
pub mod process;
pub mod stack_ops;
pub mod strings;
pub mod vars;

use once_cell::sync::Lazy;

use muf_core::{Dbref, Prim};

use crate::error::{VmError, VmResult};
use crate::frame::Frame;
use crate::interp::InterpCtx;

/// Context handed to every primitive handler.
#[derive(Debug, Clone, Copy)]
pub struct PrimCall {
    /// Program being executed.
    pub program: Dbref,
    /// Effective mucker level of that program.
    pub mlev: u8,
    /// Instruction pointer of the primitive itself.
    pub pc: usize,
}

/// A handler for one primitive.
pub type PrimHandler = fn(&mut InterpCtx<'_, '_>, &mut Frame, &PrimCall) -> VmResult<()>;

/// The dispatch table, indexed by `prim id - 1`.
pub struct PrimTable {
    handlers: Vec<Option<PrimHandler>>,
}

impl PrimTable {
    fn new() -> Self {
        let mut table = PrimTable {
            handlers: vec![None; Prim::count()],
        };
        stack_ops::register(&mut table);
        vars::register(&mut table);
        math::register(&mut table);
        strings::register(&mut table);
        arrays::register(&mut table);
        io::register(&mut table);
        process::register(&mut table);
        events::register(&mut table);
        debug::register(&mut table);
        misc::register(&mut table);
        table
    }

    /// Installs a handler for a primitive.
    pub fn set(&mut self, prim: Prim, handler: PrimHandler) {
        self.handlers[prim.id() as usize - 1] = Some(handler);
    }

    /// Looks up the handler for a primitive.
    pub fn get(&self, prim: Prim) -> Option<PrimHandler> {
        self.handlers[prim.id() as usize - 1]
    }
}

static TABLE: Lazy<PrimTable> = Lazy::new(PrimTable::new);

/// Dispatches one table primitive.
pub fn dispatch(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    call: &PrimCall,
    prim: Prim,
) -> VmResult<()> {
    match TABLE.get(prim) {
        Some(handler) => handler(cx, frame, call),
        None => Err(VmError::internal(format!(
            "Unhandled primitive {}.",
            prim.name()
        ))),
    }
}

/// A handler's shorthand for the frame's protected pop depth.
pub(crate) fn protected(frame: &Frame) -> usize {
    frame.protected_depth()
}

/// Pops an integer argument.
pub(crate) fn pop_int(frame: &mut Frame) -> VmResult<i32> {
    match frame.data.pop(protected(frame))? {
        muf_core::Value::Int(n) => Ok(n),
        other => Err(VmError::type_error(format!(
            "Non-integer argument ({}).",
            other.type_name()
        ))),
    }
}

/// Pops a string argument.
pub(crate) fn pop_string(frame: &mut Frame) -> VmResult<String> {
    match frame.data.pop(protected(frame))? {
        muf_core::Value::Str(s) => Ok(s.as_ref().clone()),
        other => Err(VmError::type_error(format!(
            "Non-string argument ({}).",
            other.type_name()
        ))),
    }
}

/// Pops an object argument.
pub(crate) fn pop_object(frame: &mut Frame) -> VmResult<Dbref> {
    match frame.data.pop(protected(frame))? {
        muf_core::Value::Object(obj) => Ok(obj),
        other => Err(VmError::type_error(format!(
            "Non-dbref argument ({}).",
            other.type_name()
        ))),
    }
}
