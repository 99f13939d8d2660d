//! The per-process frame: stacks, variables, scheduling metadata and event
//! queues.

use std::rc::Rc;

use muf_config::{MAX_VAR, RES_VAR, STACK_SIZE};
use muf_core::{Dbref, FuncHeader, MufArray, ProgramPin, Value, NOTHING};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::debugger::BreakpointState;
use crate::error::{VmError, VmResult};
use crate::stack::DataStack;

/// Process id.
pub type Pid = i32;

/// Multitasking disciplines a frame may run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multitask {
    /// Runs to completion without yielding.
    Preempt,
    /// Yields every instruction slice; may read input.
    Foreground,
    /// Yields every instruction slice; write-only.
    Background,
}

/// Effective-uid disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidMode {
    /// Permissions follow the calling player.
    RegUid,
    /// Permissions follow the program owner.
    SetUid,
    /// Like SetUid, and not overridable by wrapper programs.
    HardUid,
}

/// One system-stack record: where to resume when the current call returns.
#[derive(Debug, Clone)]
pub struct SysReturn {
    /// Program to return into.
    pub program: Dbref,
    /// Instruction index to resume at.
    pub pc: usize,
}

/// One entry of the caller chain: a program on the active call path,
/// pinned while the frame references it.
#[derive(Debug, Clone)]
pub struct CallerEntry {
    pub program: Dbref,
    pub pin: ProgramPin,
}

/// One scoped-variable record; the top of the stack belongs to the
/// currently executing function.
#[derive(Debug, Clone)]
pub struct ScopedFrame {
    /// Function metadata, for slot count and debugger names.
    pub header: Rc<FuncHeader>,
    /// Slot values, `Int(0)`-initialized.
    pub values: Vec<Value>,
}

impl ScopedFrame {
    /// Creates a record sized by the function's declared variable count.
    pub fn for_function(header: Rc<FuncHeader>) -> Self {
        let values = vec![Value::Int(0); header.vars.max(header.args)];
        ScopedFrame { header, values }
    }
}

/// Per-program local variables, kept on an MRU list.
#[derive(Debug, Clone)]
pub struct LocalVars {
    pub program: Dbref,
    pub values: Vec<Value>,
}

/// One `for`/`foreach` loop record.
#[derive(Debug, Clone)]
pub enum ForRecord {
    /// Counted loop.
    Counter {
        current: i32,
        end: i32,
        step: i32,
        didfirst: bool,
    },
    /// Array iteration by position.
    Iter { array: MufArray, pos: usize },
}

/// One armed `try` region.
#[derive(Debug, Clone)]
pub struct TryRecord {
    /// Data-stack depth the region defends; pops may not reach below it
    /// and CATCH unwinds to it.
    pub depth: usize,
    /// System-stack height at `try`; the error path unwinds calls back to
    /// it.
    pub call_level: usize,
    /// `for` records open at `try`; CATCH pops any opened since.
    pub for_count: usize,
    /// Handler instruction index (the CATCH primitive).
    pub pc: usize,
}

/// Details of the most recently raised error, consumed by CATCH.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub message: String,
    pub instr: String,
    pub line: i32,
    pub program: Dbref,
}

impl Default for ErrorInfo {
    fn default() -> Self {
        ErrorInfo {
            message: String::new(),
            instr: String::new(),
            line: 0,
            program: NOTHING,
        }
    }
}

/// A queued event waiting for the frame to consume it.
#[derive(Debug, Clone)]
pub struct EventEntry {
    /// Event id, e.g. `USER.page` or `PROC.EXIT.42`.
    pub event: String,
    /// Payload, deep-copied into this frame on delivery.
    pub data: Value,
}

/// The interpreter's complete per-process state.
#[derive(Debug)]
pub struct Frame {
    pub pid: Pid,
    pub descr: i32,
    pub player: Dbref,
    pub trigger: Dbref,

    pub data: DataStack,
    pub system: Vec<SysReturn>,
    pub callers: Vec<CallerEntry>,
    pub scoped: Vec<ScopedFrame>,
    pub locals: Vec<LocalVars>,
    pub for_stack: Vec<ForRecord>,
    pub try_stack: Vec<TryRecord>,

    /// Frame variables (ME, LOC, TRIGGER, COMMAND plus user `var`s).
    pub variables: Vec<Value>,

    /// Next instruction to execute.
    pub pc: usize,

    pub multitask: Multitask,
    pub uid_mode: UidMode,
    /// Write-only frames may not `read`.
    pub writeonly: bool,
    /// Set once the frame has ever run in the background; fork copies it
    /// as-is even though the child always starts background.
    pub been_background: bool,

    /// Set by `jmp` into a function entry so the entry does not push a
    /// fresh scoped record.
    pub skip_declare: bool,
    /// Set by `abort_silent`; checked at the top of the loop, not
    /// interceptable by try.
    pub die_requested: bool,

    /// Instructions executed over the frame's lifetime.
    pub instr_count: u64,
    /// Event queue, FIFO.
    pub events: Vec<EventEntry>,
    /// Event ids this frame is blocked waiting for (empty = not waiting).
    pub waiting_for: Vec<String>,
    /// Pids watching this frame.
    pub watchers: Vec<Pid>,
    /// Pids this frame watches.
    pub watchees: Vec<Pid>,
    /// Live timers started by this frame.
    pub timer_count: usize,

    pub brkpt: BreakpointState,
    /// Instruction-trace flag (`debug_on` or the program's debug flag).
    pub debug_trace: bool,

    pub error_info: Option<ErrorInfo>,

    /// Accumulated run time, microseconds.
    pub profile_usecs: u64,

    pub rng: StdRng,
}

impl Frame {
    /// Creates a frame ready to start `program` at its start address. The
    /// LOC variable starts out `#-1`; the engine fills it in from the
    /// database when it queues the frame.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: Pid,
        descr: i32,
        player: Dbref,
        trigger: Dbref,
        program: Dbref,
        pin: ProgramPin,
        start: usize,
        multitask: Multitask,
    ) -> Self {
        let mut variables = vec![Value::Int(0); RES_VAR];
        variables[0] = Value::Object(player);
        variables[1] = Value::Object(NOTHING);
        variables[2] = Value::Object(trigger);
        variables[3] = Value::empty_string();
        variables.resize(MAX_VAR, Value::Int(0));

        Frame {
            pid,
            descr,
            player,
            trigger,
            data: DataStack::new(STACK_SIZE),
            system: Vec::new(),
            callers: vec![CallerEntry { program, pin }],
            scoped: Vec::new(),
            locals: Vec::new(),
            for_stack: Vec::new(),
            try_stack: Vec::new(),
            variables,
            pc: start,
            multitask,
            uid_mode: UidMode::RegUid,
            writeonly: false,
            been_background: multitask == Multitask::Background,
            skip_declare: false,
            die_requested: false,
            instr_count: 0,
            events: Vec::new(),
            waiting_for: Vec::new(),
            watchers: Vec::new(),
            watchees: Vec::new(),
            timer_count: 0,
            brkpt: BreakpointState::default(),
            debug_trace: false,
            error_info: None,
            profile_usecs: 0,
            rng: StdRng::seed_from_u64(pid as u64),
        }
    }

    /// The program currently executing.
    pub fn current_program(&self) -> Dbref {
        self.callers
            .last()
            .map(|c| c.program)
            .unwrap_or(NOTHING)
    }

    /// The armed try's protected data depth, or zero.
    pub fn protected_depth(&self) -> usize {
        self.try_stack.last().map(|t| t.depth).unwrap_or(0)
    }

    /// The current function's scoped record.
    pub fn scoped_top(&mut self) -> VmResult<&mut ScopedFrame> {
        self.scoped
            .last_mut()
            .ok_or_else(|| VmError::bounds("Scoped variable used outside a function.".to_string()))
    }

    /// Reads a scoped variable of the current function.
    pub fn scoped_get(&mut self, index: usize) -> VmResult<Value> {
        let record = self.scoped_top()?;
        record
            .values
            .get(index)
            .cloned()
            .ok_or_else(|| VmError::bounds("Scoped variable number out of range."))
    }

    /// Writes a scoped variable of the current function.
    pub fn scoped_set(&mut self, index: usize, value: Value) -> VmResult<()> {
        let record = self.scoped_top()?;
        let slot = record
            .values
            .get_mut(index)
            .ok_or_else(|| VmError::bounds("Scoped variable number out of range."))?;
        *slot = value;
        Ok(())
    }

    /// Finds (or creates) the local-variable block for `program` and
    /// promotes it to the head of the MRU list.
    pub fn localvars_for(&mut self, program: Dbref) -> &mut LocalVars {
        if let Some(at) = self.locals.iter().position(|l| l.program == program) {
            let block = self.locals.remove(at);
            self.locals.insert(0, block);
        } else {
            self.locals.insert(
                0,
                LocalVars {
                    program,
                    values: vec![Value::Int(0); MAX_VAR],
                },
            );
        }
        &mut self.locals[0]
    }

    /// Reads a frame variable.
    pub fn var_get(&self, index: usize) -> VmResult<Value> {
        self.variables
            .get(index)
            .cloned()
            .ok_or_else(|| VmError::bounds("Variable number out of range."))
    }

    /// Writes a frame variable.
    pub fn var_set(&mut self, index: usize, value: Value) -> VmResult<()> {
        let slot = self
            .variables
            .get_mut(index)
            .ok_or_else(|| VmError::bounds("Variable number out of range."))?;
        *slot = value;
        Ok(())
    }

    /// Queues an event; delivery order is arrival order.
    pub fn enqueue_event(&mut self, event: String, data: Value) {
        self.events.push(EventEntry { event, data });
    }

    /// Pops the first queued event matching one of the awaited ids. An
    /// empty id list matches any event.
    pub fn dequeue_matching(&mut self, wanted: &[String]) -> Option<EventEntry> {
        let at = self.events.iter().position(|e| {
            wanted.is_empty() || wanted.iter().any(|w| w.eq_ignore_ascii_case(&e.event))
        })?;
        Some(self.events.remove(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muf_core::ProgramPin;

    fn test_frame() -> Frame {
        Frame::new(
            1,
            0,
            Dbref(2),
            NOTHING,
            Dbref(3),
            ProgramPin::new(),
            0,
            Multitask::Foreground,
        )
    }

    #[test]
    fn reserved_variables_are_seeded() {
        let frame = test_frame();
        assert_eq!(frame.var_get(0).unwrap(), Value::Object(Dbref(2)));
        assert_eq!(frame.var_get(2).unwrap(), Value::Object(NOTHING));
        assert_eq!(frame.var_get(3).unwrap(), Value::empty_string());
    }

    #[test]
    fn localvars_promote_to_front() {
        let mut frame = test_frame();
        frame.localvars_for(Dbref(10)).values[0] = Value::Int(1);
        frame.localvars_for(Dbref(11)).values[0] = Value::Int(2);
        assert_eq!(frame.locals[0].program, Dbref(11));

        frame.localvars_for(Dbref(10));
        assert_eq!(frame.locals[0].program, Dbref(10));
        assert_eq!(frame.locals[0].values[0], Value::Int(1));
        assert_eq!(frame.locals.len(), 2);
    }

    #[test]
    fn event_dequeue_is_fifo_per_id() {
        let mut frame = test_frame();
        frame.enqueue_event("USER.a".into(), Value::Int(1));
        frame.enqueue_event("USER.b".into(), Value::Int(2));
        frame.enqueue_event("USER.a".into(), Value::Int(3));

        let wanted = vec!["USER.a".to_string()];
        assert_eq!(
            frame.dequeue_matching(&wanted).unwrap().data,
            Value::Int(1)
        );
        assert_eq!(
            frame.dequeue_matching(&wanted).unwrap().data,
            Value::Int(3)
        );
        assert!(frame.dequeue_matching(&wanted).is_none());
        assert_eq!(frame.events.len(), 1);
    }
}
