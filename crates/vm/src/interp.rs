//! The fetch-decode-execute loop.
//!
//! One invocation runs one frame until it terminates or yields. All
//! registers (instruction pointer, stacks) live in the frame itself, so
//! re-entering the loop on a resumed frame continues exactly where it
//! stopped. Errors raised during execution are routed to the innermost try
//! handler when one is armed; otherwise the frame terminates with a
//! diagnostic.

use muf_core::{mucker_level, Dbref, Instr, ObjFlags, ObjectDb, Op, Outbound, Prim, Value};

use crate::engine::MufEngine;
use crate::error::{VmError, VmResult};
use crate::frame::{CallerEntry, Frame, Multitask, ScopedFrame, SysReturn, TryRecord, UidMode};
use crate::primitives::{self, PrimCall};
use crate::sched::YieldReason;

/// Resources the loop and the primitive handlers share.
pub struct InterpCtx<'e, 'w> {
    pub engine: &'e mut MufEngine,
    pub db: &'w mut dyn ObjectDb,
    pub output: &'w mut dyn Outbound,
}

/// How one loop invocation ended.
#[derive(Debug)]
pub enum LoopOutcome {
    /// The frame terminated. `result` is the top of the data stack, when
    /// one was left; `errored` marks abnormal termination.
    Done {
        result: Option<Value>,
        errored: bool,
    },
    /// The frame suspended; its registers are saved and it is ready for
    /// the time queue.
    Yielded(YieldReason),
}

/// What one instruction asked the loop to do next.
enum Step {
    Next,
    Jump(usize),
    Yield(YieldReason),
    Done,
}

/// Runs `frame` until it terminates or yields.
pub(crate) fn interp_loop(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame) -> LoopOutcome {
    let mut slice_count: u64 = 0;

    loop {
        if frame.die_requested {
            return LoopOutcome::Done {
                result: None,
                errored: false,
            };
        }

        let program = frame.current_program();
        let instr = match cx.engine.registry.instr(program, frame.pc) {
            Ok(instr) => instr.clone(),
            Err(err) => return terminate_with_error(cx, frame, program, None, err),
        };

        let prog_flags = cx.db.flags(program);
        let mlev = mucker_level(prog_flags);

        if frame
            .brkpt
            .check(program, instr.line, frame.pc)
        {
            return LoopOutcome::Yielded(YieldReason::Breakpoint);
        }

        frame.instr_count += 1;
        slice_count += 1;

        // hard per-frame cap for low mucker levels; not interceptable
        if let Some(cap) = cx.engine.tunables.instr_cap_for_mlev(mlev) {
            if frame.instr_count > cap {
                let err = VmError::Fatal {
                    message: "Maximum total instruction count exceeded.".to_string(),
                };
                return terminate_with_error(cx, frame, program, Some(&instr), err);
            }
        }

        let preemptive =
            frame.multitask == Multitask::Preempt || prog_flags.contains(ObjFlags::BUILDER);
        if preemptive {
            let cap = cx.engine.tunables.preempt_cap_for_mlev(mlev);
            if cap > 0 && slice_count > cap {
                // reset the slice so a handler gets budget to run
                slice_count = 0;
                let err =
                    VmError::resource("Program exceeded preempt instruction limit.");
                match raise(cx, frame, program, Some(&instr), err) {
                    Ok(()) => continue,
                    Err(outcome) => return outcome,
                }
            }
        } else if slice_count > cx.engine.tunables.instr_slice {
            // voluntary end-of-slice yield; a zero-delay requeue resumes us
            let reason = if frame.multitask == Multitask::Background {
                YieldReason::Background
            } else {
                YieldReason::Foreground
            };
            frame.been_background |= frame.multitask == Multitask::Background;
            return LoopOutcome::Yielded(reason);
        }

        if frame.debug_trace || prog_flags.contains(ObjFlags::DEBUG_TRACE) {
            let player = frame.player;
            cx.output.notify(
                player,
                &format!("{}. {} ({}) {}", frame.pc, frame.data.depth(), instr.line, instr),
            );
        }

        match execute_instr(cx, frame, program, mlev, &instr) {
            Ok(Step::Next) => frame.pc += 1,
            Ok(Step::Jump(target)) => frame.pc = target,
            Ok(Step::Yield(reason)) => return LoopOutcome::Yielded(reason),
            Ok(Step::Done) => {
                let result = frame.data.peek(0).ok().cloned();
                return LoopOutcome::Done {
                    result,
                    errored: false,
                };
            }
            Err(err) => match raise(cx, frame, program, Some(&instr), err) {
                Ok(()) => continue,
                Err(outcome) => return outcome,
            },
        }
    }
}

/// Executes one instruction.
fn execute_instr(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    program: Dbref,
    mlev: u8,
    instr: &Instr,
) -> VmResult<Step> {
    if let Some(value) = instr.op.immediate_value() {
        frame.data.push(value)?;
        return Ok(Step::Next);
    }

    match &instr.op {
        Op::SVarAt(n) => {
            let value = frame.scoped_get(*n)?;
            frame.data.push(value)?;
            Ok(Step::Next)
        }
        Op::SVarAtClear(n) => {
            let value = frame.scoped_get(*n)?;
            frame.scoped_set(*n, Value::Int(0))?;
            frame.data.push(value)?;
            Ok(Step::Next)
        }
        Op::SVarBang(n) => {
            let value = frame.data.pop(frame.protected_depth())?;
            frame.scoped_set(*n, value)?;
            Ok(Step::Next)
        }
        Op::LVarAt(n) => {
            let value = local_get(frame, program, *n)?;
            frame.data.push(value)?;
            Ok(Step::Next)
        }
        Op::LVarAtClear(n) => {
            let value = local_get(frame, program, *n)?;
            local_set(frame, program, *n, Value::Int(0))?;
            frame.data.push(value)?;
            Ok(Step::Next)
        }
        Op::LVarBang(n) => {
            let value = frame.data.pop(frame.protected_depth())?;
            local_set(frame, program, *n, value)?;
            Ok(Step::Next)
        }

        Op::If(target) => {
            let value = frame.data.pop(frame.protected_depth())?;
            if value.is_false() {
                Ok(Step::Jump(*target))
            } else {
                Ok(Step::Next)
            }
        }
        Op::Jmp(target) => {
            if matches!(
                cx.engine.registry.instr(program, *target).map(|i| &i.op),
                Ok(Op::Function(_))
            ) {
                frame.skip_declare = true;
            }
            Ok(Step::Jump(*target))
        }
        Op::Try(target) => {
            let value = frame.data.pop(frame.protected_depth())?;
            let n = match value {
                Value::Int(n) if n >= 0 => n as usize,
                _ => {
                    return Err(VmError::type_error(
                        "Argument is not a positive integer.",
                    ))
                }
            };
            let depth = frame.data.depth();
            // an inner region may not arm a floor below the one an
            // enclosing try already defends
            if let Some(enclosing) = frame.try_stack.last() {
                if depth.saturating_sub(enclosing.depth) < n {
                    return Err(VmError::StackProtection);
                }
            }
            if n > depth {
                return Err(VmError::StackUnderflow);
            }
            frame.try_stack.push(TryRecord {
                depth: depth - n,
                call_level: frame.system.len(),
                for_count: frame.for_stack.len(),
                pc: *target,
            });
            Ok(Step::Next)
        }
        Op::Exec(target) => {
            push_call(frame, program, frame.pc + 1)?;
            Ok(Step::Jump(*target))
        }
        Op::Ret => {
            frame.scoped.pop();
            match frame.system.pop() {
                None => Ok(Step::Done),
                Some(SysReturn { program: to, pc }) => {
                    if to != program {
                        frame.callers.pop();
                    }
                    Ok(Step::Jump(pc))
                }
            }
        }
        Op::Function(header) => {
            if frame.skip_declare {
                frame.skip_declare = false;
            } else {
                if frame.scoped.len() >= muf_config::ADDR_STACK_SIZE {
                    return Err(VmError::resource("System Stack Overflow"));
                }
                let mut record = ScopedFrame::for_function(header.clone());
                for i in (0..header.args).rev() {
                    let value = frame.data.pop(frame.protected_depth())?;
                    record.values[i] = value;
                }
                frame.scoped.push(record);
            }
            Ok(Step::Next)
        }

        Op::Primitive(prim) => execute_prim(cx, frame, program, mlev, *prim),

        Op::Cleared => {
            log::warn!(
                "attempt to execute cleared instruction at {} in program {}",
                frame.pc,
                program
            );
            Err(VmError::internal(
                "Program erroneously freed from memory.",
            ))
        }

        // remaining ops are push-immediates already handled above
        _ => Err(VmError::internal("Unknown instruction type.")),
    }
}

/// The primitives the loop itself interprets: everything that suspends,
/// transfers control, or manipulates the try/for machinery. The rest goes
/// through the dispatch table.
fn execute_prim(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    program: Dbref,
    mlev: u8,
    prim: Prim,
) -> VmResult<Step> {
    match prim {
        Prim::Read => {
            if frame.writeonly {
                return Err(VmError::aborted("Program is write-only."));
            }
            if frame.multitask == Multitask::Background {
                return Err(VmError::aborted("BACKGROUND programs are write only."));
            }
            frame.brkpt.isread = true;
            frame.pc += 1;
            Ok(Step::Yield(YieldReason::ReadWait))
        }
        Prim::Sleep => {
            let value = frame.data.pop(frame.protected_depth())?;
            let Value::Int(secs) = value else {
                return Err(VmError::type_error("Invalid argument type."));
            };
            if secs < 0 {
                return Err(VmError::aborted("Timetravel beyond scope of muf."));
            }
            frame.pc += 1;
            Ok(Step::Yield(YieldReason::Sleeping(secs)))
        }
        Prim::EventWaitFor => {
            let value = frame.data.pop(frame.protected_depth())?;
            let Value::Array(arr) = value else {
                return Err(VmError::type_error(
                    "EventID string list array expected.",
                ));
            };
            let data = arr.borrow();
            if !data.is_list() || !data.is_homogeneous("string") {
                return Err(VmError::type_error(
                    "Argument must be a list array of eventid strings.",
                ));
            }
            let mut wanted: Vec<String> = Vec::new();
            for (_, entry) in data.entries() {
                if let Value::Str(s) = entry {
                    if !wanted.iter().any(|w| w == s.as_ref()) {
                        wanted.push(s.as_ref().clone());
                    }
                }
            }
            drop(data);
            frame.waiting_for = wanted;
            frame.pc += 1;
            Ok(Step::Yield(YieldReason::EventWait))
        }
        Prim::Execute => {
            let value = frame.data.pop(frame.protected_depth())?;
            let Value::Addr(cell) = value else {
                return Err(VmError::type_error("Invalid address."));
            };
            let target_prog = cell.program;
            let valid = cx
                .engine
                .registry
                .get(target_prog)
                .map(|p| p.version == cell.version && cell.index < p.instructions.len())
                .unwrap_or(false);
            if !valid {
                return Err(VmError::bounds("Stale address in execute."));
            }
            if target_prog != program {
                let pin = match cx.engine.registry.get(target_prog) {
                    Some(p) => p.pin.clone(),
                    None => return Err(VmError::bounds("Stale address in execute.")),
                };
                push_call(frame, program, frame.pc + 1)?;
                frame.callers.push(CallerEntry {
                    program: target_prog,
                    pin,
                });
            } else {
                push_call(frame, program, frame.pc + 1)?;
            }
            Ok(Step::Jump(cell.index))
        }
        Prim::Call => do_call(cx, frame, program, mlev),
        Prim::Catch => do_catch(cx, frame, false),
        Prim::CatchDetailed => do_catch(cx, frame, true),
        Prim::TryPop => {
            let record = frame
                .try_stack
                .pop()
                .ok_or_else(|| VmError::internal("TRYPOP with no TRY block."))?;
            cx.engine.try_pool.release(record);
            Ok(Step::Next)
        }
        Prim::For | Prim::Foreach => {
            primitives::loops::open_for(cx, frame, prim)?;
            Ok(Step::Next)
        }
        Prim::ForIter => {
            primitives::loops::iterate_for(frame)?;
            Ok(Step::Next)
        }
        Prim::ForPop => {
            let record = frame
                .for_stack
                .pop()
                .ok_or_else(|| VmError::internal("FORPOP with no FOR loop."))?;
            cx.engine.for_pool.release(record);
            Ok(Step::Next)
        }
        other => {
            let call = PrimCall {
                program,
                mlev,
                pc: frame.pc,
            };
            primitives::dispatch(cx, frame, &call, other)?;
            Ok(Step::Next)
        }
    }
}

/// Cross-program `call`: dbref plus (for foreign programs) a public name.
fn do_call(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    program: Dbref,
    mlev: u8,
) -> VmResult<Step> {
    let top = frame.data.pop(frame.protected_depth())?;
    let (target, name) = match top {
        Value::Str(name) => {
            let obj = frame.data.pop(frame.protected_depth())?;
            let Value::Object(target) = obj else {
                return Err(VmError::type_error("Dbref argument expected for CALL."));
            };
            (target, Some(name.as_ref().clone()))
        }
        Value::Object(target) => (target, None),
        _ => return Err(VmError::type_error("Dbref argument expected for CALL.")),
    };

    if !cx.db.valid(target) {
        return Err(VmError::InvalidObject { obj: target });
    }
    if name.is_none() && target != program {
        return Err(VmError::type_error(
            "Public function name expected for foreign CALL.",
        ));
    }

    let now = cx.engine.now;
    let player = frame.player;
    cx.engine
        .registry
        .ensure_compiled(cx.db, cx.output, &cx.engine.macros, player, target, now, false)
        .map_err(|_| VmError::environment("Program not compilable."))?;

    if target != program {
        let uid = effective_uid(cx.db, frame, program);
        let linkable = cx.db.flags(target).contains(ObjFlags::LINK_OK);
        if cx.db.owner(target) != uid && mlev < 4 && !linkable {
            return Err(VmError::permission("Permission denied."));
        }
    }

    let (entry, pin) = {
        let compiled = cx
            .engine
            .registry
            .get(target)
            .ok_or_else(|| VmError::environment("Program not compilable."))?;
        let entry = match &name {
            Some(func) => {
                let public = compiled
                    .find_public(func)
                    .ok_or_else(|| VmError::permission("PUBLIC or WIZCALL function not found."))?;
                if public.mlev > mlev {
                    return Err(VmError::permission("Permission denied."));
                }
                public.entry
            }
            None => compiled.start,
        };
        (entry, compiled.pin.clone())
    };

    push_call(frame, program, frame.pc + 1)?;
    if target != program {
        frame.callers.push(CallerEntry {
            program: target,
            pin,
        });
    }
    cx.engine.registry.touch(target, now);
    Ok(Step::Jump(entry))
}

/// CATCH / CATCH_DETAILED: consume the armed try record and deliver the
/// recorded error.
fn do_catch(cx: &mut InterpCtx<'_, '_>, frame: &mut Frame, detailed: bool) -> VmResult<Step> {
    let record = frame
        .try_stack
        .pop()
        .ok_or_else(|| VmError::internal("Catch without try."))?;
    frame.data.unwind_to(record.depth);
    while frame.for_stack.len() > record.for_count {
        if let Some(rec) = frame.for_stack.pop() {
            cx.engine.for_pool.release(rec);
        }
    }

    let info = frame.error_info.take().unwrap_or_default();
    if detailed {
        let dict = primitives::events::error_dictionary(&info);
        frame.data.push(Value::Array(dict))?;
    } else {
        frame.data.push(Value::string(info.message))?;
    }
    cx.engine.try_pool.release(record);
    Ok(Step::Next)
}

/// Pushes a system-stack return record.
fn push_call(frame: &mut Frame, program: Dbref, pc: usize) -> VmResult<()> {
    if frame.system.len() >= muf_config::ADDR_STACK_SIZE {
        return Err(VmError::resource("System Stack Overflow"));
    }
    frame.system.push(SysReturn { program, pc });
    Ok(())
}

/// The player or owner the frame acts as, per its uid mode.
pub(crate) fn effective_uid(db: &dyn ObjectDb, frame: &Frame, program: Dbref) -> Dbref {
    match frame.uid_mode {
        UidMode::RegUid => frame.player,
        UidMode::SetUid | UidMode::HardUid => db.owner(program),
    }
}

pub(crate) fn local_get(frame: &mut Frame, program: Dbref, index: usize) -> VmResult<Value> {
    let block = frame.localvars_for(program);
    block
        .values
        .get(index)
        .cloned()
        .ok_or_else(|| VmError::bounds("Local variable number out of range."))
}

pub(crate) fn local_set(frame: &mut Frame, program: Dbref, index: usize, value: Value) -> VmResult<()> {
    let block = frame.localvars_for(program);
    let slot = block
        .values
        .get_mut(index)
        .ok_or_else(|| VmError::bounds("Local variable number out of range."))?;
    *slot = value;
    Ok(())
}

/// Routes a raised error: to the innermost try handler when possible,
/// otherwise out of the loop with a rendered diagnostic.
fn raise(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    program: Dbref,
    instr: Option<&Instr>,
    err: VmError,
) -> Result<(), LoopOutcome> {
    if !err.is_catchable() || frame.try_stack.is_empty() {
        return Err(terminate_with_error(cx, frame, program, instr, err));
    }

    let (line, text) = match instr {
        Some(instr) => (instr.line, instr.to_string()),
        None => (0, String::new()),
    };
    frame.error_info = Some(crate::frame::ErrorInfo {
        message: err.to_string(),
        instr: text,
        line,
        program,
    });

    // unwind calls made since the try was armed
    let record = match frame.try_stack.last() {
        Some(record) => record.clone(),
        None => return Err(terminate_with_error(cx, frame, program, instr, err)),
    };
    while frame.system.len() > record.call_level {
        frame.scoped.pop();
        if let Some(ret) = frame.system.pop() {
            if ret.program != frame.current_program() && frame.callers.len() > 1 {
                frame.callers.pop();
            }
        }
    }
    frame.pc = record.pc;
    Ok(())
}

/// Renders the diagnostic for an uncaught error and marks the frame
/// terminated. The full excerpt and backtrace go only to a player who
/// controls the program; everyone else gets the concise form.
fn terminate_with_error(
    cx: &mut InterpCtx<'_, '_>,
    frame: &mut Frame,
    program: Dbref,
    instr: Option<&Instr>,
    err: VmError,
) -> LoopOutcome {
    let player = frame.player;
    let progname = cx.db.name(program);
    let (line, text) = match instr {
        Some(instr) => (instr.line, instr.to_string()),
        None => (0, String::new()),
    };

    if cx.db.controls(player, program) {
        cx.output.notify(
            player,
            &format!("Error in {progname}({program}), line {line}; {text}: {err}"),
        );
        for caller in frame.callers.iter().rev().skip(1) {
            let name = cx.db.name(caller.program);
            cx.output
                .notify(player, &format!("  Called from {name}({}).", caller.program));
        }
    } else {
        cx.output.notify(
            player,
            &format!("Program Error. Please tell the program's owner: {err}"),
        );
    }

    crate::primitives::misc::record_crash(cx.db, program, &err, cx.engine.now);

    LoopOutcome::Done {
        result: None,
        errored: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MufEngine;
    use crate::frame::Multitask;
    use muf_config::Tunables;
    use muf_core::{FuncHeader, Instr, MemDb, Program, RecordedOutput, NOTHING};
    use std::rc::Rc;

    fn header(name: &str, args: usize) -> Rc<FuncHeader> {
        Rc::new(FuncHeader {
            name: name.to_string(),
            vars: args,
            args,
            var_names: (0..args).map(|i| format!("a{i}")).collect(),
        })
    }

    fn build_program(dbref: Dbref, ops: Vec<Op>) -> Program {
        let mut program = Program::new(dbref);
        program.instructions = ops
            .into_iter()
            .map(|op| Instr { line: 1, op })
            .collect();
        program.instructions.push(Instr {
            line: 0,
            op: Op::Cleared,
        });
        program
    }

    fn run(program: Program) -> (LoopOutcome, Frame) {
        let mut db = MemDb::new();
        let player = db.create_player("P");
        let mut output = RecordedOutput::default();
        let mut engine = MufEngine::new(Tunables::default());
        let pin = program.pin.clone();
        let prog = program.dbref;
        engine.registry.install(program);

        let mut frame = Frame::new(
            1,
            0,
            player,
            NOTHING,
            prog,
            pin,
            0,
            Multitask::Preempt,
        );
        let outcome = interp_loop(
            &mut InterpCtx {
                engine: &mut engine,
                db: &mut db,
                output: &mut output,
            },
            &mut frame,
        );
        (outcome, frame)
    }

    #[test]
    fn jmp_into_function_entry_skips_the_declare() {
        // main pushes 42 and branches straight into helper's entry; the
        // one-argument header must not pop it, because a branch entry
        // reuses the caller's scoped record
        let program = build_program(
            Dbref(64),
            vec![
                Op::Function(header("main", 0)),
                Op::Int(42),
                Op::Jmp(3),
                Op::Function(header("helper", 1)),
                Op::Ret,
            ],
        );
        let (outcome, frame) = run(program);
        assert!(matches!(outcome, LoopOutcome::Done { errored: false, .. }));
        assert_eq!(frame.data.as_slice(), &[muf_core::Value::Int(42)]);
    }

    #[test]
    fn exec_into_function_entry_declares_and_binds_args() {
        // same shape, but a real call: the argument is consumed into the
        // helper's scoped variable and pushed back from it
        let program = build_program(
            Dbref(64),
            vec![
                Op::Function(header("main", 0)),
                Op::Int(42),
                Op::Exec(4),
                Op::Ret,
                Op::Function(header("helper", 1)),
                Op::SVarAt(0),
                Op::Ret,
            ],
        );
        let (outcome, frame) = run(program);
        assert!(matches!(outcome, LoopOutcome::Done { errored: false, .. }));
        assert_eq!(frame.data.as_slice(), &[muf_core::Value::Int(42)]);
    }
}
