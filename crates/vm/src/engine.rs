//! The engine: program lifecycle glue and the cooperative scheduler
//! driver.
//!
//! One engine owns the program registry, the time queue, the macro table
//! and the object pools. The surrounding server supplies the database and
//! descriptor layer per call; the engine supplies logical time (a seconds
//! counter the embedder advances with [`MufEngine::tick`]).

use std::time::Instant;

use muf_compiler::MacroTable;
use muf_config::Tunables;
use muf_core::{mucker_level, Dbref, ObjFlags, ObjectDb, Outbound, Value, NOTHING};

use crate::error::{VmError, VmResult};
use crate::fork;
use crate::frame::{Frame, Multitask, Pid};
use crate::interp::{interp_loop, InterpCtx, LoopOutcome};
use crate::pools::{ForPool, FramePool, TryPool};
use crate::registry::ProgramRegistry;
use crate::sched::{TimeQueue, YieldReason};

/// A pending process timer.
#[derive(Debug, Clone)]
struct TimerEntry {
    fire_at: u64,
    pid: Pid,
    name: String,
}

/// Parameters for queueing a program run.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub player: Dbref,
    pub program: Dbref,
    pub trigger: Dbref,
    pub descr: i32,
    pub multitask: Multitask,
    /// Seconds before the first instruction runs.
    pub delay: u64,
}

/// Outcome of a synchronous, run-to-completion program invocation.
#[derive(Debug)]
pub enum RunResult {
    /// Ran to normal exit; the frame's final data stack, bottom first.
    Finished(Vec<Value>),
    /// Terminated on an uncaught error (already reported to the player).
    Errored,
    /// Suspended (sleep/read/event wait); the frame is parked under this
    /// pid.
    Suspended(Pid),
}

/// The MUF engine.
pub struct MufEngine {
    pub tunables: Tunables,
    pub macros: MacroTable,
    pub registry: ProgramRegistry,
    pub queue: TimeQueue,
    pub(crate) for_pool: ForPool,
    pub(crate) try_pool: TryPool,
    frame_pool: FramePool,
    timers: Vec<TimerEntry>,
    next_pid: Pid,
    /// Logical clock, seconds.
    pub now: u64,
    nest_level: usize,
}

impl MufEngine {
    /// Creates an engine with the given limits.
    pub fn new(tunables: Tunables) -> Self {
        let pool_size = tunables.free_frames_pool;
        MufEngine {
            tunables,
            macros: MacroTable::new(),
            registry: ProgramRegistry::new(),
            queue: TimeQueue::new(),
            for_pool: ForPool::default(),
            try_pool: TryPool::default(),
            frame_pool: FramePool::new(pool_size),
            timers: Vec::new(),
            next_pid: 1,
            now: 0,
            nest_level: 0,
        }
    }

    /// Advances the logical clock.
    pub fn tick(&mut self, seconds: u64) {
        self.now += seconds;
    }

    /// Whether a pid names a live (parked) process.
    pub fn pid_alive(&self, pid: Pid) -> bool {
        self.queue.contains(pid)
    }

    fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid = self.next_pid.wrapping_add(1).max(1);
        pid
    }

    /// Compiles a program from source, and honors the autostart flag: a
    /// successfully compiled program marked autostart and owned by a
    /// wizard-class player is queued to run.
    pub fn compile_program(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        player: Dbref,
        program: Dbref,
    ) -> VmResult<()> {
        // a recompile invalidates running copies first
        self.kill_instances_of(db, output, program);
        let now = self.now;
        self.registry
            .compile(db, output, &self.macros, player, program, now, true)?;

        let owner = db.owner(program);
        let autostart = db.flags(program).contains(ObjFlags::AUTOSTART)
            && mucker_level(db.flags(owner)) >= 4;
        if autostart {
            self.queue_program(
                db,
                output,
                QueueRequest {
                    player: owner,
                    program,
                    trigger: NOTHING,
                    descr: 0,
                    multitask: Multitask::Foreground,
                    delay: 0,
                },
            )?;
        }
        Ok(())
    }

    /// Kills every queued instance of a program.
    fn kill_instances_of(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        program: Dbref,
    ) {
        let doomed: Vec<Pid> = self
            .queue
            .pids()
            .into_iter()
            .filter(|pid| {
                self.queue
                    .frame_mut(*pid)
                    .map(|f| f.callers.iter().any(|c| c.program == program))
                    .unwrap_or(false)
            })
            .collect();
        for pid in doomed {
            self.kill_parked(db, output, pid);
        }
    }

    /// Compiles (if needed) and queues a program run, returning the new
    /// pid.
    pub fn queue_program(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        req: QueueRequest,
    ) -> VmResult<Pid> {
        let running_for_player = self
            .queue
            .pids()
            .into_iter()
            .filter(|pid| {
                self.queue
                    .frame_mut(*pid)
                    .map(|f| f.player == req.player)
                    .unwrap_or(false)
            })
            .count();
        if running_for_player >= self.tunables.max_process_limit {
            return Err(VmError::resource("Too many processes queued."));
        }

        let now = self.now;
        self.registry.ensure_compiled(
            db,
            output,
            &self.macros,
            req.player,
            req.program,
            now,
            true,
        )?;
        let (pin, start) = {
            let program = self
                .registry
                .get(req.program)
                .ok_or_else(|| VmError::environment("Program not compilable."))?;
            (program.pin.clone(), program.start)
        };

        let pid = self.allocate_pid();
        let mut frame = match self.frame_pool.take() {
            Some(mut pooled) => {
                *pooled = Frame::new(
                    pid,
                    req.descr,
                    req.player,
                    req.trigger,
                    req.program,
                    pin,
                    start,
                    req.multitask,
                );
                pooled
            }
            None => Box::new(Frame::new(
                pid,
                req.descr,
                req.player,
                req.trigger,
                req.program,
                pin,
                start,
                req.multitask,
            )),
        };
        frame.variables[1] = Value::Object(db.location(req.player));
        if req.multitask == Multitask::Background {
            frame.writeonly = true;
        }

        let reason = match req.multitask {
            Multitask::Background => YieldReason::Background,
            _ => YieldReason::Foreground,
        };
        self.queue.schedule(now, req.delay, reason, frame);
        Ok(pid)
    }

    /// Compiles (if needed) and runs a program immediately and
    /// synchronously, the way a command-dispatched program runs. The frame
    /// yields to the queue like any other if it suspends.
    pub fn run_program_now(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        req: QueueRequest,
    ) -> VmResult<RunResult> {
        let now = self.now;
        self.registry.ensure_compiled(
            db,
            output,
            &self.macros,
            req.player,
            req.program,
            now,
            true,
        )?;
        let (pin, start) = {
            let program = self
                .registry
                .get(req.program)
                .ok_or_else(|| VmError::environment("Program not compilable."))?;
            (program.pin.clone(), program.start)
        };
        let pid = self.allocate_pid();
        let mut frame = Box::new(Frame::new(
            pid,
            req.descr,
            req.player,
            req.trigger,
            req.program,
            pin,
            start,
            req.multitask,
        ));
        frame.variables[1] = Value::Object(db.location(req.player));

        let outcome = interp_loop(
            &mut InterpCtx {
                engine: self,
                db,
                output,
            },
            &mut frame,
        );
        match outcome {
            LoopOutcome::Done { errored, .. } => {
                let stack = frame.data.as_slice().to_vec();
                if let Some(compiled) = self.registry.get_mut(req.program) {
                    compiled.use_count += 1;
                }
                self.registry.touch(req.program, now);
                self.terminate_frame(db, output, frame);
                if errored {
                    Ok(RunResult::Errored)
                } else {
                    Ok(RunResult::Finished(stack))
                }
            }
            LoopOutcome::Yielded(reason) => {
                match reason {
                    YieldReason::Sleeping(secs) => {
                        self.queue
                            .schedule(now, secs as u64, YieldReason::Sleeping(secs), frame)
                    }
                    YieldReason::Foreground | YieldReason::Background => {
                        self.queue.schedule(now, 0, reason, frame)
                    }
                    other => self.queue.park_indefinitely(other, frame),
                }
                Ok(RunResult::Suspended(pid))
            }
        }
    }

    /// Runs everything due at the current logical time. Returns the number
    /// of frames entered. A frame that requeues itself at zero delay (the
    /// end-of-slice yield) waits for the next call, so one call never
    /// spins on a single busy frame.
    pub fn run_due(&mut self, db: &mut dyn ObjectDb, output: &mut dyn Outbound) -> usize {
        self.fire_due_timers();

        let mut budget = self.queue.len();
        let mut ran = 0;
        while budget > 0 {
            budget -= 1;
            let Some(entry) = self.queue.pop_due(self.now) else {
                break;
            };
            ran += 1;
            self.run_entry(db, output, entry.reason, entry.frame);
        }
        ran
    }

    /// Runs frames and advances the clock until nothing remains runnable
    /// or `max_seconds` of logical time pass. Intended for embedders with
    /// no real scheduler around the engine, and for tests.
    pub fn run_until_idle(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        max_seconds: u64,
    ) {
        let deadline = self.now.saturating_add(max_seconds);
        loop {
            let ran = self.run_due(db, output);
            let next_frame = self.queue.next_due_in(self.now);
            let next_timer = self
                .timers
                .iter()
                .map(|t| t.fire_at.saturating_sub(self.now))
                .min();
            let step = match next_frame.into_iter().chain(next_timer).min() {
                Some(step) => step,
                None => break,
            };
            if step == 0 {
                if ran == 0 {
                    break;
                }
                continue;
            }
            if self.now.saturating_add(step) > deadline {
                break;
            }
            self.now += step;
        }
    }

    fn run_entry(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        reason: YieldReason,
        mut frame: Box<Frame>,
    ) {
        // a woken event-waiter consumes its event before re-entering
        if reason == YieldReason::EventWait {
            let wanted = frame.waiting_for.clone();
            match frame.dequeue_matching(&wanted) {
                Some(entry) => {
                    frame.waiting_for.clear();
                    let _ = frame.data.push(entry.data);
                    let _ = frame.data.push(Value::string(entry.event));
                }
                None => {
                    self.queue.park_indefinitely(YieldReason::EventWait, frame);
                    return;
                }
            }
        }

        if self.nest_level >= self.tunables.max_interp_nest_level {
            log::warn!("interpreter nesting limit hit; dropping pid {}", frame.pid);
            self.terminate_frame(db, output, frame);
            return;
        }
        self.nest_level += 1;

        let program = frame.current_program();
        let started = Instant::now();
        let outcome = interp_loop(
            &mut InterpCtx {
                engine: self,
                db,
                output,
            },
            &mut frame,
        );
        let elapsed = started.elapsed().as_micros() as u64;

        self.nest_level -= 1;
        frame.profile_usecs += elapsed;
        if let Some(compiled) = self.registry.get_mut(program) {
            compiled.profile_usecs += elapsed;
            compiled.instruction_total += frame.instr_count;
        }
        let now = self.now;
        self.registry.touch(program, now);

        match outcome {
            LoopOutcome::Done { .. } => {
                if let Some(compiled) = self.registry.get_mut(program) {
                    compiled.use_count += 1;
                }
                self.terminate_frame(db, output, frame);
            }
            LoopOutcome::Yielded(reason) => match reason {
                YieldReason::Sleeping(secs) => {
                    self.queue
                        .schedule(now, secs as u64, YieldReason::Sleeping(secs), frame)
                }
                YieldReason::Foreground | YieldReason::Background => {
                    // zero-delay requeue: other due frames get their slice
                    self.queue.schedule(now, 0, reason, frame)
                }
                YieldReason::ReadWait | YieldReason::Breakpoint => {
                    self.queue.park_indefinitely(reason, frame)
                }
                YieldReason::EventWait => {
                    let has_match = frame
                        .dequeue_matching(&frame.waiting_for.clone())
                        .map(|entry| {
                            // put it back; run_entry's wake path consumes it
                            frame.events.insert(0, entry);
                        })
                        .is_some();
                    let pid = frame.pid;
                    self.queue.park_indefinitely(YieldReason::EventWait, frame);
                    if has_match {
                        self.queue.wake(pid, now);
                    }
                }
            },
        }
    }

    /// Termination path: watcher notification, link cleanup, timer
    /// cancellation, pool recycling.
    fn terminate_frame(
        &mut self,
        _db: &mut dyn ObjectDb,
        _output: &mut dyn Outbound,
        mut frame: Box<Frame>,
    ) {
        let pid = frame.pid;
        let exit_event = format!("PROC.EXIT.{pid}");

        for watcher in &frame.watchers {
            let now = self.now;
            let mut wake = false;
            if let Some(entry) = self.queue.entry_mut(*watcher) {
                wake = Self::waiting_on(entry, &exit_event);
                entry.frame.enqueue_event(exit_event.clone(), Value::Int(pid));
                entry.frame.watchees.retain(|p| *p != pid);
            }
            if wake {
                self.queue.wake(*watcher, now);
            }
        }
        for watchee in &frame.watchees {
            if let Some(watchee_frame) = self.queue.frame_mut(*watchee) {
                watchee_frame.watchers.retain(|p| *p != pid);
            }
        }

        self.timers.retain(|t| t.pid != pid);
        self.for_pool.purge();
        self.try_pool.purge();

        // release everything the frame pins before it sits in the pool
        frame.data.unwind_to(0);
        frame.callers.clear();
        frame.system.clear();
        frame.scoped.clear();
        frame.locals.clear();
        frame.for_stack.clear();
        frame.try_stack.clear();
        frame.variables.clear();
        frame.events.clear();
        frame.waiting_for.clear();
        frame.watchers.clear();
        frame.watchees.clear();
        self.frame_pool.give(frame);
    }

    /// Whether a parked entry is event-waiting for the given event id.
    fn waiting_on(entry: &crate::sched::QueueEntry, event: &str) -> bool {
        entry.reason == YieldReason::EventWait
            && (entry.frame.waiting_for.is_empty()
                || entry
                    .frame
                    .waiting_for
                    .iter()
                    .any(|w| w.eq_ignore_ascii_case(event)))
    }

    /// Delivers an event to a pid; `current` is the running frame (which
    /// may be the target). Unknown pids drop the event.
    pub fn deliver_event(
        &mut self,
        current: &mut Frame,
        target: Pid,
        event: String,
        payload: Value,
    ) {
        if target == current.pid {
            current.enqueue_event(event, payload);
            return;
        }
        let now = self.now;
        let mut wake = false;
        if let Some(entry) = self.queue.entry_mut(target) {
            wake = Self::waiting_on(entry, &event);
            entry.frame.enqueue_event(event, payload.deep_copy());
        }
        if wake {
            self.queue.wake(target, now);
        }
    }

    /// Forks the running frame; returns the child pid to push on the
    /// parent's stack.
    pub fn fork_frame(&mut self, parent: &mut Frame) -> VmResult<Pid> {
        let queued_for_player = self
            .queue
            .pids()
            .into_iter()
            .filter(|pid| {
                self.queue
                    .frame_mut(*pid)
                    .map(|f| f.player == parent.player)
                    .unwrap_or(false)
            })
            .count();
        if queued_for_player >= self.tunables.max_process_limit {
            return Err(VmError::resource("Too many processes queued."));
        }
        let pid = self.allocate_pid();
        let child = Box::new(fork::fork_from(parent, pid));
        let now = self.now;
        self.queue
            .schedule(now, 0, YieldReason::Background, child);
        Ok(pid)
    }

    /// Kills a parked process; returns whether one was found.
    pub fn kill_parked(
        &mut self,
        db: &mut dyn ObjectDb,
        output: &mut dyn Outbound,
        pid: Pid,
    ) -> bool {
        match self.queue.remove(pid) {
            Some(entry) => {
                self.terminate_frame(db, output, entry.frame);
                true
            }
            None => false,
        }
    }

    /// Feeds a line of player input to a read-parked process.
    pub fn handle_read_input(&mut self, pid: Pid, text: &str) -> bool {
        let now = self.now;
        let Some(frame) = self.queue.frame_mut(pid) else {
            return false;
        };
        if !frame.brkpt.isread {
            return false;
        }
        frame.brkpt.isread = false;
        let _ = frame.data.push(Value::string(text));
        self.queue.wake(pid, now)
    }

    /// Resumes a breakpoint-parked process.
    pub fn resume(&mut self, pid: Pid) -> bool {
        let now = self.now;
        self.queue.wake(pid, now)
    }

    /// Starts (or restarts) a named process timer.
    pub fn start_timer(&mut self, frame: &mut Frame, secs: u64, name: &str) {
        let pid = frame.pid;
        self.timers
            .retain(|t| !(t.pid == pid && t.name.eq_ignore_ascii_case(name)));
        self.timers.push(TimerEntry {
            fire_at: self.now + secs,
            pid,
            name: name.to_string(),
        });
        frame.timer_count = self.timers.iter().filter(|t| t.pid == pid).count();
    }

    /// Stops a named process timer.
    pub fn stop_timer(&mut self, frame: &mut Frame, name: &str) {
        let pid = frame.pid;
        self.timers
            .retain(|t| !(t.pid == pid && t.name.eq_ignore_ascii_case(name)));
        frame.timer_count = self.timers.iter().filter(|t| t.pid == pid).count();
    }

    /// Converts due timers into `TIMER.<name>` events on their frames.
    fn fire_due_timers(&mut self) {
        let now = self.now;
        let due: Vec<TimerEntry> = {
            let (due, rest): (Vec<_>, Vec<_>) =
                std::mem::take(&mut self.timers)
                    .into_iter()
                    .partition(|t| t.fire_at <= now);
            self.timers = rest;
            due
        };
        for timer in due {
            let event = format!("TIMER.{}", timer.name);
            let mut wake = false;
            match self.queue.entry_mut(timer.pid) {
                Some(entry) => {
                    wake = Self::waiting_on(entry, &event);
                    entry
                        .frame
                        .enqueue_event(event.clone(), Value::Int(now as i32));
                    entry.frame.timer_count = entry.frame.timer_count.saturating_sub(1);
                }
                None => {
                    // the frame is running right now; hold the timer until
                    // it parks again
                    self.timers.push(timer);
                    continue;
                }
            }
            if wake {
                self.queue.wake(timer.pid, now);
            }
        }
    }

    /// Runs the idle-program reaper.
    pub fn reap_idle_programs(&mut self, db: &dyn ObjectDb) -> usize {
        let now = self.now;
        let age = self.tunables.max_loaded_progs_age;
        self.registry.reap_idle(db, now, age)
    }
}
