//! End-to-end interpreter tests: source in, execution effects out.

use muf_core::{ArrayKey, Dbref, MemDb, ObjFlags, ObjectDb, RecordedOutput, Value, NOTHING};
use muf_vm::{Multitask, MufEngine, QueueRequest, RunResult};

struct Fixture {
    db: MemDb,
    output: RecordedOutput,
    engine: MufEngine,
    player: Dbref,
    program: Dbref,
}

impl Fixture {
    fn new() -> Self {
        let mut db = MemDb::new();
        let player = db.create_player("Tester");
        let program = db.create_program("test.muf", player);
        db.add_flags(program, ObjFlags::SMUCKER);
        Fixture {
            db,
            output: RecordedOutput::default(),
            engine: MufEngine::new(muf_config::Tunables::default()),
            player,
            program,
        }
    }

    fn set_source(&mut self, lines: &[&str]) {
        self.db
            .set_program_source(self.program, lines.iter().map(|s| s.to_string()).collect());
        self.engine.registry.uncompile(self.program);
    }

    fn request(&self) -> QueueRequest {
        QueueRequest {
            player: self.player,
            program: self.program,
            trigger: NOTHING,
            descr: 1,
            multitask: Multitask::Preempt,
            delay: 0,
        }
    }

    fn run(&mut self, lines: &[&str]) -> RunResult {
        self.set_source(lines);
        let request = self.request();
        self.engine
            .run_program_now(&mut self.db, &mut self.output, request)
            .expect("program should compile")
    }

    fn run_stack(&mut self, lines: &[&str]) -> Vec<Value> {
        match self.run(lines) {
            RunResult::Finished(stack) => stack,
            other => panic!("expected normal completion, got {other:?}"),
        }
    }

    fn messages(&self) -> Vec<&str> {
        self.output
            .notifies
            .iter()
            .map(|(_, m)| m.as_str())
            .collect()
    }
}

#[test]
fn addition_leaves_five() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[": main 2 3 + ;"]);
    assert_eq!(stack, vec![Value::Int(5)]);
}

#[test]
fn caught_error_leaves_ok() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[": main 0 try 1 0 / catch pop \"ok\" endcatch ;"]);
    assert_eq!(stack, vec![Value::string("ok")]);
}

#[test]
fn try_count_beyond_stack_depth_underflows() {
    // the count is measured against the stack after it is popped; one
    // value feeding `1 try` leaves nothing for the region to defend
    let mut fx = Fixture::new();
    let result = fx.run(&[": main 1 try pop catch endcatch ;"]);
    assert!(matches!(result, RunResult::Errored));
    assert!(fx
        .messages()
        .iter()
        .any(|m| m.contains("Stack underflow")));
}

#[test]
fn inner_try_cannot_reach_below_an_enclosing_floor() {
    // the outer region defends both values; the inner `3 try` asks for
    // them plus its own operand and must fault instead of arming
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[
        ": main 7 8 0 try 9 3 try pop catch pop endcatch catch endcatch ;",
    ]);
    assert_eq!(
        stack,
        vec![
            Value::Int(7),
            Value::Int(8),
            Value::string("Stack protection fault."),
        ]
    );
}

#[test]
fn foreach_runs_three_iterations_and_empties_the_stack() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[": main { \"a\" \"b\" \"c\" }list foreach pop pop repeat ;"]);
    assert!(stack.is_empty());
}

#[test]
fn define_pushes_hello() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&["$define GREET \"hello\" $enddef", ": main GREET ;"]);
    assert_eq!(stack, vec![Value::string("hello")]);
}

#[test]
fn try_zero_catches_regardless_of_depth() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[
        ": main 7 8 0 try \"boom\" abort catch endcatch ;",
    ]);
    assert_eq!(
        stack,
        vec![Value::Int(7), Value::Int(8), Value::string("boom")]
    );
}

#[test]
fn catch_detailed_delivers_the_error_dictionary() {
    let mut fx = Fixture::new();
    // clean run: the try completes, TRYPOP skips the handler
    let stack = fx.run_stack(&[": main 4 2 2 try / catch_detailed endcatch ;"]);
    assert_eq!(stack, vec![Value::Int(2)]);

    let stack = fx.run_stack(&[": main 1 0 2 try / catch_detailed endcatch ;"]);
    assert_eq!(stack.len(), 1);
    let Value::Array(dict) = &stack[0] else {
        panic!("expected dictionary, got {stack:?}");
    };
    let error = dict.borrow().get(&ArrayKey::Str("error".into())).unwrap();
    assert_eq!(error, Value::string("Division by zero attempted."));
    let line = dict.borrow().get(&ArrayKey::Str("line".into())).unwrap();
    assert!(matches!(line, Value::Int(n) if n >= 1));
    let prog = dict.borrow().get(&ArrayKey::Str("program".into())).unwrap();
    assert_eq!(prog, Value::Object(fx.program));
}

#[test]
fn uncaught_error_reports_to_the_owner() {
    let mut fx = Fixture::new();
    let result = fx.run(&[": main 1 0 / ;"]);
    assert!(matches!(result, RunResult::Errored));
    assert!(fx
        .messages()
        .iter()
        .any(|m| m.contains("Division by zero")));
    // crash metadata lands on the program
    assert!(matches!(
        muf_core::ObjectDb::get_prop(&fx.db, fx.program, "_sys/errors/count"),
        Some(muf_core::PropValue::Int(1))
    ));
}

#[test]
fn instruction_cap_kills_low_level_programs_even_in_try() {
    let mut fx = Fixture::new();
    // mucker level 0 player/program: hard cap applies
    let result = fx.run(&[": main 0 try begin 1 not until catch pop endcatch ;"]);
    assert!(matches!(result, RunResult::Errored));
    assert!(fx
        .messages()
        .iter()
        .any(|m| m.contains("instruction count")));
}

#[test]
fn wizard_program_outruns_the_instruction_cap() {
    let mut fx = Fixture::new();
    fx.db.add_flags(fx.program, ObjFlags::WIZARD);
    // same loop, but bounded: count down from 30000
    let stack = fx.run_stack(&[
        ": main 30000 begin 1 - dup not until pop \"done\" ;",
    ]);
    assert_eq!(stack, vec![Value::string("done")]);
}

#[test]
fn variables_hold_values_across_reads() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[
        "lvar counter",
        ": bump counter @ 1 + counter ! ;",
        ": main bump bump bump counter @ ;",
    ]);
    assert_eq!(stack, vec![Value::Int(3)]);
}

#[test]
fn scoped_args_bind_in_declaration_order() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[
        ": sub[ a b -- r ] a @ b @ - ;",
        ": main 10 4 sub ;",
    ]);
    assert_eq!(stack, vec![Value::Int(6)]);
}

#[test]
fn tell_reaches_the_player() {
    let mut fx = Fixture::new();
    fx.run_stack(&[": main me @ \"ping\" notify ;"]);
    assert_eq!(fx.output.notifies, vec![(fx.player, "ping".to_string())]);
}

#[test]
fn public_call_crosses_programs() {
    let mut fx = Fixture::new();
    let lib = fx.db.create_program("lib.muf", fx.player);
    fx.db.set_program_source(
        lib,
        vec![
            ": double 2 * ;".to_string(),
            "public double".to_string(),
            ": main ;".to_string(),
        ],
    );
    let source = format!(": main 21 {lib} \"double\" call ;");
    let stack = fx.run_stack(&[source.as_str()]);
    assert_eq!(stack, vec![Value::Int(42)]);
}

#[test]
fn wizcall_needs_level_four() {
    let mut fx = Fixture::new();
    let lib = fx.db.create_program("lib.muf", fx.player);
    fx.db.set_program_source(
        lib,
        vec![
            ": secret 99 ;".to_string(),
            "wizcall secret".to_string(),
            ": main ;".to_string(),
        ],
    );
    let source = format!(": main {lib} \"secret\" call ;");
    fx.set_source(&[source.as_str()]);
    let request = fx.request();
    let result = fx
        .engine
        .run_program_now(&mut fx.db, &mut fx.output, request)
        .unwrap();
    assert!(matches!(result, RunResult::Errored));

    fx.db.add_flags(fx.program, ObjFlags::WIZARD);
    let stack = fx.run_stack(&[source.as_str()]);
    assert_eq!(stack, vec![Value::Int(99)]);
}

#[test]
fn sleep_resumes_on_the_time_queue() {
    let mut fx = Fixture::new();
    fx.set_source(&[": main \"before\" tell 3 sleep \"after\" tell ;"]);
    let mut req = fx.request();
    req.multitask = Multitask::Foreground;
    let pid = fx
        .engine
        .queue_program(&mut fx.db, &mut fx.output, req)
        .unwrap();
    assert!(fx.engine.pid_alive(pid));

    fx.engine.run_due(&mut fx.db, &mut fx.output);
    assert_eq!(fx.messages(), vec!["before"]);

    // not yet due
    fx.engine.tick(1);
    fx.engine.run_due(&mut fx.db, &mut fx.output);
    assert_eq!(fx.messages(), vec!["before"]);

    fx.engine.tick(2);
    fx.engine.run_due(&mut fx.db, &mut fx.output);
    assert_eq!(fx.messages(), vec!["before", "after"]);
    assert!(!fx.engine.pid_alive(pid));
}

#[test]
fn fork_gives_parent_the_pid_and_child_a_zero() {
    let mut fx = Fixture::new();
    // fork needs mucker level 3
    fx.db
        .add_flags(fx.program, ObjFlags::MUCKER | ObjFlags::SMUCKER);
    fx.set_source(&[
        ": main fork dup if \"parent\" tell else \"child\" tell then pop ;",
    ]);
    let mut req = fx.request();
    req.multitask = Multitask::Foreground;
    fx.engine
        .queue_program(&mut fx.db, &mut fx.output, req)
        .unwrap();
    fx.engine
        .run_until_idle(&mut fx.db, &mut fx.output, 10);

    let mut messages = fx.messages();
    messages.sort();
    assert_eq!(messages, vec!["child", "parent"]);
}

#[test]
fn event_send_wakes_a_waiting_process() {
    let mut fx = Fixture::new();
    fx.db
        .add_flags(fx.program, ObjFlags::MUCKER | ObjFlags::SMUCKER);
    let waiter = fx.db.create_program("waiter.muf", fx.player);
    fx.db.add_flags(waiter, ObjFlags::MUCKER | ObjFlags::SMUCKER);
    fx.db.set_program_source(
        waiter,
        vec![
            ": main { \"USER.ping\" }list event_waitfor".to_string(),
            "  pop pop \"woken\" tell ;".to_string(),
        ],
    );

    let waiter_req = QueueRequest {
        player: fx.player,
        program: waiter,
        trigger: NOTHING,
        descr: 1,
        multitask: Multitask::Foreground,
        delay: 0,
    };
    let waiter_pid = fx
        .engine
        .queue_program(&mut fx.db, &mut fx.output, waiter_req)
        .unwrap();
    fx.engine.run_due(&mut fx.db, &mut fx.output);
    assert!(fx.messages().is_empty());
    assert!(fx.engine.pid_alive(waiter_pid));

    let source = format!(": main {waiter_pid} \"ping\" 42 event_send ;");
    fx.set_source(&[source.as_str()]);
    let request = fx.request();
    fx.engine
        .run_program_now(&mut fx.db, &mut fx.output, request)
        .unwrap();
    fx.engine
        .run_until_idle(&mut fx.db, &mut fx.output, 5);

    assert_eq!(fx.messages(), vec!["woken"]);
    assert!(!fx.engine.pid_alive(waiter_pid));
}

#[test]
fn event_delivery_is_fifo() {
    let mut fx = Fixture::new();
    fx.db
        .add_flags(fx.program, ObjFlags::MUCKER | ObjFlags::SMUCKER);
    let waiter = fx.db.create_program("waiter.muf", fx.player);
    fx.db.add_flags(waiter, ObjFlags::MUCKER | ObjFlags::SMUCKER);
    // consume two events; report the data field of each in arrival order
    fx.db.set_program_source(
        waiter,
        vec![
            ": grab { \"USER.seq\" }list event_waitfor pop".to_string(),
            "  \"data\" array_getitem intostr tell ;".to_string(),
            ": main grab grab ;".to_string(),
        ],
    );
    let waiter_pid = fx
        .engine
        .queue_program(
            &mut fx.db,
            &mut fx.output,
            QueueRequest {
                player: fx.player,
                program: waiter,
                trigger: NOTHING,
                descr: 1,
                multitask: Multitask::Foreground,
                delay: 0,
            },
        )
        .unwrap();
    fx.engine.run_due(&mut fx.db, &mut fx.output);

    let source = format!(
        ": main {waiter_pid} \"seq\" 1 event_send {waiter_pid} \"seq\" 2 event_send ;"
    );
    fx.set_source(&[source.as_str()]);
    let request = fx.request();
    fx.engine
        .run_program_now(&mut fx.db, &mut fx.output, request)
        .unwrap();
    fx.engine
        .run_until_idle(&mut fx.db, &mut fx.output, 5);

    assert_eq!(fx.messages(), vec!["1", "2"]);
}

#[test]
fn watchpid_delivers_exit_events() {
    let mut fx = Fixture::new();
    fx.db
        .add_flags(fx.program, ObjFlags::MUCKER | ObjFlags::SMUCKER);

    let sleeper = fx.db.create_program("sleeper.muf", fx.player);
    fx.db
        .set_program_source(sleeper, vec![": main 2 sleep ;".to_string()]);
    let sleeper_pid = fx
        .engine
        .queue_program(
            &mut fx.db,
            &mut fx.output,
            QueueRequest {
                player: fx.player,
                program: sleeper,
                trigger: NOTHING,
                descr: 1,
                multitask: Multitask::Foreground,
                delay: 0,
            },
        )
        .unwrap();
    fx.engine.run_due(&mut fx.db, &mut fx.output);

    let source = format!(
        ": main {sleeper_pid} watchpid event_wait swap pop \"PROC.EXIT.{sleeper_pid}\" stringcmp not if \"exited\" tell then ;"
    );
    fx.set_source(&[source.as_str()]);
    let mut req = fx.request();
    req.multitask = Multitask::Foreground;
    fx.engine
        .queue_program(&mut fx.db, &mut fx.output, req)
        .unwrap();

    fx.engine
        .run_until_idle(&mut fx.db, &mut fx.output, 10);
    assert_eq!(fx.messages(), vec!["exited"]);
}

#[test]
fn timer_fires_as_an_event() {
    let mut fx = Fixture::new();
    fx.db
        .add_flags(fx.program, ObjFlags::MUCKER | ObjFlags::SMUCKER);
    fx.set_source(&[
        ": main 2 \"tick\" timer_start",
        "  { \"TIMER.tick\" }list event_waitfor pop pop \"ticked\" tell ;",
    ]);
    let mut req = fx.request();
    req.multitask = Multitask::Foreground;
    fx.engine
        .queue_program(&mut fx.db, &mut fx.output, req)
        .unwrap();
    fx.engine
        .run_until_idle(&mut fx.db, &mut fx.output, 10);
    assert_eq!(fx.messages(), vec!["ticked"]);
}

#[test]
fn background_programs_cannot_read() {
    let mut fx = Fixture::new();
    let result = fx.run(&[": main background read pop ;"]);
    assert!(matches!(result, RunResult::Errored));
    assert!(fx
        .messages()
        .iter()
        .any(|m| m.contains("write only") || m.contains("write-only")));
}

#[test]
fn autostart_program_runs_after_compile() {
    let mut fx = Fixture::new();
    fx.db.add_flags(fx.player, ObjFlags::WIZARD);
    fx.db.add_flags(fx.program, ObjFlags::AUTOSTART);
    fx.db.set_program_source(
        fx.program,
        vec![": main \"started\" tell ;".to_string()],
    );
    fx.engine
        .compile_program(&mut fx.db, &mut fx.output, fx.player, fx.program)
        .unwrap();
    fx.engine.run_due(&mut fx.db, &mut fx.output);
    assert!(fx.messages().contains(&"started"));
}

#[test]
fn countdown_loop_terminates_cleanly() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[
        ": main 3 begin 1 - dup not until \"end\" ;",
    ]);
    assert_eq!(stack, vec![Value::Int(0), Value::string("end")]);
}

#[test]
fn quoted_address_executes_in_the_same_program() {
    let mut fx = Fixture::new();
    let stack = fx.run_stack(&[
        ": helper 5 ;",
        ": main 'helper execute 2 * ;",
    ]);
    assert_eq!(stack, vec![Value::Int(10)]);
}
