//! Process forking.
//!
//! A fork deep-copies everything reachable from the parent frame: the data
//! stack, caller chain, scoped and local variables, loop and try records
//! and every array those reach. The two frames share nothing mutable
//! afterwards. The child always starts background and write-only with a
//! zero pushed on its stack; the parent's been-background flag is copied
//! unchanged.

use muf_core::array;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::debugger::BreakpointState;
use crate::frame::{ForRecord, Frame, LocalVars, Multitask, Pid, ScopedFrame};

/// Builds the child frame for `fork`. The caller assigns the pid and
/// queues the result; the parent receives the pid on its own stack.
pub(crate) fn fork_from(parent: &Frame, child_pid: Pid) -> Frame {
    let mut data = parent.data.clone_deep();
    // the child sees a zero where the parent will see the child's pid
    let _ = data.push(muf_core::Value::Int(0));

    Frame {
        pid: child_pid,
        descr: parent.descr,
        player: parent.player,
        trigger: parent.trigger,
        data,
        system: parent.system.clone(),
        callers: parent.callers.clone(),
        scoped: parent
            .scoped
            .iter()
            .map(|record| ScopedFrame {
                header: record.header.clone(),
                values: record.values.iter().map(|v| v.deep_copy()).collect(),
            })
            .collect(),
        locals: parent
            .locals
            .iter()
            .map(|block| LocalVars {
                program: block.program,
                values: block.values.iter().map(|v| v.deep_copy()).collect(),
            })
            .collect(),
        for_stack: parent
            .for_stack
            .iter()
            .map(|record| match record {
                ForRecord::Counter {
                    current,
                    end,
                    step,
                    didfirst,
                } => ForRecord::Counter {
                    current: *current,
                    end: *end,
                    step: *step,
                    didfirst: *didfirst,
                },
                ForRecord::Iter { array: arr, pos } => ForRecord::Iter {
                    array: array::deep_copy(arr),
                    pos: *pos,
                },
            })
            .collect(),
        try_stack: parent.try_stack.clone(),
        variables: parent.variables.iter().map(|v| v.deep_copy()).collect(),
        pc: parent.pc + 1,
        multitask: Multitask::Background,
        uid_mode: parent.uid_mode,
        writeonly: true,
        been_background: parent.been_background,
        skip_declare: false,
        die_requested: false,
        instr_count: 0,
        events: Vec::new(),
        waiting_for: Vec::new(),
        watchers: Vec::new(),
        watchees: Vec::new(),
        timer_count: 0,
        brkpt: BreakpointState::default(),
        debug_trace: parent.debug_trace,
        error_info: None,
        profile_usecs: 0,
        rng: StdRng::seed_from_u64(child_pid as u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muf_core::{Dbref, ProgramPin, Value, NOTHING};

    #[test]
    fn fork_detaches_arrays_both_ways() {
        let mut parent = Frame::new(
            1,
            0,
            Dbref(2),
            NOTHING,
            Dbref(3),
            ProgramPin::new(),
            0,
            Multitask::Foreground,
        );
        let arr = array::new_list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        parent.data.push(Value::Array(arr.clone())).unwrap();

        let child = fork_from(&parent, 2);

        // child got the zero, above its copy of the array
        assert_eq!(child.data.peek(0).unwrap(), &Value::Int(0));
        let Value::Array(child_arr) = child.data.peek(1).unwrap().clone() else {
            panic!("expected array");
        };

        arr.borrow_mut().push(Value::Int(4)).unwrap();
        assert_eq!(child_arr.borrow().len(), 3);

        child_arr.borrow_mut().push(Value::Int(99)).unwrap();
        assert_eq!(arr.borrow().len(), 4);
    }

    #[test]
    fn fork_keeps_background_asymmetry() {
        let mut parent = Frame::new(
            1,
            0,
            Dbref(2),
            NOTHING,
            Dbref(3),
            ProgramPin::new(),
            0,
            Multitask::Foreground,
        );
        parent.been_background = false;

        let child = fork_from(&parent, 2);
        assert_eq!(child.multitask, Multitask::Background);
        assert!(child.writeonly);
        assert!(!child.been_background);
    }

    #[test]
    fn fork_pins_programs_on_the_caller_chain() {
        let pin = ProgramPin::new();
        let parent = Frame::new(
            1,
            0,
            Dbref(2),
            NOTHING,
            Dbref(3),
            pin.clone(),
            0,
            Multitask::Foreground,
        );
        assert_eq!(pin.holders(), 1); // the parent frame's copy

        let child = fork_from(&parent, 2);
        assert_eq!(pin.holders(), 2);
        drop(child);
        assert_eq!(pin.holders(), 1);
    }
}
