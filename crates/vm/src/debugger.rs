//! Breakpoint state carried by a frame.

use muf_core::Dbref;

use crate::error::{VmError, VmResult};

/// One breakpoint: a program plus a line or instruction position (or
/// neither, which breaks on the next instruction of that program).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub program: Dbref,
    pub line: Option<i32>,
    pub pc: Option<usize>,
    /// One-shot breakpoints delete themselves when they trip.
    pub temp: bool,
}

/// A frame's debugging state.
#[derive(Debug, Default)]
pub struct BreakpointState {
    /// Whether the frame is under debugger control at all.
    pub debugging: bool,
    /// Set while the frame is parked in a `read`.
    pub isread: bool,
    breakpoints: Vec<Breakpoint>,
}

impl BreakpointState {
    /// Installs a breakpoint, honoring the configured cap.
    pub fn add(&mut self, bp: Breakpoint, max: usize) -> VmResult<()> {
        if self.breakpoints.len() >= max {
            return Err(VmError::resource("Too many breakpoints set."));
        }
        self.breakpoints.push(bp);
        Ok(())
    }

    /// Removes the breakpoint at `index`.
    pub fn remove(&mut self, index: usize) -> Option<Breakpoint> {
        if index < self.breakpoints.len() {
            Some(self.breakpoints.remove(index))
        } else {
            None
        }
    }

    /// Installed breakpoints.
    pub fn list(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Checks the position against the installed breakpoints; a tripped
    /// one-shot is removed.
    pub fn check(&mut self, program: Dbref, line: i32, pc: usize) -> bool {
        if !self.debugging {
            return false;
        }
        let hit = self.breakpoints.iter().position(|bp| {
            bp.program == program
                && bp.line.map(|l| l == line).unwrap_or(true)
                && bp.pc.map(|p| p == pc).unwrap_or(true)
        });
        match hit {
            Some(at) => {
                if self.breakpoints[at].temp {
                    self.breakpoints.remove(at);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_respect_the_cap() {
        let mut state = BreakpointState::default();
        let bp = Breakpoint {
            program: Dbref(1),
            line: None,
            pc: None,
            temp: false,
        };
        state.add(bp.clone(), 1).unwrap();
        assert!(matches!(
            state.add(bp, 1),
            Err(VmError::Resource { .. })
        ));
    }

    #[test]
    fn one_shot_breakpoints_clear_themselves() {
        let mut state = BreakpointState {
            debugging: true,
            ..Default::default()
        };
        state
            .add(
                Breakpoint {
                    program: Dbref(1),
                    line: Some(3),
                    pc: None,
                    temp: true,
                },
                4,
            )
            .unwrap();
        assert!(!state.check(Dbref(1), 2, 0));
        assert!(state.check(Dbref(1), 3, 5));
        assert!(state.list().is_empty());
        assert!(!state.check(Dbref(1), 3, 5));
    }

    #[test]
    fn disabled_debugging_never_trips() {
        let mut state = BreakpointState::default();
        state
            .add(
                Breakpoint {
                    program: Dbref(1),
                    line: None,
                    pc: None,
                    temp: false,
                },
                4,
            )
            .unwrap();
        assert!(!state.check(Dbref(1), 1, 1));
    }
}
