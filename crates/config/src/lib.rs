//! MUF Engine Configuration Module
//!
//! This module provides the tunable limits and fixed constants shared by the
//! compiler, the interpreter and the MCP layer.

use serde::{Deserialize, Serialize};

/// Number of variable slots available per program (scoped, local and global).
pub const MAX_VAR: usize = 54;

/// Number of reserved frame variables: ME, LOC, TRIGGER and COMMAND.
pub const RES_VAR: usize = 4;

/// Data stack capacity of a frame.
pub const STACK_SIZE: usize = 1024;

/// System (return) stack capacity of a frame.
pub const ADDR_STACK_SIZE: usize = 256;

/// Maximum number of macro/define substitutions applied to a single source line.
pub const SUBSTITUTIONS_MAX: usize = 20;

/// Maximum nesting depth of recursive `( ... )` comments.
pub const COMMENT_DEPTH_MAX: usize = 7;

/// Growth quantum of the compiler's address table.
pub const ADDR_TABLE_CHUNK: usize = 256;

/// Maximum number of arguments accepted in one MCP message.
pub const MAX_MCP_MESG_ARGS: usize = 30;

/// Maximum encoded size of one MCP message, in bytes.
pub const MAX_MCP_MESG_SIZE: usize = 262_144;

/// Maximum length of an MCP argument name.
pub const MAX_MCP_ARGNAME_LEN: usize = 30;

/// Line buffer size used when encoding outbound MCP messages.
pub const MCP_LINE_LEN: usize = 4096;

/// Mucker level granted to wizard-class players.
pub const MLEV_WIZARD: u8 = 4;

/// Runtime limits that an operator may tune without rebuilding.
///
/// Defaults mirror the values the engine has always shipped with; a zero in
/// any `*_limit`/`*_count` field means "unlimited".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Instructions run per timeslice for Foreground/Background programs.
    pub instr_slice: u64,

    /// Hard per-frame instruction cap for mucker levels 1 and 2.
    /// Level 2 programs get double this amount.
    pub max_instr_count: u64,

    /// Instruction cap for preempt-mode programs below wizard level.
    pub preempt_limit: u64,

    /// Instruction cap for preempt-mode programs at wizard level.
    pub max_ml4_preempt_count: u64,

    /// Maximum nesting of interpreter loops (`call` / `execute` re-entry).
    pub max_interp_nest_level: usize,

    /// Number of terminated frames kept pooled for reuse.
    pub free_frames_pool: usize,

    /// Maximum live timers per process.
    pub process_timer_limit: usize,

    /// Maximum breakpoints per frame.
    pub max_breakpoints: usize,

    /// Seconds a compiled program may sit unused before the idle reaper
    /// frees its instruction array.
    pub max_loaded_progs_age: u64,

    /// Maximum frames a single player may have queued at once.
    pub max_process_limit: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            instr_slice: 2000,
            max_instr_count: 20000,
            preempt_limit: 0,
            max_ml4_preempt_count: 0,
            max_interp_nest_level: 16,
            free_frames_pool: 8,
            process_timer_limit: 4,
            max_breakpoints: 16,
            max_loaded_progs_age: 600,
            max_process_limit: 32,
        }
    }
}

impl Tunables {
    /// Per-frame instruction cap for the given effective mucker level, or
    /// `None` when the level is uncapped.
    pub fn instr_cap_for_mlev(&self, mlev: u8) -> Option<u64> {
        match mlev {
            0 | 1 => Some(self.max_instr_count),
            2 => Some(self.max_instr_count * 2),
            _ => None,
        }
    }

    /// Preempt-mode instruction cap for the given effective mucker level.
    /// Zero means unlimited.
    pub fn preempt_cap_for_mlev(&self, mlev: u8) -> u64 {
        if mlev >= MLEV_WIZARD {
            self.max_ml4_preempt_count
        } else {
            self.preempt_limit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let t = Tunables::default();
        assert_eq!(t.instr_slice, 2000);
        assert_eq!(t.free_frames_pool, 8);
        assert_eq!(t.process_timer_limit, 4);
    }

    #[test]
    fn instr_cap_scales_for_level_two() {
        let t = Tunables::default();
        assert_eq!(t.instr_cap_for_mlev(1), Some(20000));
        assert_eq!(t.instr_cap_for_mlev(2), Some(40000));
        assert_eq!(t.instr_cap_for_mlev(3), None);
        assert_eq!(t.instr_cap_for_mlev(MLEV_WIZARD), None);
    }

    #[test]
    fn preempt_cap_distinguishes_wizards() {
        let t = Tunables {
            preempt_limit: 100,
            max_ml4_preempt_count: 0,
            ..Tunables::default()
        };
        assert_eq!(t.preempt_cap_for_mlev(3), 100);
        assert_eq!(t.preempt_cap_for_mlev(4), 0);
    }

    #[test]
    fn tunables_round_trip_through_json() {
        let t = Tunables::default();
        let text = serde_json::to_string(&t).unwrap();
        let back: Tunables = serde_json::from_str(&text).unwrap();
        assert_eq!(t, back);
    }
}
