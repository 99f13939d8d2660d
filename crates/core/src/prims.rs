//! The primitive registry.
//!
//! The compiler resolves words to primitive ids through this table and the
//! interpreter indexes its dispatch table by the same ids, so the registry
//! lives here where both crates can see it. Internal primitives are emitted
//! only by control-structure compilation and never match a source word.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// A primitive id.
///
/// Discriminants start at 1 and are dense; the interpreter's dispatch table
/// is indexed by `id - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Prim {
    // Stack manipulation
    Pop = 1,
    PopN,
    Dup,
    Over,
    Pick,
    Put,
    Swap,
    Rot,
    RRot,
    Rotate,
    Nip,
    Tuck,
    Depth,
    FullDepth,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Inc,
    Dec,
    Abs,
    Sign,

    // Comparison and logic
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    Not,
    And,
    Or,
    Xor,

    // Strings
    StrCmp,
    StringCmp,
    StrCat,
    StrLen,
    IntoStr,
    Atoi,

    // Variables
    At,
    Bang,
    Variable,
    LocalVar,

    // Arrays
    MarkStart,
    MarkCount,
    ArrayMake,
    ArrayMakeDict,
    ArrayCount,
    ArrayGetItem,
    ArraySetItem,
    ArrayAppendItem,

    // I/O
    Notify,
    Tell,
    Read,

    // Process control
    Sleep,
    Fork,
    Pid,
    IsPid,
    Kill,
    Preempt,
    Foreground,
    Background,
    Execute,
    Call,
    CanCallP,
    Abort,
    AbortSilent,

    // Events and timers
    EventCount,
    EventExists,
    EventSend,
    EventWaitFor,
    WatchPid,
    TimerStart,
    TimerStop,

    // Debugger
    DebugOn,
    DebugOff,
    DebugLine,
    DebuggerBreak,

    // Miscellaneous
    Random,
    SysTime,
    Version,

    // Internal: emitted by control-structure compilation only
    For,
    Foreach,
    ForIter,
    ForPop,
    TryPop,
    Catch,
    CatchDetailed,
}

struct PrimDef {
    prim: Prim,
    name: &'static str,
    internal: bool,
}

macro_rules! defs {
    ($($prim:ident => $name:literal $(, $internal:ident)?;)*) => {
        &[$(PrimDef {
            prim: Prim::$prim,
            name: $name,
            internal: defs!(@flag $($internal)?),
        },)*]
    };
    (@flag internal) => { true };
    (@flag) => { false };
}

/// Definition table, discriminant order.
static DEFS: &[PrimDef] = defs! {
    Pop => "pop";
    PopN => "popn";
    Dup => "dup";
    Over => "over";
    Pick => "pick";
    Put => "put";
    Swap => "swap";
    Rot => "rot";
    RRot => "-rot";
    Rotate => "rotate";
    Nip => "nip";
    Tuck => "tuck";
    Depth => "depth";
    FullDepth => "fulldepth";
    Add => "+";
    Sub => "-";
    Mul => "*";
    Div => "/";
    Mod => "%";
    Inc => "++";
    Dec => "--";
    Abs => "abs";
    Sign => "sign";
    Eq => "=";
    Lt => "<";
    Gt => ">";
    Le => "<=";
    Ge => ">=";
    Ne => "!=";
    Not => "not";
    And => "and";
    Or => "or";
    Xor => "xor";
    StrCmp => "strcmp";
    StringCmp => "stringcmp";
    StrCat => "strcat";
    StrLen => "strlen";
    IntoStr => "intostr";
    Atoi => "atoi";
    At => "@";
    Bang => "!";
    Variable => "variable";
    LocalVar => "localvar";
    MarkStart => "{";
    MarkCount => "}";
    ArrayMake => "array_make";
    ArrayMakeDict => "array_make_dict";
    ArrayCount => "array_count";
    ArrayGetItem => "array_getitem";
    ArraySetItem => "array_setitem";
    ArrayAppendItem => "array_appenditem";
    Notify => "notify";
    Tell => "tell";
    Read => "read";
    Sleep => "sleep";
    Fork => "fork";
    Pid => "pid";
    IsPid => "ispid?";
    Kill => "kill";
    Preempt => "preempt";
    Foreground => "foreground";
    Background => "background";
    Execute => "execute";
    Call => "call";
    CanCallP => "cancallp";
    Abort => "abort";
    AbortSilent => "abort_silent";
    EventCount => "event_count";
    EventExists => "event_exists";
    EventSend => "event_send";
    EventWaitFor => "event_waitfor";
    WatchPid => "watchpid";
    TimerStart => "timer_start";
    TimerStop => "timer_stop";
    DebugOn => "debug_on";
    DebugOff => "debug_off";
    DebugLine => "debug_line";
    DebuggerBreak => "debugger_break";
    Random => "random";
    SysTime => "systime";
    Version => "version";
    For => "for", internal;
    Foreach => "foreach", internal;
    ForIter => "foriter", internal;
    ForPop => "forpop", internal;
    TryPop => "trypop", internal;
    Catch => "catch", internal;
    CatchDetailed => "catch_detailed", internal;
};

static BY_NAME: Lazy<HashMap<&'static str, Prim>> = Lazy::new(|| {
    DEFS.iter()
        .filter(|def| !def.internal)
        .map(|def| (def.name, def.prim))
        .collect()
});

impl Prim {
    /// Total number of registered primitives.
    pub fn count() -> usize {
        DEFS.len()
    }

    /// The primitive's id (1-based, dense).
    pub fn id(self) -> u16 {
        self as u16
    }

    /// The primitive for a given id.
    pub fn from_id(id: u16) -> Option<Prim> {
        DEFS.get(id.checked_sub(1)? as usize).map(|def| def.prim)
    }

    /// The source spelling.
    pub fn name(self) -> &'static str {
        DEFS[self as usize - 1].name
    }

    /// Whether the primitive is compiler-internal.
    pub fn is_internal(self) -> bool {
        DEFS[self as usize - 1].internal
    }

    /// Resolves a source word to a primitive, case-insensitively. Internal
    /// primitives never match.
    pub fn lookup(word: &str) -> Option<Prim> {
        if let Some(prim) = BY_NAME.get(word) {
            return Some(*prim);
        }
        let lowered = word.to_ascii_lowercase();
        BY_NAME.get(lowered.as_str()).copied()
    }

    /// FOR and FOREACH open a loop record that FORITER advances.
    pub fn is_for_opener(self) -> bool {
        matches!(self, Prim::For | Prim::Foreach)
    }
}
