//! Database references and object flags.
//!
//! A [`Dbref`] is the opaque integer identity of an object in the surrounding
//! database. The engine never dereferences one directly; it goes through the
//! [`crate::db::ObjectDb`] accessors.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// An opaque reference to a database object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dbref(pub i32);

/// The invalid / "no object" reference.
pub const NOTHING: Dbref = Dbref(-1);

/// Returned by matchers when more than one object fits.
pub const AMBIGUOUS: Dbref = Dbref(-2);

/// The sentinel meaning "the player's home".
pub const HOME: Dbref = Dbref(-3);

impl Dbref {
    /// Returns true for any non-negative reference.
    ///
    /// This only checks the numeric range; whether the object actually
    /// exists is the database's call.
    pub fn is_valid_ref(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Dbref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for Dbref {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('#')
            .ok_or_else(|| CoreError::bad_dbref(s))?;
        digits
            .parse::<i32>()
            .map(Dbref)
            .map_err(|_| CoreError::bad_dbref(s))
    }
}

/// The database object types the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjType {
    Room,
    Thing,
    Exit,
    Player,
    Program,
    Garbage,
}

bitflags! {
    /// Object flag bits consumed by the engine.
    ///
    /// Several flags are overloaded per object type the way the server has
    /// always overloaded them; the aliases below name the program-specific
    /// meanings.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjFlags: u32 {
        const WIZARD     = 1 << 0;
        const LINK_OK    = 1 << 1;
        const DARK       = 1 << 2;
        const STICKY     = 1 << 3;
        const BUILDER    = 1 << 4;
        const HAVEN      = 1 << 5;
        const ABODE      = 1 << 6;
        const MUCKER     = 1 << 7;
        const SMUCKER    = 1 << 8;
        const INTERACTIVE = 1 << 9;
        const QUELL      = 1 << 10;
        const ZOMBIE     = 1 << 11;
        const VEHICLE    = 1 << 12;
    }
}

impl ObjFlags {
    /// On programs, ABODE marks the program for autostart after compile.
    pub const AUTOSTART: ObjFlags = ObjFlags::ABODE;

    /// On programs, STICKY means setuid execution.
    pub const SETUID: ObjFlags = ObjFlags::STICKY;

    /// On programs, HAVEN means harduid execution.
    pub const HARDUID: ObjFlags = ObjFlags::HAVEN;

    /// On programs, ZOMBIE turns on instruction-level debug tracing.
    pub const DEBUG_TRACE: ObjFlags = ObjFlags::ZOMBIE;

    /// On programs, DARK marks internal programs the reaper must skip.
    pub const INTERNAL: ObjFlags = ObjFlags::DARK;
}

/// Computes the mucker level (0..=4) granted by a flag set.
///
/// Wizard outranks the mucker bits unless quelled; MUCKER and SMUCKER
/// combine to level 3, alone they grant 2 and 1 respectively.
pub fn mucker_level(flags: ObjFlags) -> u8 {
    if flags.contains(ObjFlags::WIZARD) && !flags.contains(ObjFlags::QUELL) {
        return 4;
    }
    match (
        flags.contains(ObjFlags::MUCKER),
        flags.contains(ObjFlags::SMUCKER),
    ) {
        (true, true) => 3,
        (true, false) => 2,
        (false, true) => 1,
        (false, false) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dbref_display_and_parse() {
        assert_eq!(Dbref(42).to_string(), "#42");
        assert_eq!("#42".parse::<Dbref>().unwrap(), Dbref(42));
        assert_eq!("#-1".parse::<Dbref>().unwrap(), NOTHING);
        assert!("42".parse::<Dbref>().is_err());
        assert!("#4x".parse::<Dbref>().is_err());
    }

    #[test]
    fn mucker_levels_combine() {
        assert_eq!(mucker_level(ObjFlags::empty()), 0);
        assert_eq!(mucker_level(ObjFlags::SMUCKER), 1);
        assert_eq!(mucker_level(ObjFlags::MUCKER), 2);
        assert_eq!(mucker_level(ObjFlags::MUCKER | ObjFlags::SMUCKER), 3);
        assert_eq!(mucker_level(ObjFlags::WIZARD), 4);
        assert_eq!(mucker_level(ObjFlags::WIZARD | ObjFlags::QUELL), 0);
    }
}
