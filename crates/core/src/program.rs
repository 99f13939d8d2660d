//! Compiled program records, publics, function headers and address cells.

use std::rc::Rc;

use crate::dbref::Dbref;
use crate::instr::Instr;

/// Pin token deriving a program's instance count.
///
/// Every executing frame and every live address cell holds a clone; the
/// number of outstanding clones is the instance count, and a positive count
/// keeps the program's instruction array resident.
#[derive(Debug, Clone)]
pub struct ProgramPin(Rc<()>);

impl ProgramPin {
    /// Creates the program's own token. The program's copy is not counted
    /// as an instance.
    pub fn new() -> Self {
        ProgramPin(Rc::new(()))
    }

    /// Number of holders beyond the program itself.
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.0) - 1
    }
}

impl Default for ProgramPin {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata attached to a function-entry instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncHeader {
    /// Procedure name as written in the source.
    pub name: String,

    /// Total scoped-variable slots the function declares (arguments
    /// included).
    pub vars: usize,

    /// How many of those slots are filled from the stack at entry.
    pub args: usize,

    /// Declared names, index order; used by the debugger.
    pub var_names: Vec<String>,
}

/// One externally callable entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicEntry {
    /// Exported name matched by cross-program `call`.
    pub name: String,

    /// Entry instruction index. During compilation this is an address-table
    /// slot; the packer rewrites it to the final index.
    pub entry: usize,

    /// Minimum mucker level a caller must hold.
    pub mlev: u8,
}

/// A first-class jumpable reference into a program's instruction array.
///
/// The cell is owned separately from the program (addresses into a program
/// may outlive a recompile attempt); `version` detects cells minted against
/// an instruction array that has since been replaced.
#[derive(Debug)]
pub struct AddressCell {
    /// Program the address points into.
    pub program: Dbref,

    /// Final instruction index.
    pub index: usize,

    /// The instruction-array generation this cell was minted against.
    pub version: u64,

    /// Keeps the target program resident while the cell lives.
    pub pin: ProgramPin,
}

/// A compiled program.
#[derive(Debug)]
pub struct Program {
    /// The program object this code belongs to.
    pub dbref: Dbref,

    /// Packed instruction array.
    pub instructions: Vec<Instr>,

    /// Index the interpreter starts at.
    pub start: usize,

    /// Externally callable entries, declaration order.
    pub publics: Vec<PublicEntry>,

    /// Bumped every time the instruction array is replaced; stale address
    /// cells are detected against it.
    pub version: u64,

    /// Instance-count pin; see [`ProgramPin`].
    pub pin: ProgramPin,

    /// Number of completed runs.
    pub use_count: u64,

    /// Accumulated run time attributed to this program, in microseconds.
    pub profile_usecs: u64,

    /// Instructions executed on this program's behalf.
    pub instruction_total: u64,

    /// Wall-clock seconds when profiling counters were last reset.
    pub profile_started: u64,

    /// Wall-clock seconds when the program was last run or compiled; the
    /// idle reaper compares against it.
    pub last_used: u64,
}

impl Program {
    /// Creates an empty program shell for the packer to fill.
    pub fn new(dbref: Dbref) -> Self {
        Program {
            dbref,
            instructions: Vec::new(),
            start: 0,
            publics: Vec::new(),
            version: 0,
            pin: ProgramPin::new(),
            use_count: 0,
            profile_usecs: 0,
            instruction_total: 0,
            profile_started: 0,
            last_used: 0,
        }
    }

    /// Live references pinning this program (frames plus address cells).
    pub fn instance_count(&self) -> usize {
        self.pin.holders()
    }

    /// Looks up a public entry by name, case-insensitively.
    pub fn find_public(&self, name: &str) -> Option<&PublicEntry> {
        self.publics
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Mints an address cell pointing at `index`.
    pub fn make_address(&self, index: usize) -> Rc<AddressCell> {
        Rc::new(AddressCell {
            program: self.dbref,
            index,
            version: self.version,
            pin: self.pin.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_counts_holders() {
        let prog = Program::new(Dbref(10));
        assert_eq!(prog.instance_count(), 0);

        let addr = prog.make_address(0);
        assert_eq!(prog.instance_count(), 1);

        let extra = prog.pin.clone();
        assert_eq!(prog.instance_count(), 2);

        drop(addr);
        drop(extra);
        assert_eq!(prog.instance_count(), 0);
    }

    #[test]
    fn public_lookup_ignores_case() {
        let mut prog = Program::new(Dbref(1));
        prog.publics.push(PublicEntry {
            name: "DoThing".into(),
            entry: 5,
            mlev: 1,
        });
        assert!(prog.find_public("dothing").is_some());
        assert!(prog.find_public("missing").is_none());
    }
}
