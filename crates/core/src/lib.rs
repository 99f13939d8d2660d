//! # MUF Core
//!
//! Shared data model for the MUF engine: database references, object flags,
//! the tagged runtime value, shared arrays, the instruction and program
//! records, the primitive registry, and the typed accessor traits through
//! which the engine reaches the surrounding object database and descriptor
//! layer.
//!
//! The compiler (`muf-compiler`) produces [`Program`]s out of these types and
//! the interpreter (`muf-vm`) executes them; neither crate defines its own
//! copy of the value model.

pub mod array;
pub mod db;
pub mod dbref;
pub mod error;
pub mod instr;
pub mod lock;
pub mod prims;
pub mod program;
pub mod value;

pub use array::{ArrayData, ArrayKey, ArrayKind, MufArray};
pub use db::{MemDb, ObjectDb, Outbound, PropValue, RecordedOutput};
pub use dbref::{Dbref, ObjType, AMBIGUOUS, HOME, NOTHING};
pub use error::{CoreError, CoreResult};
pub use instr::{Instr, Op};
pub use lock::Lock;
pub use prims::Prim;
pub use program::{AddressCell, FuncHeader, Program, ProgramPin, PublicEntry};
pub use value::Value;

pub use dbref::{mucker_level, ObjFlags};
