//! Typed accessors onto the surrounding object database.
//!
//! The engine does not own the database; it consumes it through [`ObjectDb`]
//! and writes player/descriptor output through [`Outbound`]. [`MemDb`] is the
//! in-memory implementation used by the lifecycle glue's tests and by any
//! embedder that does not bring its own store.

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::dbref::{mucker_level, Dbref, ObjFlags, ObjType, NOTHING};
use crate::lock::Lock;

/// A property value stored on an object.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Str(String),
    Int(i32),
    Ref(Dbref),
    Lock(Lock),
}

impl PropValue {
    /// The string rendering used when a string is expected.
    pub fn as_str(&self) -> String {
        match self {
            PropValue::Str(s) => s.clone(),
            PropValue::Int(n) => n.to_string(),
            PropValue::Ref(obj) => obj.to_string(),
            PropValue::Lock(lock) => lock.to_string(),
        }
    }
}

/// The typed accessor surface of the object database.
pub trait ObjectDb {
    /// Whether the reference names a live object.
    fn valid(&self, obj: Dbref) -> bool;

    /// Object name.
    fn name(&self, obj: Dbref) -> String;

    /// Object owner.
    fn owner(&self, obj: Dbref) -> Dbref;

    /// Object type.
    fn obj_type(&self, obj: Dbref) -> ObjType;

    /// Flag set.
    fn flags(&self, obj: Dbref) -> ObjFlags;

    /// Replaces the flag set.
    fn set_flags(&mut self, obj: Dbref, flags: ObjFlags);

    /// Object location.
    fn location(&self, obj: Dbref) -> Dbref;

    /// Whether `who` controls `what` (owner, or wizard).
    fn controls(&self, who: Dbref, what: Dbref) -> bool {
        if !self.valid(who) || !self.valid(what) {
            return false;
        }
        self.owner(what) == self.owner(who) || self.flags(who).contains(ObjFlags::WIZARD)
    }

    /// Program source text, one entry per line.
    fn program_source(&self, prog: Dbref) -> Option<Vec<String>>;

    /// Replaces a program's source text.
    fn set_program_source(&mut self, prog: Dbref, lines: Vec<String>);

    /// Reads a property.
    fn get_prop(&self, obj: Dbref, name: &str) -> Option<PropValue>;

    /// Writes a property.
    fn set_prop(&mut self, obj: Dbref, name: &str, value: PropValue);

    /// Removes a property.
    fn remove_prop(&mut self, obj: Dbref, name: &str);

    /// Lists the immediate entries under a property directory, sorted by
    /// name. `dir` is given with its trailing slash.
    fn prop_dir_entries(&self, obj: Dbref, dir: &str) -> Vec<(String, PropValue)>;

    /// Effective mucker level of an object.
    fn mlevel(&self, obj: Dbref) -> u8 {
        if !self.valid(obj) {
            return 0;
        }
        mucker_level(self.flags(obj))
    }
}

/// The descriptor/output layer the interpreter and the MCP framer write to.
pub trait Outbound {
    /// Sends a line to a player.
    fn notify(&mut self, player: Dbref, message: &str);

    /// Queues a raw line on a descriptor's write queue.
    fn queue_descr_line(&mut self, descr: i32, line: &str);
}

/// Collects output in memory; the test double for [`Outbound`].
#[derive(Debug, Default)]
pub struct RecordedOutput {
    /// `(player, message)` pairs in send order.
    pub notifies: Vec<(Dbref, String)>,
    /// `(descr, line)` pairs in send order.
    pub descr_lines: Vec<(i32, String)>,
}

impl Outbound for RecordedOutput {
    fn notify(&mut self, player: Dbref, message: &str) {
        self.notifies.push((player, message.to_string()));
    }

    fn queue_descr_line(&mut self, descr: i32, line: &str) {
        self.descr_lines.push((descr, line.to_string()));
    }
}

#[derive(Debug, Clone)]
struct MemObject {
    name: String,
    owner: Dbref,
    ty: ObjType,
    flags: ObjFlags,
    location: Dbref,
    source: Option<Vec<String>>,
    props: BTreeMap<String, PropValue>,
}

/// In-memory [`ObjectDb`].
#[derive(Debug, Default)]
pub struct MemDb {
    objects: HashMap<Dbref, MemObject>,
    next_ref: i32,
}

impl MemDb {
    /// Creates an empty database with object #0 (the global environment
    /// room) already present.
    pub fn new() -> Self {
        let mut db = MemDb {
            objects: HashMap::new(),
            next_ref: 0,
        };
        db.create(ObjType::Room, "Room Zero", NOTHING);
        db
    }

    /// Creates an object and returns its reference.
    pub fn create(&mut self, ty: ObjType, name: &str, owner: Dbref) -> Dbref {
        let obj = Dbref(self.next_ref);
        self.next_ref += 1;
        let owner = if owner == NOTHING { obj } else { owner };
        self.objects.insert(
            obj,
            MemObject {
                name: name.to_string(),
                owner,
                ty,
                flags: ObjFlags::empty(),
                location: Dbref(0),
                source: None,
                props: BTreeMap::new(),
            },
        );
        obj
    }

    /// Creates a player.
    pub fn create_player(&mut self, name: &str) -> Dbref {
        self.create(ObjType::Player, name, NOTHING)
    }

    /// Creates a program owned by `owner`.
    pub fn create_program(&mut self, name: &str, owner: Dbref) -> Dbref {
        self.create(ObjType::Program, name, owner)
    }

    /// Adds flags to an object.
    pub fn add_flags(&mut self, obj: Dbref, flags: ObjFlags) {
        if let Some(object) = self.objects.get_mut(&obj) {
            object.flags |= flags;
        }
    }
}

impl ObjectDb for MemDb {
    fn valid(&self, obj: Dbref) -> bool {
        self.objects.contains_key(&obj)
    }

    fn name(&self, obj: Dbref) -> String {
        self.objects
            .get(&obj)
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "*INVALID*".to_string())
    }

    fn owner(&self, obj: Dbref) -> Dbref {
        self.objects.get(&obj).map(|o| o.owner).unwrap_or(NOTHING)
    }

    fn obj_type(&self, obj: Dbref) -> ObjType {
        self.objects
            .get(&obj)
            .map(|o| o.ty)
            .unwrap_or(ObjType::Garbage)
    }

    fn flags(&self, obj: Dbref) -> ObjFlags {
        self.objects
            .get(&obj)
            .map(|o| o.flags)
            .unwrap_or_else(ObjFlags::empty)
    }

    fn set_flags(&mut self, obj: Dbref, flags: ObjFlags) {
        if let Some(object) = self.objects.get_mut(&obj) {
            object.flags = flags;
        }
    }

    fn location(&self, obj: Dbref) -> Dbref {
        self.objects
            .get(&obj)
            .map(|o| o.location)
            .unwrap_or(NOTHING)
    }

    fn program_source(&self, prog: Dbref) -> Option<Vec<String>> {
        self.objects.get(&prog).and_then(|o| o.source.clone())
    }

    fn set_program_source(&mut self, prog: Dbref, lines: Vec<String>) {
        if let Some(object) = self.objects.get_mut(&prog) {
            object.source = Some(lines);
        }
    }

    fn get_prop(&self, obj: Dbref, name: &str) -> Option<PropValue> {
        self.objects.get(&obj).and_then(|o| o.props.get(name).cloned())
    }

    fn set_prop(&mut self, obj: Dbref, name: &str, value: PropValue) {
        if let Some(object) = self.objects.get_mut(&obj) {
            object.props.insert(name.to_string(), value);
        }
    }

    fn remove_prop(&mut self, obj: Dbref, name: &str) {
        if let Some(object) = self.objects.get_mut(&obj) {
            object.props.remove(name);
        }
    }

    fn prop_dir_entries(&self, obj: Dbref, dir: &str) -> Vec<(String, PropValue)> {
        let Some(object) = self.objects.get(&obj) else {
            return Vec::new();
        };
        object
            .props
            .range(dir.to_string()..)
            .take_while(|(name, _)| name.starts_with(dir))
            .filter(|(name, _)| !name[dir.len()..].contains('/'))
            .map(|(name, value)| (name[dir.len()..].to_string(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_look_up() {
        let mut db = MemDb::new();
        let player = db.create_player("Ember");
        let prog = db.create_program("test.muf", player);

        assert!(db.valid(prog));
        assert_eq!(db.owner(prog), player);
        assert_eq!(db.obj_type(prog), ObjType::Program);
        assert_eq!(db.name(prog), "test.muf");
        assert!(!db.valid(Dbref(99)));
    }

    #[test]
    fn controls_respects_ownership_and_wizards() {
        let mut db = MemDb::new();
        let alice = db.create_player("Alice");
        let bob = db.create_player("Bob");
        let prog = db.create_program("x.muf", alice);

        assert!(db.controls(alice, prog));
        assert!(!db.controls(bob, prog));

        db.add_flags(bob, ObjFlags::WIZARD);
        assert!(db.controls(bob, prog));
    }

    #[test]
    fn prop_dir_listing_is_shallow() {
        let mut db = MemDb::new();
        let obj = Dbref(0);
        db.set_prop(obj, "_defs/alpha", PropValue::Str("1".into()));
        db.set_prop(obj, "_defs/beta", PropValue::Str("2".into()));
        db.set_prop(obj, "_defs/sub/deep", PropValue::Str("3".into()));
        db.set_prop(obj, "_other", PropValue::Str("4".into()));

        let entries = db.prop_dir_entries(obj, "_defs/");
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }
}
