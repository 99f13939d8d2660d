//! The `$define` table and the server-wide macro table.
//!
//! Defines live for one compile; macros are shared across the server and
//! persist through a three-line-per-record dump. Both are case-insensitive.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use muf_core::{Dbref, ObjectDb};

/// Per-compile `$define` expansions.
#[derive(Debug, Default)]
pub struct DefineTable {
    entries: HashMap<String, String>,
}

impl DefineTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a definition.
    pub fn insert(&mut self, name: &str, text: impl Into<String>) {
        self.entries.insert(name.to_ascii_lowercase(), text.into());
    }

    /// Adds an integer definition.
    pub fn insert_int(&mut self, name: &str, value: i64) {
        self.insert(name, value.to_string());
    }

    /// Removes a definition.
    pub fn remove(&mut self, name: &str) {
        self.entries.remove(&name.to_ascii_lowercase());
    }

    /// Looks up a definition.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// Whether the name is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Drops every definition.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Pulls every `_defs/` entry of `obj` into the table. Later sweeps
    /// override earlier ones, which is how an owner's defines shadow the
    /// global set.
    pub fn sweep_props(&mut self, db: &dyn ObjectDb, obj: Dbref) {
        for (name, value) in db.prop_dir_entries(obj, "_defs/") {
            self.insert(&name, value.as_str());
        }
    }
}

/// One stored macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    /// Replacement text.
    pub definition: String,
    /// Who installed it.
    pub implementor: Dbref,
}

/// The server-wide macro table, consulted for `.name` tokens.
#[derive(Debug, Default)]
pub struct MacroTable {
    entries: BTreeMap<String, Macro>,
}

impl MacroTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a macro.
    pub fn insert(&mut self, name: &str, definition: impl Into<String>, implementor: Dbref) {
        self.entries.insert(
            name.to_ascii_lowercase(),
            Macro {
                definition: definition.into(),
                implementor,
            },
        );
    }

    /// Removes a macro; returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(&name.to_ascii_lowercase()).is_some()
    }

    /// Looks up a macro's expansion text.
    pub fn expansion(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|m| m.definition.as_str())
    }

    /// Looks up a whole macro record.
    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    /// Number of stored macros.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the table in dump format: three lines per macro, alphabetical
    /// by name - name, definition, implementor object number.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (name, mac) in &self.entries {
            out.push_str(name);
            out.push('\n');
            out.push_str(&mac.definition);
            out.push('\n');
            out.push_str(&mac.implementor.0.to_string());
            out.push('\n');
        }
        out
    }

    /// Loads a table from dump format. Trailing garbage that does not form
    /// a complete record is ignored.
    pub fn load(text: &str) -> MacroTable {
        let mut table = MacroTable::new();
        let mut lines = text.lines();
        while let (Some(name), Some(definition), Some(implementor)) =
            (lines.next(), lines.next(), lines.next())
        {
            if name.is_empty() {
                continue;
            }
            let implementor = Dbref(implementor.trim().parse().unwrap_or(-1));
            table.insert(name, definition, implementor);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muf_core::{MemDb, PropValue};

    #[test]
    fn defines_are_case_insensitive() {
        let mut defs = DefineTable::new();
        defs.insert("GREET", "\"hello\"");
        assert_eq!(defs.get("greet"), Some("\"hello\""));
        assert!(defs.contains("Greet"));
        defs.remove("GREET");
        assert!(!defs.contains("greet"));
    }

    #[test]
    fn prop_sweep_shadows_earlier_entries() {
        let mut db = MemDb::new();
        let player = db.create_player("P");
        db.set_prop(Dbref(0), "_defs/x", PropValue::Str("global".into()));
        db.set_prop(player, "_defs/x", PropValue::Str("mine".into()));

        let mut defs = DefineTable::new();
        defs.sweep_props(&db, Dbref(0));
        defs.sweep_props(&db, player);
        assert_eq!(defs.get("x"), Some("mine"));
    }

    #[test]
    fn macro_dump_round_trips_alphabetically() {
        let mut table = MacroTable::new();
        table.insert("zulu", "pop pop", Dbref(3));
        table.insert("alpha", "me @ swap notify", Dbref(1));

        let dump = table.dump();
        let mut lines = dump.lines();
        assert_eq!(lines.next(), Some("alpha"));

        let back = MacroTable::load(&dump);
        assert_eq!(back.len(), 2);
        assert_eq!(back.expansion("ZULU"), Some("pop pop"));
        assert_eq!(back.get("alpha").unwrap().implementor, Dbref(1));
    }
}
