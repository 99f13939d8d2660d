//! The tagged runtime value.
//!
//! Everything the data stack, the variable slots and the instruction stream
//! carry is a [`Value`]. Strings are shared and immutable; arrays are shared
//! and mutable; addresses pin the program they point into. Cloning a value
//! bumps the relevant reference count and nothing else — a structural clone
//! is an explicit [`Value::deep_copy`].

use std::rc::Rc;

use crate::array::{self, MufArray};
use crate::dbref::{Dbref, NOTHING};
use crate::lock::Lock;
use crate::program::{AddressCell, FuncHeader};

/// A tagged runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Float(f64),
    Object(Dbref),
    /// Shared immutable string.
    Str(Rc<String>),
    /// Shared mutable container.
    Array(MufArray),
    /// First-class jumpable reference into a program.
    Addr(Rc<AddressCell>),
    /// Opaque boolean-expression tree; value-copied on duplication.
    Lock(Lock),
    /// Sentinel bracketing variadic stack operations.
    Mark,
    /// Function metadata; appears only at function-entry instructions.
    Func(Rc<FuncHeader>),
    /// Frame-scoped variable reference (ME, LOC, TRIGGER, COMMAND, and
    /// user `VAR`s).
    Var(usize),
    /// Function-scoped variable reference.
    SVar(usize),
    /// Program-local variable reference.
    LVar(usize),
    /// Debugging poison; any read of a cleared slot is a hard error.
    Cleared,
}

impl Value {
    /// Convenience constructor for shared strings.
    pub fn string<S: Into<String>>(s: S) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    /// The shared empty string.
    pub fn empty_string() -> Value {
        Value::Str(Rc::new(String::new()))
    }

    /// Type name used in diagnostics and type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Object(_) => "dbref",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Addr(_) => "address",
            Value::Lock(_) => "lock",
            Value::Mark => "mark",
            Value::Func(_) => "function",
            Value::Var(_) => "variable",
            Value::SVar(_) => "scoped variable",
            Value::LVar(_) => "local variable",
            Value::Cleared => "cleared",
        }
    }

    /// The truth test applied by conditional branches.
    ///
    /// False values: `0`, `0.0`, the empty string, the empty array, a mark,
    /// the unrestricted lock, and `#-1`.
    pub fn is_false(&self) -> bool {
        match self {
            Value::Int(0) => true,
            Value::Float(f) => *f == 0.0,
            Value::Str(s) => s.is_empty(),
            Value::Array(arr) => arr.borrow().is_empty(),
            Value::Mark => true,
            Value::Lock(lock) => lock.is_true_lock(),
            Value::Object(obj) => *obj == NOTHING,
            _ => false,
        }
    }

    /// Inverse of [`Value::is_false`].
    pub fn is_true(&self) -> bool {
        !self.is_false()
    }

    /// Structural clone: identity on scalars and strings, element-wise
    /// copy on arrays (descending into nested arrays).
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(arr) => Value::Array(array::deep_copy(arr)),
            other => other.clone(),
        }
    }

    /// Structural equality; arrays compare by content, everything else by
    /// payload. Int/float compare numerically across the two types.
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => array::structural_eq(a, b),
            (Value::Lock(a), Value::Lock(b)) => a == b,
            (Value::Mark, Value::Mark) => true,
            (Value::Addr(a), Value::Addr(b)) => {
                a.program == b.program && a.index == b.index
            }
            (Value::Var(a), Value::Var(b)) => a == b,
            (Value::SVar(a), Value::SVar(b)) => a == b,
            (Value::LVar(a), Value::LVar(b)) => a == b,
            _ => false,
        }
    }

    /// Renders the value the way the stack lister does.
    pub fn display_for_stack(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format!("{f:?}"),
            Value::Object(obj) => obj.to_string(),
            Value::Str(s) => format!("\"{s}\""),
            Value::Array(arr) => {
                let data = arr.borrow();
                if data.is_list() {
                    format!("{}{{...}}", data.len())
                } else {
                    format!("{}[...]", data.len())
                }
            }
            Value::Addr(cell) => format!("'{}'{}", cell.program, cell.index),
            Value::Lock(lock) => format!("[{lock}]"),
            Value::Mark => "{".to_string(),
            Value::Func(header) => format!("'{}", header.name),
            Value::Var(n) => format!("V{n}"),
            Value::SVar(n) => format!("SV{n}"),
            Value::LVar(n) => format!("LV{n}"),
            Value::Cleared => "?CLEARED?".to_string(),
        }
    }
}

/// PartialEq delegates to structural equality so tests and dictionaries can
/// compare values directly.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::new_list;

    #[test]
    fn falsiness() {
        assert!(Value::Int(0).is_false());
        assert!(Value::Float(0.0).is_false());
        assert!(Value::string("").is_false());
        assert!(Value::Array(new_list(vec![])).is_false());
        assert!(Value::Mark.is_false());
        assert!(Value::Lock(Lock::True).is_false());
        assert!(Value::Object(NOTHING).is_false());

        assert!(Value::Int(-1).is_true());
        assert!(Value::string("x").is_true());
        assert!(Value::Object(Dbref(0)).is_true());
    }

    #[test]
    fn numeric_cross_type_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Float(2.5));
    }

    #[test]
    fn deep_copy_detaches_arrays() {
        let arr = new_list(vec![Value::Int(1)]);
        let original = Value::Array(arr.clone());
        let copy = original.deep_copy();
        arr.borrow_mut().push(Value::Int(2)).unwrap();
        match copy {
            Value::Array(c) => assert_eq!(c.borrow().len(), 1),
            _ => unreachable!(),
        }
    }

    #[test]
    fn string_clone_shares_storage() {
        let a = Value::string("hello");
        let b = a.clone();
        match (&a, &b) {
            (Value::Str(x), Value::Str(y)) => assert!(Rc::ptr_eq(x, y)),
            _ => unreachable!(),
        }
    }
}
