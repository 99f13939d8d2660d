//! Shared, mutable runtime containers.
//!
//! A [`MufArray`] is a reference-counted handle to either a packed list or an
//! insertion-ordered dictionary. Cloning the handle shares the storage;
//! [`MufArray::deep_copy`] produces an independent structural clone (forks
//! and cross-frame event payloads go through it).

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::dbref::Dbref;
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// Shared handle to a runtime container.
pub type MufArray = Rc<RefCell<ArrayData>>;

/// The backing storage of one array handle.
#[derive(Debug, Clone)]
pub struct ArrayData {
    /// A pinned array is exempt from active-list cleanup when the owning
    /// frame terminates; used for arrays stored in long-lived places.
    pub pinned: bool,

    /// List or dictionary payload.
    pub kind: ArrayKind,
}

/// The two container shapes.
#[derive(Debug, Clone)]
pub enum ArrayKind {
    /// Ordered sequence addressable by index `0..n-1`.
    List(Vec<Value>),

    /// Mapping with structural key comparison; iteration follows insertion
    /// order.
    Dict(IndexMap<ArrayKey, Value>),
}

/// A dictionary key.
///
/// Keys compare structurally; floats key by bit pattern so the set stays
/// `Eq + Hash`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i32),
    Str(String),
    Object(Dbref),
    FloatBits(u64),
}

impl ArrayKey {
    /// Converts a stack value into a key, if the value's type can key a
    /// dictionary.
    pub fn from_value(value: &Value) -> CoreResult<ArrayKey> {
        match value {
            Value::Int(n) => Ok(ArrayKey::Int(*n)),
            Value::Str(s) => Ok(ArrayKey::Str(s.as_ref().clone())),
            Value::Object(obj) => Ok(ArrayKey::Object(*obj)),
            Value::Float(f) => Ok(ArrayKey::FloatBits(f.to_bits())),
            other => Err(CoreError::BadKeyType {
                actual: other.type_name(),
            }),
        }
    }

    /// Converts the key back into a stack value.
    pub fn to_value(&self) -> Value {
        match self {
            ArrayKey::Int(n) => Value::Int(*n),
            ArrayKey::Str(s) => Value::string(s.clone()),
            ArrayKey::Object(obj) => Value::Object(*obj),
            ArrayKey::FloatBits(bits) => Value::Float(f64::from_bits(*bits)),
        }
    }
}

/// Creates a new shared packed list.
pub fn new_list(items: Vec<Value>) -> MufArray {
    Rc::new(RefCell::new(ArrayData {
        pinned: false,
        kind: ArrayKind::List(items),
    }))
}

/// Creates a new shared dictionary.
pub fn new_dict(entries: IndexMap<ArrayKey, Value>) -> MufArray {
    Rc::new(RefCell::new(ArrayData {
        pinned: false,
        kind: ArrayKind::Dict(entries),
    }))
}

impl ArrayData {
    /// Number of elements or entries.
    pub fn len(&self) -> usize {
        match &self.kind {
            ArrayKind::List(items) => items.len(),
            ArrayKind::Dict(entries) => entries.len(),
        }
    }

    /// True when the container holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the container is a packed list.
    pub fn is_list(&self) -> bool {
        matches!(self.kind, ArrayKind::List(_))
    }

    /// Fetches by key; integer keys index lists, any key type reads
    /// dictionaries.
    pub fn get(&self, key: &ArrayKey) -> CoreResult<Value> {
        match (&self.kind, key) {
            (ArrayKind::List(items), ArrayKey::Int(n)) => {
                let index = *n;
                if index < 0 || index as usize >= items.len() {
                    return Err(CoreError::index_out_of_bounds(index as i64, items.len()));
                }
                Ok(items[index as usize].clone())
            }
            (ArrayKind::List(_), _) => Err(CoreError::BadKeyType {
                actual: "non-integer",
            }),
            (ArrayKind::Dict(entries), key) => {
                entries.get(key).cloned().ok_or(CoreError::KeyNotFound)
            }
        }
    }

    /// Stores by key. On lists the index must lie in `0..=len` (storing at
    /// `len` appends); on dictionaries any key type inserts or replaces.
    pub fn set(&mut self, key: ArrayKey, value: Value) -> CoreResult<()> {
        match (&mut self.kind, key) {
            (ArrayKind::List(items), ArrayKey::Int(n)) => {
                let index = n;
                if index < 0 || index as usize > items.len() {
                    return Err(CoreError::index_out_of_bounds(index as i64, items.len()));
                }
                if index as usize == items.len() {
                    items.push(value);
                } else {
                    items[index as usize] = value;
                }
                Ok(())
            }
            (ArrayKind::List(_), _) => Err(CoreError::BadKeyType {
                actual: "non-integer",
            }),
            (ArrayKind::Dict(entries), key) => {
                entries.insert(key, value);
                Ok(())
            }
        }
    }

    /// Appends to a packed list.
    pub fn push(&mut self, value: Value) -> CoreResult<()> {
        match &mut self.kind {
            ArrayKind::List(items) => {
                items.push(value);
                Ok(())
            }
            ArrayKind::Dict(_) => Err(CoreError::type_mismatch("list array", "dictionary")),
        }
    }

    /// True when every element of a packed list has the given type name.
    /// Dictionaries are never homogeneous for this purpose.
    pub fn is_homogeneous(&self, type_name: &str) -> bool {
        match &self.kind {
            ArrayKind::List(items) => items.iter().all(|v| v.type_name() == type_name),
            ArrayKind::Dict(_) => false,
        }
    }

    /// Iterates `(key, value)` pairs in order; list keys are their indices.
    pub fn entries(&self) -> Vec<(ArrayKey, Value)> {
        match &self.kind {
            ArrayKind::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (ArrayKey::Int(i as i32), v.clone()))
                .collect(),
            ArrayKind::Dict(entries) => entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Structurally clones an array handle, descending into nested arrays.
pub fn deep_copy(array: &MufArray) -> MufArray {
    let data = array.borrow();
    let kind = match &data.kind {
        ArrayKind::List(items) => ArrayKind::List(items.iter().map(Value::deep_copy).collect()),
        ArrayKind::Dict(entries) => ArrayKind::Dict(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_copy()))
                .collect(),
        ),
    };
    Rc::new(RefCell::new(ArrayData {
        pinned: data.pinned,
        kind,
    }))
}

/// Structural equality between two array handles.
pub fn structural_eq(a: &MufArray, b: &MufArray) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    let (a, b) = (a.borrow(), b.borrow());
    match (&a.kind, &b.kind) {
        (ArrayKind::List(x), ArrayKind::List(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| l.structural_eq(r))
        }
        (ArrayKind::Dict(x), ArrayKind::Dict(y)) => {
            x.len() == y.len()
                && x.iter().zip(y.iter()).all(|((ka, va), (kb, vb))| {
                    ka == kb && va.structural_eq(vb)
                })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_indexing() {
        let arr = new_list(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(arr.borrow().get(&ArrayKey::Int(1)).unwrap(), Value::Int(2));
        assert!(arr.borrow().get(&ArrayKey::Int(2)).is_err());
        assert!(arr.borrow().get(&ArrayKey::Int(-1)).is_err());

        // storing at len appends
        arr.borrow_mut().set(ArrayKey::Int(2), Value::Int(3)).unwrap();
        assert_eq!(arr.borrow().len(), 3);
    }

    #[test]
    fn dict_preserves_insertion_order() {
        let arr = new_dict(IndexMap::new());
        arr.borrow_mut()
            .set(ArrayKey::Str("b".into()), Value::Int(1))
            .unwrap();
        arr.borrow_mut()
            .set(ArrayKey::Str("a".into()), Value::Int(2))
            .unwrap();
        let keys: Vec<_> = arr.borrow().entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![ArrayKey::Str("b".into()), ArrayKey::Str("a".into())]
        );
    }

    #[test]
    fn deep_copy_is_independent() {
        let inner = new_list(vec![Value::Int(9)]);
        let arr = new_list(vec![Value::Array(inner.clone()), Value::Int(1)]);
        let copy = deep_copy(&arr);
        assert!(structural_eq(&arr, &copy));

        inner.borrow_mut().push(Value::Int(10)).unwrap();
        assert!(!structural_eq(&arr, &copy));
    }

    #[test]
    fn shared_handles_alias() {
        let arr = new_list(vec![]);
        let alias = arr.clone();
        alias.borrow_mut().push(Value::Int(5)).unwrap();
        assert_eq!(arr.borrow().len(), 1);
    }
}
