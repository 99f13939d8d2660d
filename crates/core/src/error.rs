//! Error types for the core crate.

use thiserror::Error;

/// Errors raised by the shared data model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A string could not be parsed as a dbref.
    #[error("Invalid object reference: {text}")]
    BadDbref { text: String },

    /// An operation was applied to a value of the wrong type.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// An index fell outside a container's bounds.
    #[error("Index out of bounds: {index} not in 0..{len}")]
    IndexOutOfBounds { index: i64, len: usize },

    /// A dictionary lookup missed.
    #[error("Key not found in dictionary")]
    KeyNotFound,

    /// A value that cannot key a dictionary was used as one.
    #[error("Invalid dictionary key type: {actual}")]
    BadKeyType { actual: &'static str },

    /// A cleared (poisoned) value was read.
    #[error("Cleared value accessed")]
    ClearedValue,
}

impl CoreError {
    /// Creates a new bad-dbref error.
    pub fn bad_dbref<S: Into<String>>(text: S) -> Self {
        Self::BadDbref { text: text.into() }
    }

    /// Creates a new type-mismatch error.
    pub fn type_mismatch(expected: &'static str, actual: &'static str) -> Self {
        Self::TypeMismatch { expected, actual }
    }

    /// Creates a new index-out-of-bounds error.
    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::IndexOutOfBounds { index, len }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
