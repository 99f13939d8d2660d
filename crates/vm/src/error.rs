//! Runtime error types.
//!
//! Most runtime errors are *catchable*: the interpreter routes them to the
//! innermost try handler when one is armed. Internal errors bypass try
//! blocks entirely and terminate the frame.

use muf_core::Dbref;
use thiserror::Error;

/// Errors raised while a frame executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VmError {
    /// Too few values on the data stack.
    #[error("Stack underflow.")]
    StackUnderflow,

    /// The data stack hit its configured capacity.
    #[error("Stack Overflow!")]
    StackOverflow,

    /// Popping would reach below an armed try's protected depth.
    #[error("Stack protection fault.")]
    StackProtection,

    /// A value had the wrong type for the instruction.
    #[error("{message}")]
    Type { message: String },

    /// An index or address fell outside its valid range.
    #[error("{message}")]
    Bounds { message: String },

    /// Division or modulus by zero.
    #[error("Division by zero attempted.")]
    DivideByZero,

    /// `INT_MIN / -1` style overflow.
    #[error("Integer overflow.")]
    IntegerOverflow,

    /// The caller lacks the required permission level.
    #[error("{message}")]
    Permission { message: String },

    /// A configured resource bound was exceeded.
    #[error("{message}")]
    Resource { message: String },

    /// A dbref named nothing usable.
    #[error("Invalid object reference ({obj}).")]
    InvalidObject { obj: Dbref },

    /// Miscellaneous environmental problem (wrong object type, dead
    /// object, missing program text).
    #[error("{message}")]
    Environment { message: String },

    /// `abort` and other program-raised errors.
    #[error("{message}")]
    Aborted { message: String },

    /// Hard limits that terminate the frame even inside a try block.
    #[error("{message}")]
    Fatal { message: String },

    /// Interpreter faults: cleared instructions, unknown instruction
    /// types. Never catchable.
    #[error("Program internal error. {message}")]
    Internal { message: String },
}

impl VmError {
    /// Creates a type error.
    pub fn type_error<S: Into<String>>(message: S) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    /// Creates a bounds error.
    pub fn bounds<S: Into<String>>(message: S) -> Self {
        Self::Bounds {
            message: message.into(),
        }
    }

    /// Creates a permission error.
    pub fn permission<S: Into<String>>(message: S) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    /// Creates a resource error.
    pub fn resource<S: Into<String>>(message: S) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Creates an environment error.
    pub fn environment<S: Into<String>>(message: S) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }

    /// Creates a program-raised abort.
    pub fn aborted<S: Into<String>>(message: S) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Creates an internal fault.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a try handler may intercept this error.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, VmError::Internal { .. } | VmError::Fatal { .. })
    }
}

/// Result type for interpreter operations.
pub type VmResult<T> = std::result::Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_uncatchable() {
        assert!(VmError::DivideByZero.is_catchable());
        assert!(VmError::aborted("oops").is_catchable());
        assert!(!VmError::internal("cleared instruction").is_catchable());
    }

    #[test]
    fn messages_render_plainly() {
        assert_eq!(VmError::StackUnderflow.to_string(), "Stack underflow.");
        assert_eq!(
            VmError::type_error("Non-integer argument (2)").to_string(),
            "Non-integer argument (2)"
        );
    }
}
