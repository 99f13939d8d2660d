//! MCP error codes.

use thiserror::Error;

/// Errors surfaced by the framing layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    /// MCP is not enabled on this connection.
    #[error("MCP is not supported on this connection.")]
    NoMcp,

    /// The package's version ranges do not overlap, or it was never
    /// registered.
    #[error("Package {package} is not supported for this connection.")]
    NoPackage { package: String },

    /// Too many arguments in one message.
    #[error("Too many arguments in message.")]
    ArgCount,

    /// An argument name exceeded the limit.
    #[error("Argument name too long: {name}")]
    ArgNameLen { name: String },

    /// The encoded message exceeded the size limit.
    #[error("Message is too large.")]
    MesgSize,

    /// A line failed to parse as MCP.
    #[error("Malformed MCP line: {reason}")]
    Parse { reason: String },

    /// A continuation or end line named an unknown data tag.
    #[error("Unknown data tag: {tag}")]
    UnknownTag { tag: String },

    /// A message-start line carried the wrong authentication key.
    #[error("Authentication key mismatch.")]
    BadAuth,
}

impl McpError {
    /// Creates a parse error.
    pub fn parse<S: Into<String>>(reason: S) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Creates a no-package error.
    pub fn no_package<S: Into<String>>(package: S) -> Self {
        Self::NoPackage {
            package: package.into(),
        }
    }
}

/// Result type for MCP operations.
pub type McpResult<T> = std::result::Result<T, McpError>;
