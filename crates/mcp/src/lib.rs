//! # MUF MCP
//!
//! The Message Control Protocol framing layer: a line-oriented out-of-band
//! protocol carried over the connection's text stream, with its own
//! token/ident/quoted-string lexer, multi-line message assembly, and
//! per-connection package version negotiation.
//!
//! A server holds one [`McpRegistry`] of packages and one [`McpFrame`] per
//! connection; every inbound line goes through
//! [`McpRegistry::process_input`], which either hands the line back as
//! in-band text or consumes it as protocol traffic.

pub mod error;
pub mod frame;
pub mod message;
mod parse;
pub mod registry;
pub mod version;

pub use error::{McpError, McpResult};
pub use frame::{McpFrame, MCP_NEGOTIATE_PKG, MCP_PREFIX, MCP_QUOTE_PREFIX};
pub use message::{McpArg, McpMesg};
pub use registry::{McpHandler, McpInput, McpRegistry};
pub use version::{version_select, McpVer, SERVER_MCP_VERSION};
