//! The package registry and the inbound line processor.
//!
//! Packages register once, server-wide; each connection's frame records
//! which of them the client negotiated and at what version. The processor
//! turns raw input lines into dispatched messages, assembling multi-line
//! messages across calls.

use std::rc::Rc;

use muf_core::Outbound;

use crate::error::{McpError, McpResult};
use crate::frame::{
    generate_tag, McpFrame, MCP_DATATAG, MCP_INIT_PKG, MCP_NEGOTIATE_PKG, MCP_PREFIX,
    MCP_QUOTE_PREFIX,
};
use crate::message::McpMesg;
use crate::parse::LineCursor;
use crate::version::{version_select, McpVer, SERVER_MCP_VERSION};

/// A package message callback.
pub type McpHandler = Rc<dyn Fn(&mut McpFrame, &mut dyn Outbound, &McpMesg, McpVer)>;

struct PackageDef {
    name: String,
    minver: McpVer,
    maxver: McpVer,
    handler: Option<McpHandler>,
}

/// What one input line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpInput {
    /// Ordinary in-band text (quoting prefix already stripped).
    InBand(String),
    /// An out-of-band line the framer consumed.
    Handled,
}

/// The server-wide package registry.
pub struct McpRegistry {
    packages: Vec<PackageDef>,
}

impl Default for McpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl McpRegistry {
    /// Creates a registry with the negotiation package built in.
    pub fn new() -> Self {
        let mut registry = McpRegistry {
            packages: Vec::new(),
        };
        registry.register(
            MCP_NEGOTIATE_PKG,
            McpVer::new(1, 0),
            McpVer::new(2, 0),
            None,
        );
        registry
    }

    /// Registers a package with its supported version range and callback.
    pub fn register(
        &mut self,
        name: &str,
        minver: McpVer,
        maxver: McpVer,
        handler: Option<McpHandler>,
    ) {
        self.packages
            .retain(|p| !p.name.eq_ignore_ascii_case(name));
        self.packages.push(PackageDef {
            name: name.to_string(),
            minver,
            maxver,
            handler,
        });
    }

    /// Registered package names, registration order.
    pub fn package_names(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.name.clone()).collect()
    }

    fn find_package(&self, name: &str) -> Option<&PackageDef> {
        self.packages
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Splits a full message name into `(package, mesgname)` against the
    /// registered packages, longest match first.
    fn split_mesg_name<'a>(&self, full: &'a str) -> Option<(String, &'a str)> {
        let mut best: Option<(&PackageDef, &str)> = None;
        for package in &self.packages {
            let rest = if full.eq_ignore_ascii_case(&package.name) {
                Some("")
            } else if full.len() > package.name.len()
                && full[..package.name.len()].eq_ignore_ascii_case(&package.name)
                && full.as_bytes()[package.name.len()] == b'-'
            {
                Some(&full[package.name.len() + 1..])
            } else {
                None
            };
            if let Some(rest) = rest {
                let better = best
                    .map(|(b, _)| package.name.len() > b.name.len())
                    .unwrap_or(true);
                if better {
                    best = Some((package, rest));
                }
            }
        }
        best.map(|(p, rest)| (p.name.clone(), rest))
    }

    /// Processes one raw input line against a connection's frame.
    pub fn process_input(
        &self,
        frame: &mut McpFrame,
        out: &mut dyn Outbound,
        line: &str,
    ) -> McpResult<McpInput> {
        if let Some(rest) = line.strip_prefix(MCP_QUOTE_PREFIX) {
            return Ok(McpInput::InBand(rest.to_string()));
        }
        let Some(rest) = line.strip_prefix(MCP_PREFIX) else {
            return Ok(McpInput::InBand(line.to_string()));
        };

        match rest.chars().next() {
            Some('*') => self.handle_continuation(frame, &rest[1..]),
            Some(':') => self.handle_end(frame, out, &rest[1..]),
            _ => self.handle_start(frame, out, rest),
        }
    }

    fn handle_start(
        &self,
        frame: &mut McpFrame,
        out: &mut dyn Outbound,
        rest: &str,
    ) -> McpResult<McpInput> {
        let mut cursor = LineCursor::new(rest);
        cursor.skip_whitespace();
        let full_name = cursor.ident()?;

        if !frame.enabled {
            if !full_name.eq_ignore_ascii_case(MCP_INIT_PKG) {
                return Err(McpError::NoMcp);
            }
        } else if full_name.eq_ignore_ascii_case(MCP_INIT_PKG) {
            // a second init on an enabled connection is noise
            return Ok(McpInput::Handled);
        } else {
            cursor.skip_whitespace();
            let key = cursor.simple_value()?;
            if frame.authkey.as_deref() != Some(key.as_str()) {
                return Err(McpError::BadAuth);
            }
        }

        let (package, mesgname) = if full_name.eq_ignore_ascii_case(MCP_INIT_PKG) {
            (MCP_INIT_PKG.to_string(), "")
        } else {
            self.split_mesg_name(&full_name)
                .ok_or_else(|| McpError::no_package(full_name.clone()))?
        };

        let mut mesg = McpMesg::new(&package, mesgname);
        loop {
            cursor.skip_whitespace();
            if cursor.at_end() {
                break;
            }
            let (name, deferred, value) = cursor.key_value()?;
            mesg.append_line(&name, &value, deferred)?;
        }

        if mesg.incomplete {
            let tag = match mesg.arg_line(MCP_DATATAG) {
                Some(tag) => tag.to_string(),
                None => generate_tag(),
            };
            mesg.arg_remove(MCP_DATATAG);
            mesg.datatag = Some(tag);
            frame.in_progress.push(mesg);
            return Ok(McpInput::Handled);
        }

        mesg.arg_remove(MCP_DATATAG);
        self.dispatch(frame, out, mesg)?;
        Ok(McpInput::Handled)
    }

    fn handle_continuation(&self, frame: &mut McpFrame, rest: &str) -> McpResult<McpInput> {
        let mut cursor = LineCursor::new(rest);
        cursor.skip_whitespace();
        let tag = cursor.simple_value()?;
        cursor.skip_whitespace();
        let name = cursor.ident()?;
        if cursor.peek() != Some(':') {
            return Err(McpError::parse("expected colon in continuation line"));
        }
        cursor.bump();
        if cursor.peek() == Some(' ') {
            cursor.bump();
        }
        let value = cursor.rest();

        let mesg = frame
            .in_progress_mut(&tag)
            .ok_or(McpError::UnknownTag { tag })?;
        mesg.append_line(&name, &value, true)?;
        Ok(McpInput::Handled)
    }

    fn handle_end(
        &self,
        frame: &mut McpFrame,
        out: &mut dyn Outbound,
        rest: &str,
    ) -> McpResult<McpInput> {
        let mut cursor = LineCursor::new(rest);
        cursor.skip_whitespace();
        let tag = cursor.simple_value()?;
        let mut mesg = frame
            .take_in_progress(&tag)
            .ok_or(McpError::UnknownTag { tag })?;
        mesg.complete();
        self.dispatch(frame, out, mesg)?;
        Ok(McpInput::Handled)
    }

    /// Routes one complete message.
    fn dispatch(
        &self,
        frame: &mut McpFrame,
        out: &mut dyn Outbound,
        mesg: McpMesg,
    ) -> McpResult<()> {
        if mesg.package.eq_ignore_ascii_case(MCP_INIT_PKG) {
            return self.handle_init(frame, out, &mesg);
        }
        if mesg.package.eq_ignore_ascii_case(MCP_NEGOTIATE_PKG) {
            return self.handle_negotiate(frame, &mesg);
        }

        let version = frame
            .package_version(&mesg.package)
            .filter(|v| !v.is_null())
            .ok_or_else(|| McpError::no_package(mesg.package.clone()))?;
        let package = self
            .find_package(&mesg.package)
            .ok_or_else(|| McpError::no_package(mesg.package.clone()))?;
        if let Some(handler) = &package.handler {
            handler(frame, out, &mesg, version);
        }
        Ok(())
    }

    /// The `mcp` init message: version selection, key generation, and the
    /// outbound `can` stream.
    fn handle_init(
        &self,
        frame: &mut McpFrame,
        out: &mut dyn Outbound,
        mesg: &McpMesg,
    ) -> McpResult<()> {
        if frame.enabled {
            return Ok(());
        }
        let client_min: McpVer = mesg.arg_line("version").unwrap_or("0.0").parse()?;
        let client_max: McpVer = mesg.arg_line("to").unwrap_or("0.0").parse()?;
        let selected = version_select(
            SERVER_MCP_VERSION,
            SERVER_MCP_VERSION,
            client_min,
            client_max,
        );
        if selected.is_null() {
            log::debug!(
                "descr {}: no common MCP version in {client_min}..{client_max}",
                frame.descr
            );
            return Ok(());
        }

        frame.enabled = true;
        frame.version = selected;
        frame.authkey = Some(generate_tag());
        // negotiation traffic flows before the client sends any `can`
        if let Some(negotiate) = self.find_package(MCP_NEGOTIATE_PKG) {
            frame.set_package_version(MCP_NEGOTIATE_PKG, negotiate.maxver);
        }

        let mut reply = McpMesg::new(MCP_INIT_PKG, "");
        reply.arg_append("version", &SERVER_MCP_VERSION.to_string())?;
        reply.arg_append("to", &SERVER_MCP_VERSION.to_string())?;
        if let Some(key) = &frame.authkey {
            reply.arg_append("authkey", key)?;
        }
        frame.output_mesg(out, &reply)?;

        for package in &self.packages {
            if package.name.eq_ignore_ascii_case(MCP_INIT_PKG) {
                continue;
            }
            let mut cando = McpMesg::new(MCP_NEGOTIATE_PKG, "can");
            cando.arg_append("package", &package.name)?;
            cando.arg_append("min-version", &package.minver.to_string())?;
            cando.arg_append("max-version", &package.maxver.to_string())?;
            frame.output_mesg(out, &cando)?;
        }
        let end = McpMesg::new(MCP_NEGOTIATE_PKG, "end");
        frame.output_mesg(out, &end)?;
        Ok(())
    }

    /// The `mcp-negotiate` package: `can` records the client's range for a
    /// package; `end` terminates the stream and triggers nothing.
    fn handle_negotiate(&self, frame: &mut McpFrame, mesg: &McpMesg) -> McpResult<()> {
        match mesg.mesgname.to_ascii_lowercase().as_str() {
            "can" => {
                let Some(name) = mesg.arg_line("package") else {
                    return Ok(());
                };
                let client_min: McpVer = mesg.arg_line("min-version").unwrap_or("0.0").parse()?;
                let client_max: McpVer = mesg.arg_line("max-version").unwrap_or("0.0").parse()?;
                if let Some(package) = self.find_package(name) {
                    let selected =
                        version_select(package.minver, package.maxver, client_min, client_max);
                    if !selected.is_null() {
                        frame.set_package_version(&package.name, selected);
                    }
                }
                Ok(())
            }
            "end" => Ok(()),
            other => {
                log::debug!("unknown mcp-negotiate message {other}");
                Ok(())
            }
        }
    }
}
