//! The per-connection MCP frame and outbound message encoding.

use muf_config::MCP_LINE_LEN;
use muf_core::Outbound;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::{McpError, McpResult};
use crate::message::McpMesg;
use crate::parse::encode_value;
use crate::version::{McpVer, NULL_VER};

/// The out-of-band line prefix.
pub const MCP_PREFIX: &str = "#$#";
/// Prefix quoting an in-band line that would otherwise look out-of-band.
pub const MCP_QUOTE_PREFIX: &str = "#$\"";
/// Name of the core protocol package.
pub const MCP_INIT_PKG: &str = "mcp";
/// Name of the negotiation package.
pub const MCP_NEGOTIATE_PKG: &str = "mcp-negotiate";
/// Argument carrying the multi-line assembly tag.
pub const MCP_DATATAG: &str = "_data-tag";

/// One package negotiated onto a connection.
#[derive(Debug, Clone)]
pub struct FrameEntry {
    pub name: String,
    pub version: McpVer,
}

/// Per-connection MCP state.
#[derive(Debug)]
pub struct McpFrame {
    /// Descriptor the frame talks through.
    pub descr: i32,
    /// Whether the init handshake completed.
    pub enabled: bool,
    /// Negotiated protocol version.
    pub version: McpVer,
    /// Key every authenticated message must carry.
    pub authkey: Option<String>,
    /// Packages negotiated for this connection.
    pub entries: Vec<FrameEntry>,
    /// Multi-line messages still being assembled.
    pub in_progress: Vec<McpMesg>,
}

impl McpFrame {
    /// Creates a frame for a fresh connection; MCP stays off until the
    /// client sends the init message.
    pub fn new(descr: i32) -> Self {
        McpFrame {
            descr,
            enabled: false,
            version: NULL_VER,
            authkey: None,
            entries: Vec::new(),
            in_progress: Vec::new(),
        }
    }

    /// The version negotiated for a package, if any.
    pub fn package_version(&self, name: &str) -> Option<McpVer> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.version)
    }

    /// Records (or replaces) a package's negotiated version.
    pub fn set_package_version(&mut self, name: &str, version: McpVer) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.name.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.version = version,
            None => self.entries.push(FrameEntry {
                name: name.to_string(),
                version,
            }),
        }
    }

    /// Takes an in-progress message by tag.
    pub fn take_in_progress(&mut self, tag: &str) -> Option<McpMesg> {
        let at = self
            .in_progress
            .iter()
            .position(|m| m.datatag.as_deref() == Some(tag))?;
        Some(self.in_progress.remove(at))
    }

    /// Borrows an in-progress message by tag.
    pub fn in_progress_mut(&mut self, tag: &str) -> Option<&mut McpMesg> {
        self.in_progress
            .iter_mut()
            .find(|m| m.datatag.as_deref() == Some(tag))
    }

    /// Sends a line of ordinary output, quoting it if it would read as
    /// out-of-band.
    pub fn send_text(&self, out: &mut dyn Outbound, text: &str) {
        if self.enabled && text.starts_with(MCP_PREFIX) {
            out.queue_descr_line(self.descr, &format!("{MCP_QUOTE_PREFIX}{text}"));
        } else {
            out.queue_descr_line(self.descr, text);
        }
    }

    /// Encodes and sends one message on this connection.
    ///
    /// Arguments that are multi-line, over-long or newline-bearing travel
    /// as `name*: ""` on the primary line with `#$#*` continuation lines
    /// under a generated data tag, closed by a `#$#:` end line.
    pub fn output_mesg(&self, out: &mut dyn Outbound, mesg: &McpMesg) -> McpResult<()> {
        if !self.enabled && !mesg.package.eq_ignore_ascii_case(MCP_INIT_PKG) {
            return Err(McpError::NoMcp);
        }
        if !mesg.package.eq_ignore_ascii_case(MCP_INIT_PKG)
            && self
                .package_version(&mesg.package)
                .map(|v| v.is_null())
                .unwrap_or(true)
        {
            return Err(McpError::no_package(mesg.package.clone()));
        }

        let mut line = format!("{MCP_PREFIX} {}", mesg.full_name());
        if let Some(key) = &self.authkey {
            if !mesg.package.eq_ignore_ascii_case(MCP_INIT_PKG) {
                line.push(' ');
                line.push_str(key);
            }
        }

        let deferred: Vec<&crate::message::McpArg> = mesg
            .args
            .iter()
            .filter(|arg| {
                arg.lines.len() != 1
                    || arg.lines[0].contains('\n')
                    || arg.lines[0].len() + line.len() > MCP_LINE_LEN / 2
            })
            .collect();

        let tag = if deferred.is_empty() {
            None
        } else {
            Some(generate_tag())
        };
        if let Some(tag) = &tag {
            line.push_str(&format!(" {MCP_DATATAG}: {tag}"));
        }

        for arg in &mesg.args {
            let is_deferred = deferred
                .iter()
                .any(|d| d.name.eq_ignore_ascii_case(&arg.name));
            if is_deferred {
                line.push_str(&format!(" {}*: \"\"", arg.name));
            } else {
                let value = arg.lines.first().map(|s| s.as_str()).unwrap_or("");
                line.push_str(&format!(" {}: {}", arg.name, encode_value(value)));
            }
        }
        out.queue_descr_line(self.descr, &line);

        if let Some(tag) = tag {
            for arg in deferred {
                for stored in &arg.lines {
                    for piece in stored.split('\n') {
                        out.queue_descr_line(
                            self.descr,
                            &format!("{MCP_PREFIX}* {tag} {}: {piece}", arg.name),
                        );
                    }
                }
            }
            out.queue_descr_line(self.descr, &format!("{MCP_PREFIX}: {tag}"));
        }
        Ok(())
    }
}

/// Generates a data tag or authentication key.
pub(crate) fn generate_tag() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SERVER_MCP_VERSION;
    use muf_core::RecordedOutput;

    fn enabled_frame() -> McpFrame {
        let mut frame = McpFrame::new(7);
        frame.enabled = true;
        frame.version = SERVER_MCP_VERSION;
        frame.authkey = Some("authkey1".to_string());
        frame.set_package_version("org-test", McpVer::new(1, 0));
        frame
    }

    #[test]
    fn simple_message_is_one_line() {
        let frame = enabled_frame();
        let mut out = RecordedOutput::default();
        let mut mesg = McpMesg::new("org-test", "hello");
        mesg.arg_append("who", "world").unwrap();
        frame.output_mesg(&mut out, &mesg).unwrap();

        assert_eq!(out.descr_lines.len(), 1);
        assert_eq!(
            out.descr_lines[0].1,
            "#$# org-test-hello authkey1 who: world"
        );
    }

    #[test]
    fn multiline_argument_defers() {
        let frame = enabled_frame();
        let mut out = RecordedOutput::default();
        let mut mesg = McpMesg::new("org-test", "page");
        mesg.append_line("text", "first", true).unwrap();
        mesg.append_line("text", "second", true).unwrap();
        mesg.complete();
        frame.output_mesg(&mut out, &mesg).unwrap();

        let lines: Vec<&str> = out.descr_lines.iter().map(|(_, l)| l.as_str()).collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("_data-tag: "));
        assert!(lines[0].contains("text*: \"\""));
        assert!(lines[1].starts_with("#$#* "));
        assert!(lines[1].ends_with("text: first"));
        assert!(lines[2].ends_with("text: second"));
        assert!(lines[3].starts_with("#$#: "));
    }

    #[test]
    fn unnegotiated_package_is_refused() {
        let frame = enabled_frame();
        let mut out = RecordedOutput::default();
        let mesg = McpMesg::new("org-unknown", "x");
        assert!(matches!(
            frame.output_mesg(&mut out, &mesg),
            Err(McpError::NoPackage { .. })
        ));
    }

    #[test]
    fn inband_lines_get_quoted_when_needed() {
        let frame = enabled_frame();
        let mut out = RecordedOutput::default();
        frame.send_text(&mut out, "#$#sneaky in-band line");
        frame.send_text(&mut out, "ordinary line");
        assert_eq!(out.descr_lines[0].1, "#$\"#$#sneaky in-band line");
        assert_eq!(out.descr_lines[1].1, "ordinary line");
    }
}
