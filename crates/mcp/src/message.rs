//! MCP messages and their argument lists.

use muf_config::{MAX_MCP_ARGNAME_LEN, MAX_MCP_MESG_ARGS, MAX_MCP_MESG_SIZE};

use crate::error::{McpError, McpResult};

/// One argument: a name and one or more value lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpArg {
    pub name: String,
    pub lines: Vec<String>,
    /// Still accumulating continuation lines.
    pub incomplete: bool,
}

/// One MCP message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpMesg {
    /// Package the message belongs to.
    pub package: String,
    /// Message name within the package; empty for the package's bare
    /// message.
    pub mesgname: String,
    /// Multi-line assembly tag, when the message is (or was) in progress.
    pub datatag: Option<String>,
    pub args: Vec<McpArg>,
    /// Waiting for continuation lines.
    pub incomplete: bool,
    /// Encoded size so far, enforced against the message cap.
    pub bytes: usize,
}

impl McpMesg {
    /// Creates an empty message.
    pub fn new(package: &str, mesgname: &str) -> Self {
        McpMesg {
            package: package.to_string(),
            mesgname: mesgname.to_string(),
            datatag: None,
            args: Vec::new(),
            incomplete: false,
            bytes: 0,
        }
    }

    /// The full on-wire message name.
    pub fn full_name(&self) -> String {
        if self.mesgname.is_empty() {
            self.package.clone()
        } else {
            format!("{}-{}", self.package, self.mesgname)
        }
    }

    /// Finds an argument by name, case-insensitively.
    pub fn arg(&self, name: &str) -> Option<&McpArg> {
        self.args
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    fn arg_mut(&mut self, name: &str) -> Option<&mut McpArg> {
        self.args
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// First value line of an argument, if present.
    pub fn arg_line(&self, name: &str) -> Option<&str> {
        self.arg(name)
            .and_then(|a| a.lines.first())
            .map(|s| s.as_str())
    }

    /// Number of value lines of an argument.
    pub fn arg_linecount(&self, name: &str) -> usize {
        self.arg(name).map(|a| a.lines.len()).unwrap_or(0)
    }

    /// Appends a single-line argument, enforcing the argument-count,
    /// name-length and message-size caps.
    pub fn arg_append(&mut self, name: &str, value: &str) -> McpResult<()> {
        self.append_line(name, value, false)
    }

    /// Appends a value line to an argument, creating it if needed;
    /// `incomplete` marks it as awaiting continuation lines.
    pub fn append_line(&mut self, name: &str, value: &str, incomplete: bool) -> McpResult<()> {
        if name.len() > MAX_MCP_ARGNAME_LEN {
            return Err(McpError::ArgNameLen {
                name: name.to_string(),
            });
        }
        self.bytes += name.len() + value.len() + 4;
        if self.bytes > MAX_MCP_MESG_SIZE {
            return Err(McpError::MesgSize);
        }
        match self.arg_mut(name) {
            Some(arg) => {
                if !value.is_empty() || !incomplete {
                    arg.lines.push(value.to_string());
                }
                arg.incomplete = incomplete;
            }
            None => {
                if self.args.len() >= MAX_MCP_MESG_ARGS {
                    return Err(McpError::ArgCount);
                }
                let lines = if value.is_empty() && incomplete {
                    Vec::new()
                } else {
                    vec![value.to_string()]
                };
                self.args.push(McpArg {
                    name: name.to_string(),
                    lines,
                    incomplete,
                });
            }
        }
        self.incomplete = self.args.iter().any(|a| a.incomplete);
        Ok(())
    }

    /// Marks every argument complete (the end line arrived).
    pub fn complete(&mut self) {
        for arg in &mut self.args {
            arg.incomplete = false;
        }
        self.incomplete = false;
    }

    /// Removes an argument.
    pub fn arg_remove(&mut self, name: &str) {
        self.args.retain(|a| !a.name.eq_ignore_ascii_case(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_joins_package_and_message() {
        assert_eq!(McpMesg::new("mcp-negotiate", "can").full_name(), "mcp-negotiate-can");
        assert_eq!(McpMesg::new("mcp", "").full_name(), "mcp");
    }

    #[test]
    fn argument_caps_are_enforced() {
        let mut mesg = McpMesg::new("test", "");
        for i in 0..MAX_MCP_MESG_ARGS {
            mesg.arg_append(&format!("a{i}"), "v").unwrap();
        }
        assert_eq!(mesg.arg_append("overflow", "v"), Err(McpError::ArgCount));

        let long_name = "x".repeat(MAX_MCP_ARGNAME_LEN + 1);
        assert!(matches!(
            mesg.arg_append(&long_name, "v"),
            Err(McpError::ArgNameLen { .. })
        ));
    }

    #[test]
    fn multiline_args_accumulate() {
        let mut mesg = McpMesg::new("test", "");
        mesg.append_line("text", "", true).unwrap();
        assert!(mesg.incomplete);
        mesg.append_line("text", "line one", true).unwrap();
        mesg.append_line("text", "line two", true).unwrap();
        mesg.complete();
        assert!(!mesg.incomplete);
        assert_eq!(mesg.arg_linecount("text"), 2);
        assert_eq!(mesg.arg_line("text"), Some("line one"));
    }
}
