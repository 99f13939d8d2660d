//! Lexical pieces of the MCP line grammar.

use crate::error::{McpError, McpResult};

/// A cursor over one input line.
pub(crate) struct LineCursor<'a> {
    chars: Vec<char>,
    pos: usize,
    line: &'a str,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Characters legal in an unquoted value: printable, non-space, and none
/// of `* : \ "`.
fn is_simple_char(c: char) -> bool {
    !c.is_whitespace() && !c.is_control() && !matches!(c, '*' | ':' | '\\' | '"')
}

impl<'a> LineCursor<'a> {
    pub fn new(line: &'a str) -> Self {
        LineCursor {
            chars: line.chars().collect(),
            pos: 0,
            line,
        }
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    pub fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Unread remainder of the line, verbatim.
    pub fn rest(&self) -> String {
        self.chars[self.pos..].iter().collect()
    }

    fn err(&self, reason: &str) -> McpError {
        McpError::parse(format!("{reason} in {:?}", self.line))
    }

    /// `[A-Za-z_][A-Za-z0-9_-]*`
    pub fn ident(&mut self) -> McpResult<String> {
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            _ => return Err(self.err("expected identifier")),
        }
        let mut out = String::new();
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            if let Some(c) = self.bump() {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// An unquoted value token.
    pub fn simple_value(&mut self) -> McpResult<String> {
        let mut out = String::new();
        while matches!(self.peek(), Some(c) if is_simple_char(c)) {
            if let Some(c) = self.bump() {
                out.push(c);
            }
        }
        if out.is_empty() {
            return Err(self.err("expected value"));
        }
        Ok(out)
    }

    /// A `"`-quoted value with backslash escapes.
    pub fn quoted_value(&mut self) -> McpResult<String> {
        if self.peek() != Some('"') {
            return Err(self.err("expected quote"));
        }
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated quoted value")),
                Some('"') => break,
                Some('\\') => match self.bump() {
                    None => return Err(self.err("unterminated quoted value")),
                    Some(c) => out.push(c),
                },
                Some(c) => out.push(c),
            }
        }
        Ok(out)
    }

    /// Quoted-or-unquoted value.
    pub fn value(&mut self) -> McpResult<String> {
        if self.peek() == Some('"') {
            self.quoted_value()
        } else {
            self.simple_value()
        }
    }

    /// One `name[*]: value` pair; returns `(name, deferred, value)`.
    pub fn key_value(&mut self) -> McpResult<(String, bool, String)> {
        let name = self.ident()?;
        let deferred = if self.peek() == Some('*') {
            self.pos += 1;
            true
        } else {
            false
        };
        if self.peek() != Some(':') {
            return Err(self.err("expected colon"));
        }
        self.pos += 1;
        self.skip_whitespace();
        let value = if self.at_end() {
            String::new()
        } else {
            self.value()?
        };
        Ok((name, deferred, value))
    }
}

/// Whether a value can travel unquoted.
pub(crate) fn needs_quoting(value: &str) -> bool {
    value.is_empty() || !value.chars().all(is_simple_char)
}

/// Encodes one value for the wire, quoting when needed.
pub(crate) fn encode_value(value: &str) -> String {
    if !needs_quoting(value) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idents_stop_at_punctuation() {
        let mut cursor = LineCursor::new("min-version: 1.0");
        assert_eq!(cursor.ident().unwrap(), "min-version");
        assert_eq!(cursor.peek(), Some(':'));
    }

    #[test]
    fn key_value_forms() {
        let mut cursor = LineCursor::new("package: \"mcp-negotiate\"");
        let (name, deferred, value) = cursor.key_value().unwrap();
        assert_eq!(name, "package");
        assert!(!deferred);
        assert_eq!(value, "mcp-negotiate");

        let mut cursor = LineCursor::new("text*: \"\"");
        let (name, deferred, value) = cursor.key_value().unwrap();
        assert_eq!(name, "text");
        assert!(deferred);
        assert_eq!(value, "");
    }

    #[test]
    fn quoted_values_unescape() {
        let mut cursor = LineCursor::new(r#""say \"hi\" \\ back""#);
        assert_eq!(cursor.quoted_value().unwrap(), "say \"hi\" \\ back");
    }

    #[test]
    fn encode_round_trips_through_parse() {
        for value in ["plain", "two words", "quo\"te", "back\\slash", "", "a:b"] {
            let encoded = encode_value(value);
            let mut cursor = LineCursor::new(&encoded);
            assert_eq!(cursor.value().unwrap(), value, "value {value:?}");
        }
    }

    #[test]
    fn bad_input_errors() {
        assert!(LineCursor::new("9bad").ident().is_err());
        assert!(LineCursor::new("\"open").quoted_value().is_err());
        let mut cursor = LineCursor::new("name value");
        assert!(cursor.key_value().is_err());
    }
}
