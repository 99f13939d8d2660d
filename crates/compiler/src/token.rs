//! The raw token reader.
//!
//! Works a cursor across the program's source lines and hands back one token
//! per call: an unquoted word, or a string. Comments are consumed here, in
//! one of three modes selectable by `$pragma`; macro and define expansion sit
//! a layer above and feed replacement text back in through
//! [`SourceCursor::prepend`].

use muf_config::SUBSTITUTIONS_MAX;

use crate::error::{CompileError, CompileResult};

/// The escape byte `\[` produces inside string literals, consumed by the
/// terminal layer.
pub const ESCAPE_BYTE: char = '\u{1b}';

/// Comment parsing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentMode {
    /// Scan to the first `)`, even across lines (`$pragma comment_strict`).
    Flat,
    /// Balanced parentheses, depth-limited; parse problems are fatal
    /// (`$pragma comment_recurse`).
    Recursive,
    /// Try recursive; on failure restore the cursor and re-scan flat
    /// (`$pragma comment_loose`). The default.
    Loose,
}

/// One raw token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawToken {
    /// Whitespace-delimited word.
    Word(String),
    /// Contents of a `"`-quoted string, escapes resolved.
    Str(String),
}

impl RawToken {
    /// The word's text, if this is a word token.
    pub fn as_word(&self) -> Option<&str> {
        match self {
            RawToken::Word(w) => Some(w),
            RawToken::Str(_) => None,
        }
    }

    /// The token's text regardless of kind.
    pub fn text(&self) -> &str {
        match self {
            RawToken::Word(w) => w,
            RawToken::Str(s) => s,
        }
    }
}

/// Cursor over the source lines.
pub struct SourceCursor {
    lines: Vec<String>,
    /// Index of the next line to load.
    next_line: usize,
    /// 1-based number of the line currently in `buf`.
    pub lineno: i32,
    buf: Vec<char>,
    pos: usize,
    macrosubs: usize,
    done: bool,
    /// Line the comment being parsed started on, for diagnostics.
    start_comment: i32,
    /// Comment parsing mode; `$pragma` rewrites it mid-compile.
    pub comment_mode: CommentMode,
    /// Warnings produced while tokenizing, drained by the caller.
    pub warnings: Vec<String>,
}

/// Cursor position snapshot used by the loose-mode comment retry.
struct Checkpoint {
    next_line: usize,
    lineno: i32,
    buf: Vec<char>,
    pos: usize,
    macrosubs: usize,
    done: bool,
}

impl SourceCursor {
    /// Creates a cursor over the given source lines.
    pub fn new(lines: Vec<String>) -> Self {
        let mut cursor = SourceCursor {
            lines,
            next_line: 0,
            lineno: 0,
            buf: Vec::new(),
            pos: 0,
            macrosubs: 0,
            done: false,
            start_comment: 0,
            comment_mode: CommentMode::Loose,
            warnings: Vec::new(),
        };
        cursor.advance_line();
        cursor
    }

    /// True once every line has been consumed.
    pub fn at_end(&self) -> bool {
        self.done
    }

    fn save(&self) -> Checkpoint {
        Checkpoint {
            next_line: self.next_line,
            lineno: self.lineno,
            buf: self.buf.clone(),
            pos: self.pos,
            macrosubs: self.macrosubs,
            done: self.done,
        }
    }

    fn restore(&mut self, saved: Checkpoint) {
        self.next_line = saved.next_line;
        self.lineno = saved.lineno;
        self.buf = saved.buf;
        self.pos = saved.pos;
        self.macrosubs = saved.macrosubs;
        self.done = saved.done;
    }

    /// Loads the next source line; the substitution counter resets per line.
    fn advance_line(&mut self) {
        if self.next_line >= self.lines.len() {
            self.done = true;
            self.buf.clear();
            self.pos = 0;
            return;
        }
        self.buf = self.lines[self.next_line].chars().collect();
        self.pos = 0;
        self.macrosubs = 0;
        self.next_line += 1;
        self.lineno = self.next_line as i32;
    }

    fn peek(&self) -> Option<char> {
        self.buf.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    /// Splices expansion text in front of the unread remainder of the
    /// current line, enforcing the per-line substitution cap.
    pub fn prepend(&mut self, text: &str) -> CompileResult<()> {
        self.macrosubs += 1;
        if self.macrosubs > SUBSTITUTIONS_MAX {
            return Err(CompileError::TooManySubstitutions { line: self.lineno });
        }
        let mut new_buf: Vec<char> = text.chars().collect();
        new_buf.push(' ');
        new_buf.extend_from_slice(&self.buf[self.pos..]);
        self.buf = new_buf;
        self.pos = 0;
        Ok(())
    }

    /// Returns the unread remainder of the current line and advances past
    /// it. Used by rest-of-line directives (`$author`, `$note`, ...).
    pub fn rest_of_line(&mut self) -> String {
        let rest: String = self.buf[self.pos..].iter().collect();
        self.pos = self.buf.len();
        rest.trim().to_string()
    }

    /// Fetches the next raw token, consuming comments along the way.
    pub fn next_token_raw(&mut self) -> CompileResult<Option<RawToken>> {
        loop {
            if self.done {
                return Ok(None);
            }
            self.skip_whitespace();
            match self.peek() {
                None => {
                    self.advance_line();
                }
                Some('(') => {
                    self.start_comment = self.lineno;
                    self.consume_comment()?;
                    self.start_comment = 0;
                }
                Some('"') => return Ok(Some(RawToken::Str(self.read_string()?))),
                Some(_) => return Ok(Some(RawToken::Word(self.read_word()))),
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                break;
            }
            word.push(ch);
            self.pos += 1;
        }
        word
    }

    fn read_string(&mut self) -> CompileResult<String> {
        self.pos += 1; // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(CompileError::Unterminated {
                        line: self.lineno,
                        what: "string",
                    })
                }
                Some('"') => break,
                Some('\\') => match self.bump() {
                    None => {
                        return Err(CompileError::Unterminated {
                            line: self.lineno,
                            what: "string",
                        })
                    }
                    Some('r') => text.push('\r'),
                    Some('[') => text.push(ESCAPE_BYTE),
                    Some(other) => text.push(other),
                },
                Some(ch) => text.push(ch),
            }
        }
        if self.peek().is_none() {
            self.advance_line();
        }
        Ok(text)
    }

    fn consume_comment(&mut self) -> CompileResult<()> {
        match self.comment_mode {
            CommentMode::Flat => self.comment_flat(),
            CommentMode::Recursive => self.comment_recursive(),
            CommentMode::Loose => {
                let saved = self.save();
                let start = self.start_comment;
                match self.comment_recursive() {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        self.restore(saved);
                        self.start_comment = start;
                        self.comment_flat()
                    }
                }
            }
        }
    }

    /// Old-style comment: chug along to the first `)`, across lines.
    fn comment_flat(&mut self) -> CompileResult<()> {
        loop {
            match self.bump() {
                Some(')') => break,
                Some(_) => {}
                None => {
                    self.advance_line();
                    if self.done {
                        return Err(CompileError::Unterminated {
                            line: self.start_comment,
                            what: "comment",
                        });
                    }
                }
            }
        }
        if self.peek().is_none() {
            self.advance_line();
        }
        Ok(())
    }

    /// Balanced-parenthesis comment, depth-limited.
    fn comment_recursive(&mut self) -> CompileResult<()> {
        let max = muf_config::COMMENT_DEPTH_MAX;
        let mut depth = 1usize;
        self.pos += 1; // opening paren
        loop {
            match self.peek() {
                None => {
                    self.advance_line();
                    if self.done {
                        return Err(CompileError::Unterminated {
                            line: self.start_comment,
                            what: "comment",
                        });
                    }
                }
                Some(')') => {
                    self.pos += 1;
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Some('(') => {
                    self.pos += 1;
                    depth += 1;
                    if depth > max {
                        return Err(CompileError::CommentsTooDeep {
                            line: self.lineno,
                            max,
                        });
                    }
                }
                Some(_) => {
                    self.pos += 1;
                }
            }
        }

        // A dangling quote on the rest of the line usually means the author
        // closed the comment in the wrong place.
        let mut in_str = false;
        for &ch in &self.buf[self.pos..] {
            if ch == '"' {
                in_str = !in_str;
            }
        }
        if in_str {
            self.warnings.push(format!(
                "Warning on line {}: Unterminated string may indicate \
                 unterminated comment. Comment starts on line {}.",
                self.lineno, self.start_comment
            ));
        }

        if self.peek().is_none() {
            self.advance_line();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(lines: &[&str]) -> SourceCursor {
        SourceCursor::new(lines.iter().map(|s| s.to_string()).collect())
    }

    fn words(cursor: &mut SourceCursor) -> Vec<RawToken> {
        let mut out = Vec::new();
        while let Some(tok) = cursor.next_token_raw().unwrap() {
            out.push(tok);
        }
        out
    }

    #[test]
    fn words_and_strings() {
        let mut c = cursor(&[": main", "  \"hello world\" tell", ";"]);
        assert_eq!(
            words(&mut c),
            vec![
                RawToken::Word(":".into()),
                RawToken::Word("main".into()),
                RawToken::Str("hello world".into()),
                RawToken::Word("tell".into()),
                RawToken::Word(";".into()),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let mut c = cursor(&[r#""a\"b\\c\rd\[e""#]);
        let toks = words(&mut c);
        assert_eq!(
            toks,
            vec![RawToken::Str(format!("a\"b\\c\rd{ESCAPE_BYTE}e"))]
        );
    }

    #[test]
    fn unterminated_string_errors() {
        let mut c = cursor(&["\"never closed"]);
        assert!(matches!(
            c.next_token_raw(),
            Err(CompileError::Unterminated { what: "string", .. })
        ));
    }

    #[test]
    fn recursive_comments_nest() {
        let mut c = cursor(&["( outer ( inner ) still outer ) token"]);
        assert_eq!(words(&mut c), vec![RawToken::Word("token".into())]);
    }

    #[test]
    fn comment_depth_seven_ok_eight_fails() {
        let seven = "( ( ( ( ( ( ( deep ) ) ) ) ) ) ) ok";
        let mut c = cursor(&[seven]);
        c.comment_mode = CommentMode::Recursive;
        assert_eq!(words(&mut c), vec![RawToken::Word("ok".into())]);

        let eight = "( ( ( ( ( ( ( ( deep ) ) ) ) ) ) ) ) no";
        let mut c = cursor(&[eight]);
        c.comment_mode = CommentMode::Recursive;
        assert!(matches!(
            c.next_token_raw(),
            Err(CompileError::CommentsTooDeep { .. })
        ));
    }

    #[test]
    fn loose_mode_falls_back_to_flat() {
        // Unbalanced inner paren: the recursive parse fails, the flat retry
        // ends the comment at the first close paren.
        let mut c = cursor(&["( bad ( nesting word"]);
        assert!(matches!(
            c.next_token_raw(),
            Err(CompileError::Unterminated { what: "comment", .. })
        ));

        let mut c = cursor(&["( bad ( nesting ) word"]);
        assert_eq!(words(&mut c), vec![RawToken::Word("word".into())]);
    }

    #[test]
    fn flat_mode_stops_at_first_close() {
        let mut c = cursor(&["( outer ( inner ) rest ) token"]);
        c.comment_mode = CommentMode::Flat;
        assert_eq!(
            words(&mut c),
            vec![
                RawToken::Word("rest".into()),
                RawToken::Word(")".into()),
                RawToken::Word("token".into()),
            ]
        );
    }

    #[test]
    fn misclosed_comment_warns_about_dangling_string() {
        let mut c = cursor(&["( comment ) \"dangling token"]);
        let _ = c.next_token_raw();
        assert_eq!(c.warnings.len(), 1);
        assert!(c.warnings[0].contains("Unterminated string"));
    }

    #[test]
    fn prepend_respects_substitution_cap() {
        let mut c = cursor(&["x"]);
        for _ in 0..SUBSTITUTIONS_MAX {
            c.prepend("y").unwrap();
        }
        assert!(matches!(
            c.prepend("z"),
            Err(CompileError::TooManySubstitutions { .. })
        ));
    }
}
