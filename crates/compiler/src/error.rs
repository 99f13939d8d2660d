//! Compile-time error types.

use thiserror::Error;

/// Errors raised while compiling a program.
///
/// Every variant carries the source line the compiler was looking at when it
/// gave up; the rendering matches the message format players have always
/// seen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// General syntax error.
    #[error("Error in line {line}: {message}")]
    Syntax { line: i32, message: String },

    /// The source ended where more tokens were required.
    #[error("Error in line {line}: Unexpected end of file{context}")]
    UnexpectedEof { line: i32, context: String },

    /// A comment or string ran off the end of the program.
    #[error("Error in line {line}: Unterminated {what}.")]
    Unterminated { line: i32, what: &'static str },

    /// Recursive comments nested past the limit.
    #[error("Error in line {line}: Comments nested too deep (more than {max} levels).")]
    CommentsTooDeep { line: i32, max: usize },

    /// The variable tables are full.
    #[error("Error in line {line}: Variable limit exceeded.")]
    TooManyVariables { line: i32 },

    /// Macro/define expansion looped.
    #[error("Error in line {line}: Too many macro substitutions.")]
    TooManySubstitutions { line: i32 },

    /// A `$pragma` option the compiler does not know.
    #[error("Error in line {line}: Unrecognized pragma {pragma}.")]
    BadPragma { line: i32, pragma: String },

    /// `$abort` stopped the compile.
    #[error("Error in line {line}: {message}")]
    Aborted { line: i32, message: String },
}

impl CompileError {
    /// Creates a syntax error.
    pub fn syntax<S: Into<String>>(line: i32, message: S) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    /// Creates an unexpected-EOF error; `context` is appended to the
    /// message (" looking for ...").
    pub fn eof<S: Into<String>>(line: i32, context: S) -> Self {
        Self::UnexpectedEof {
            line,
            context: context.into(),
        }
    }

    /// The source line the error points at.
    pub fn line(&self) -> i32 {
        match self {
            CompileError::Syntax { line, .. }
            | CompileError::UnexpectedEof { line, .. }
            | CompileError::Unterminated { line, .. }
            | CompileError::CommentsTooDeep { line, .. }
            | CompileError::TooManyVariables { line }
            | CompileError::TooManySubstitutions { line }
            | CompileError::BadPragma { line, .. }
            | CompileError::Aborted { line, .. } => *line,
        }
    }
}

/// Result type for compiler operations.
pub type CompileResult<T> = std::result::Result<T, CompileError>;
