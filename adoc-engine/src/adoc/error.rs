//! Fatal compile errors
//!
//! Only structural failures abort a compile. Everything recoverable (malformed
//! references, missing include files, failing shell commands, depth limits) is
//! reported through the [message sink](super::message) and the compile goes on.

use super::cursor::Cursor;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The top level input does not exist.
    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Mismatched `endif`, EOF while skipping, illegal include arguments, …
    #[error("{}{message}", location(.cursor))]
    Structural {
        message: String,
        cursor: Option<Cursor>,
    },

    /// Configuration inconsistent with what the engine needs (e.g. no default
    /// paragraph definition).
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("illegal regular expression: {pattern}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

fn location(cursor: &Option<Cursor>) -> String {
    match cursor {
        Some(c) => format!("{}: ", c),
        None => String::new(),
    }
}

impl CompileError {
    pub fn structural(message: impl Into<String>, cursor: Option<Cursor>) -> Self {
        CompileError::Structural {
            message: message.into(),
            cursor,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
