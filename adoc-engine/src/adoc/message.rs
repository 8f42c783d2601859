//! Diagnostics sink
//!
//! Collects `(severity, message, cursor)` triples for the caller and mirrors
//! each one to `tracing`. Messages are positioned at the reader's current
//! cursor unless an explicit cursor is given. Identical consecutive messages
//! are reported once.

use super::cursor::Cursor;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Deprecated,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Deprecated => write!(f, "DEPRECATED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub cursor: Option<Cursor>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cursor {
            Some(c) => write!(f, "{}: {}: {}", self.severity, c, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[derive(Debug)]
pub struct Messages {
    diagnostics: Vec<Diagnostic>,
    cursor: Option<Cursor>,
    /// Set to false while reading configuration-like input without line numbers.
    pub linenos: bool,
}

impl Messages {
    pub fn new() -> Self {
        Self {
            diagnostics: Vec::new(),
            cursor: None,
            linenos: true,
        }
    }

    /// Track the reader position used for messages without an explicit cursor.
    pub fn set_cursor(&mut self, cursor: Option<Cursor>) {
        self.cursor = cursor;
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn warning(&mut self, msg: impl Into<String>) {
        let cursor = self.position();
        self.push(Severity::Warning, msg.into(), cursor);
    }

    /// Non-fatal error: reported, the compile continues.
    pub fn error(&mut self, msg: impl Into<String>) {
        let cursor = self.position();
        self.push(Severity::Error, msg.into(), cursor);
    }

    pub fn error_at(&mut self, msg: impl Into<String>, cursor: Option<Cursor>) {
        self.push(Severity::Error, msg.into(), cursor);
    }

    /// Something safe mode refused to do.
    pub fn unsafe_(&mut self, msg: impl AsRef<str>) {
        self.error(format!("unsafe: {}", msg.as_ref()));
    }

    pub fn deprecated(&mut self, msg: impl Into<String>) {
        let cursor = self.position();
        self.push(Severity::Deprecated, msg.into(), cursor);
    }

    /// Progress information; only logged, never collected.
    pub fn verbose(&self, msg: impl AsRef<str>) {
        match &self.cursor {
            Some(c) if self.linenos => tracing::debug!("{}: {}", c, msg.as_ref()),
            _ => tracing::debug!("{}", msg.as_ref()),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning)
    }

    /// Count of collected diagnostics whose message contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.message.contains(needle))
            .count()
    }

    fn position(&self) -> Option<Cursor> {
        if self.linenos {
            self.cursor.clone()
        } else {
            None
        }
    }

    fn push(&mut self, severity: Severity, message: String, cursor: Option<Cursor>) {
        let diagnostic = Diagnostic {
            severity,
            message,
            cursor,
        };
        if self.diagnostics.last() == Some(&diagnostic) {
            return;
        }
        match severity {
            Severity::Error => tracing::error!("{}", diagnostic),
            Severity::Warning | Severity::Deprecated => tracing::warn!("{}", diagnostic),
        }
        self.diagnostics.push(diagnostic);
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_use_current_cursor() {
        let mut messages = Messages::new();
        messages.set_cursor(Some(Cursor::new("doc.txt", 7, "x")));
        messages.warning("include file not found: a.txt");
        let d = &messages.diagnostics()[0];
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.cursor.as_ref().map(|c| c.line), Some(7));
        assert_eq!(
            d.to_string(),
            "WARNING: doc.txt: line 7: include file not found: a.txt"
        );
    }

    #[test]
    fn test_repeated_messages_are_suppressed() {
        let mut messages = Messages::new();
        messages.warning("same");
        messages.warning("same");
        messages.warning("other");
        messages.warning("same");
        assert_eq!(messages.diagnostics().len(), 3);
    }

    #[test]
    fn test_unsafe_is_an_error() {
        let mut messages = Messages::new();
        messages.unsafe_("{sys:ls}");
        assert!(messages.has_errors());
        assert_eq!(messages.diagnostics()[0].message, "unsafe: {sys:ls}");
    }
}
