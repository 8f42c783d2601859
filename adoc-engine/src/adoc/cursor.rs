//! Reader cursor
//!
//! A cursor is the `(source, line, text)` triple describing one line handed out
//! by the [reader](super::reader). Cursors travel with pushed-back lines, are
//! attached to diagnostics and key the dispatcher's memoization.

use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct Cursor {
    pub source: String,
    pub line: usize,
    pub text: String,
    /// Set once read-time directive processing produced `text`, so a
    /// pushed-back line is handed out again verbatim.
    #[serde(skip)]
    pub(crate) resolved: bool,
}

impl Cursor {
    pub fn new(source: impl Into<String>, line: usize, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line,
            text: text.into(),
            resolved: false,
        }
    }

    /// Replace the text with a processed result and mark it resolved.
    pub(crate) fn resolve(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.resolved = true;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Base name of the source, used in message prefixes.
    pub fn file_name(&self) -> &str {
        Path::new(&self.source)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.source)
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.line == other.line && self.text == other.text
    }
}

impl Eq for Cursor {}

impl Hash for Cursor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.line.hash(state);
        self.text.hash(state);
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: line {}", self.file_name(), self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_resolution() {
        let a = Cursor::new("doc.txt", 3, "x");
        let mut b = a.clone();
        b.resolved = true;
        assert_eq!(a, b);
    }

    #[test]
    fn test_display_uses_base_name() {
        let c = Cursor::new("/tmp/docs/book.txt", 12, "");
        assert_eq!(c.to_string(), "book.txt: line 12");
    }
}
