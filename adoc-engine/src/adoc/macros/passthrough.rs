//! Passthrough slots
//!
//! Text that must survive later substitution phases untouched is moved into a
//! side list and replaced by a placeholder token `U+FDD0 index U+FDD1`. The
//! delimiters are Unicode noncharacters, which never occur in sanitized input.
//!
//! Slots are scoped: a pipeline records a [`mark`](Passthroughs::mark) before
//! extracting, restores only the slots pushed after it and truncates back to
//! it, so nested pipelines never clobber each other's slots.

pub const OPEN: char = '\u{FDD0}';
pub const CLOSE: char = '\u{FDD1}';
const REPLACEMENT: char = '\u{FFFD}';

pub fn token(index: usize) -> String {
    format!("{}{}{}", OPEN, index, CLOSE)
}

/// True if `s` contains a placeholder delimiter.
pub fn contains_reserved(s: &str) -> bool {
    s.contains(OPEN) || s.contains(CLOSE)
}

/// Replace placeholder delimiters with U+FFFD.
pub fn sanitize(s: &str) -> String {
    s.replace([OPEN, CLOSE], &REPLACEMENT.to_string())
}

#[derive(Debug, Default, Clone)]
pub struct Passthroughs {
    slots: Vec<String>,
}

impl Passthroughs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> usize {
        self.slots.len()
    }

    /// Stash `text` and return its placeholder token.
    pub fn push(&mut self, text: impl Into<String>) -> String {
        self.slots.push(text.into());
        token(self.slots.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index).map(String::as_str)
    }

    /// Replace the tokens of slots pushed since `mark`. Later slots are
    /// restored first so a slot holding an earlier token resolves fully.
    pub fn restore(&self, text: &str, mark: usize) -> String {
        let mut result = text.to_string();
        for index in (mark..self.slots.len()).rev() {
            let token = token(index);
            if result.contains(&token) {
                result = result.replace(&token, &self.slots[index]);
            }
        }
        result
    }

    /// Drop slots pushed since `mark`.
    pub fn truncate(&mut self, mark: usize) {
        self.slots.truncate(mark);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_only_since_mark() {
        let mut p = Passthroughs::new();
        let outer = p.push("outer");
        let mark = p.mark();
        let inner = p.push("inner");
        let text = format!("{} {}", outer, inner);
        assert_eq!(p.restore(&text, mark), format!("{} inner", outer));
        p.truncate(mark);
        assert_eq!(p.restore(&text, 0), format!("outer {}", inner));
    }

    #[test]
    fn test_nested_tokens_resolve() {
        let mut p = Passthroughs::new();
        let first = p.push("<b>");
        let second = p.push(format!("[{}]", first));
        assert_eq!(p.restore(&second, 0), "[<b>]");
    }

    #[test]
    fn test_sanitize() {
        let s = format!("a{}1{}b", OPEN, CLOSE);
        assert!(contains_reserved(&s));
        assert_eq!(sanitize(&s), "a\u{FFFD}1\u{FFFD}b");
        assert!(!contains_reserved("plain"));
    }
}
