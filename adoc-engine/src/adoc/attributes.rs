//! Attribute Table
//!
//! Document attributes are named, string valued and case insensitive. Names are
//! stored lower-cased; a missing entry means "undefined". The same type backs
//! the document wide table and the local override maps handed to the
//! substitution engine (macro arguments, template parameters).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator of OR name lists (`a,b`).
pub const OR: char = ',';
/// Separator of AND name lists (`a+b`).
pub const AND: char = '+';

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\W\d][-\w]*$").unwrap());
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

/// True if `s` is a legal attribute, macro or section name: starts with a
/// letter or underscore and continues with word characters and dashes.
pub fn is_name(s: &str) -> bool {
    NAME_RE.is_match(s)
}

/// True for positional parameter names (`0`, `1`, `2`, …).
pub fn is_numeric_name(s: &str) -> bool {
    NUMERIC_RE.is_match(s)
}

/// Drop characters that can't appear in an attribute name and lower-case the rest.
pub fn symbolize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect::<String>()
        .to_lowercase()
}

/// Case-insensitive mapping from attribute name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeTable {
    entries: BTreeMap<String, String>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Set `name` to `value`, returning the previous value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.entries.insert(name.to_lowercase(), value.into())
    }

    /// Set or, when `value` is `None`, delete.
    pub fn assign(&mut self, name: &str, value: Option<String>) {
        match value {
            Some(value) => {
                self.set(name, value);
            }
            None => {
                self.remove(name);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_lowercase())
    }

    /// Merge every entry of `other` into this table; `other` wins.
    pub fn extend_from(&mut self, other: &AttributeTable) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.entries
    }

    /// Evaluate a name expression against the table.
    ///
    /// - `name` is defined if the attribute is present
    /// - `a,b,c` is defined if any of the names is present
    /// - `a+b+c` is defined if all of the names are present
    pub fn is_defined(&self, expr: &str) -> bool {
        if expr.contains(OR) {
            expr.split(OR).any(|a| self.contains(a.trim()))
        } else if expr.contains(AND) {
            expr.split(AND).all(|a| self.contains(a.trim()))
        } else {
            self.contains(expr.trim())
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for AttributeTable {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut table = AttributeTable::new();
        for (k, v) in iter {
            table.set(k.as_ref(), v);
        }
        table
    }
}

impl From<BTreeMap<String, String>> for AttributeTable {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let mut table = AttributeTable::new();
        table.set("Author", "Joe");
        assert_eq!(table.get("author"), Some("Joe"));
        assert_eq!(table.get("AUTHOR"), Some("Joe"));
        assert!(table.remove("aUtHoR").is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_is_defined_or_and() {
        let table: AttributeTable = [("a", "1")].into_iter().collect();
        assert!(table.is_defined("a"));
        assert!(table.is_defined("a,b"));
        assert!(!table.is_defined("a+b"));
        assert!(!table.is_defined("b"));
        assert!(table.is_defined(" a + a "));
    }

    #[test]
    fn test_is_name() {
        assert!(is_name("foo-bar"));
        assert!(is_name("_x1"));
        assert!(!is_name("1x"));
        assert!(!is_name("a b"));
        assert!(!is_name(""));
        assert!(is_numeric_name("12"));
        assert!(!is_numeric_name("x1"));
    }

    #[test]
    fn test_symbolize() {
        assert_eq!(symbolize(" My Attr! "), "myattr");
        assert_eq!(symbolize("data-uri"), "data-uri");
    }
}
