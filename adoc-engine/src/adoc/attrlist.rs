//! Attribute list parsing
//!
//! Attribute lists are the bracketed argument lists of macros, attribute list
//! lines and include directives: `[quote, "Author", title="Title"]`.
//!
//! Two forms are accepted:
//!
//! - A literal list: positional literals (quoted strings, numbers, `True`,
//!   `False`, `None`) followed by `name=literal` keywords. Strings are unquoted.
//! - Anything else is split on commas into raw positional values (trimmed,
//!   empty values dropped); quotes are kept verbatim in this form.
//!
//! Positional values are named `1`, `2`, …; the whole list is stored as `0`.

use super::attributes::{is_name, AttributeTable};
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?(\d+(\.\d*)?|\.\d+)([eE][-+]?\d+)?$").unwrap());
static KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<key>[A-Za-z_]\w*)\s*=\s*(?P<value>.*)$").unwrap());
static OPTION_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*").unwrap());

/// Update `dict` with the attributes parsed from `attrs`.
pub fn parse_attributes(attrs: &str, dict: &mut AttributeTable) {
    if attrs.is_empty() {
        return;
    }
    dict.set("0", attrs);
    // Line separators become spaces so attribute lists can span lines.
    let s: String = attrs
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    match parse_literal_list(&s) {
        Some((positional, keywords)) => {
            for (i, value) in positional.into_iter().enumerate() {
                if let Some(value) = value {
                    dict.set(&(i + 1).to_string(), value);
                }
            }
            for (key, value) in keywords {
                dict.assign(&key, value);
            }
        }
        None => {
            for (i, value) in s.split(',').map(str::trim).enumerate() {
                if !value.is_empty() {
                    dict.set(&(i + 1).to_string(), value);
                }
            }
        }
    }
}

/// Parse `name="value",…` keyword pairs only. Returns false on invalid syntax.
pub fn parse_named_attributes(s: &str, dict: &mut AttributeTable) -> bool {
    match parse_literal_list(s) {
        Some((positional, keywords)) if positional.is_empty() => {
            for (key, value) in keywords {
                dict.assign(&key, value);
            }
            true
        }
        _ => false,
    }
}

/// Parse a comma separated list of option names. `allowed` empty means any
/// legal name. Returns the offending name on failure.
pub fn parse_options(options: &str, allowed: &[&str]) -> Result<Vec<String>, String> {
    let mut result = Vec::new();
    if options.trim().is_empty() {
        return Ok(result);
    }
    for s in OPTION_SPLIT_RE.split(options.trim()) {
        if (!allowed.is_empty() && !allowed.contains(&s)) || !is_name(s) {
            return Err(s.to_string());
        }
        result.push(s.to_string());
    }
    Ok(result)
}

/// Add an empty `<name>-option` attribute for each name in the `options`
/// attribute.
pub fn option_attributes(dict: &mut AttributeTable) -> Result<(), String> {
    if let Some(options) = dict.get("options").map(str::to_string) {
        for option in parse_options(&options, &[])? {
            dict.set(&format!("{}-option", option), "");
        }
    }
    Ok(())
}

/// Strip surrounding white space and, for strings of three or more
/// characters, enclosing double quotes.
pub fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 3 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

type LiteralList = (Vec<Option<String>>, Vec<(String, Option<String>)>);

fn parse_literal_list(s: &str) -> Option<LiteralList> {
    let items = split_top_level(s)?;
    let mut positional = Vec::new();
    let mut keywords: Vec<(String, Option<String>)> = Vec::new();
    let count = items.len();
    for (i, item) in items.into_iter().enumerate() {
        let item = item.trim();
        if item.is_empty() {
            // A single trailing comma is tolerated, nothing else.
            if i + 1 == count && i > 0 {
                continue;
            }
            return None;
        }
        if let Some(caps) = KEYWORD_RE.captures(item) {
            let value = parse_literal(caps["value"].trim())?;
            let key = caps["key"].to_string();
            if keywords.iter().any(|(k, _)| *k == key) {
                return None;
            }
            keywords.push((key, value));
        } else {
            if !keywords.is_empty() {
                return None;
            }
            positional.push(parse_literal(item)?);
        }
    }
    Some((positional, keywords))
}

/// Split on commas that are outside quoted strings.
fn split_top_level(s: &str) -> Option<Vec<String>> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' {
                    current.push(chars.next()?);
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                ',' => items.push(std::mem::take(&mut current)),
                _ => current.push(c),
            },
        }
    }
    if quote.is_some() {
        return None;
    }
    items.push(current);
    Some(items)
}

/// Parse one literal. `Some(None)` is the `None` literal.
fn parse_literal(s: &str) -> Option<Option<String>> {
    match s {
        "None" => return Some(None),
        "True" | "False" => return Some(Some(s.to_string())),
        _ => {}
    }
    if NUMBER_RE.is_match(s) {
        return Some(Some(s.trim_start_matches('+').to_string()));
    }
    let quote = s.chars().next()?;
    if (quote != '"' && quote != '\'') || s.len() < 2 || !s.ends_with(quote) {
        return None;
    }
    let inner = &s[1..s.len() - 1];
    let mut value = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            // Unescaped quote inside the literal: not a single literal.
            return None;
        }
        if c == '\\' {
            match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('\\') => value.push('\\'),
                Some('\'') => value.push('\''),
                Some('"') => value.push('"'),
                Some(other) => {
                    value.push('\\');
                    value.push(other);
                }
                None => value.push('\\'),
            }
        } else {
            value.push(c);
        }
    }
    Some(Some(value))
}
