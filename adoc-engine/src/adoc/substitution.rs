//! Attribute substitution: the `{…}` reference language
//!
//! Each line goes through five phases, in order, each phase scanning left to
//! right until no further match:
//!
//! 1. `\{` and `\}` are rewritten to `{\` and `}\` so they never match.
//! 2. Simple references `{name}`. Undefined ones are left in place.
//! 3. Conditional references `{name<op>value}`, single names first, then
//!    `a,b` (any defined) and `a+b` (all defined) name lists.
//! 4. A line still holding a simple reference is dropped.
//! 5. System references `{action:args}`, `eval` first, then any action.
//!
//! A dropped line is `None`. Escaped braces are restored at the end.
//!
//! | op | defined | undefined |
//! |----|---------|-----------|
//! | `=` | value of name | `value` |
//! | `?` | `value` | empty |
//! | `!` | empty | `value` |
//! | `#` | `value` | drop line |
//! | `%` | drop line | `value` |
//! | `@` | `name@re:v1[:v2]`: v1 if the value matches, else v2 (or empty) | drop line |
//! | `$` | `name$re:v1[:v2]`, see [`regex_select`] | drop line |

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::attributes::{is_name, is_numeric_name, AttributeTable, AND, OR};
use super::context::Document;
use super::system::{self, ActionOutput, Invocation};

static SIMPLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(?P<name>\w[-\w]*)\}").unwrap());
static CONDITIONAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(?P<name>\w[-\w]*?)(?P<op>[=?!#%@$])(?P<value>(?:[^}]|\}\\)*)\}").unwrap()
});
static CONDITIONAL_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{(?P<name>\w[-\w,+]*?)(?P<op>[=?!#%@$])(?P<value>(?:[^}]|\}\\)*)\}").unwrap()
});
static EVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(?P<action>eval):(?P<expr>(?:[^}]|\}\\)*)\}").unwrap());
static SYSTEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(?P<action>\w[-\w]*):(?P<expr>(?:[^}]|\}\\)*)\}").unwrap());

/// Substitute one line. `None` means the line is dropped.
///
/// `local` entries take precedence over document attributes; its values are
/// themselves substituted against the document first (entries whose value
/// drops are removed).
pub fn substitute_line(
    doc: &mut Document,
    line: &str,
    mut local: Option<&mut AttributeTable>,
) -> Option<String> {
    if let Some(local) = local.as_deref_mut() {
        prepare_local(doc, local);
    }
    substitute_one(doc, line, local)
}

/// Substitute each line, omitting dropped lines.
pub fn substitute_lines(
    doc: &mut Document,
    lines: &[String],
    mut local: Option<&mut AttributeTable>,
) -> Vec<String> {
    if let Some(local) = local.as_deref_mut() {
        prepare_local(doc, local);
    }
    lines
        .iter()
        .filter_map(|line| substitute_one(doc, line, local.as_deref_mut()))
        .collect()
}

fn prepare_local(doc: &mut Document, local: &mut AttributeTable) {
    for name in local.names() {
        let value = local.get(&name).unwrap_or_default().to_string();
        local.assign(&name, substitute_one(doc, &value, None));
    }
}

fn lookup(doc: &Document, local: Option<&AttributeTable>, name: &str) -> Option<String> {
    if let Some(local) = local {
        if let Some(value) = local.get(name) {
            return Some(value.to_string());
        }
        // Positional document attributes would clash with macro arguments.
        if is_numeric_name(name) {
            return None;
        }
    }
    doc.attributes.get(name).map(str::to_string)
}

fn substitute_one(
    doc: &mut Document,
    line: &str,
    mut local: Option<&mut AttributeTable>,
) -> Option<String> {
    let mut line = line.replace("\\{", "{\\").replace("\\}", "}\\");

    let mut pos = 0;
    while let Some(caps) = find_unescaped(&SIMPLE_RE, &line, pos) {
        let m = whole(&caps);
        match lookup(doc, local.as_deref(), &caps["name"]) {
            Some(value) => {
                let start = m.start();
                line.replace_range(m.range(), &value);
                pos = start + value.len();
            }
            None => pos = m.end(),
        }
    }

    for (re, list) in [(&*CONDITIONAL_RE, false), (&*CONDITIONAL_LIST_RE, true)] {
        let mut pos = 0;
        while let Some(caps) = find_unescaped(re, &line, pos) {
            let start = whole(&caps).start();
            let end = match end_brace(&line, start) {
                Some(end) => end,
                None => {
                    pos = start + 1;
                    continue;
                }
            };
            let value_start = caps.name("value").map(|m| m.start()).unwrap_or(start);
            let reference = line[start..end].to_string();
            let rval = line[value_start..end - 1].to_string();
            let name = caps["name"].to_string();
            let op = caps["op"].chars().next().unwrap_or('=');
            let lval = if list {
                list_value(doc, local.as_deref(), &name, &reference)
            } else {
                lookup(doc, local.as_deref(), &name)
            };
            let text = match conditional(doc, &reference, lval, op, &rval) {
                Some(text) => text,
                None => {
                    tracing::debug!("dropped line: {}", line);
                    return None;
                }
            };
            line.replace_range(start..end, &text);
            pos = start + text.len();
        }
    }

    if find_unescaped(&SIMPLE_RE, &line, 0).is_some() {
        tracing::debug!("dropped line: {}", line);
        return None;
    }

    for re in [&*EVAL_RE, &*SYSTEM_RE] {
        let mut pos = 0;
        while let Some(caps) = find_unescaped(re, &line, pos) {
            let range = whole(&caps).range();
            let action = caps["action"].to_string();
            let args = caps["expr"].replace("{\\", "{").replace("}\\", "}");
            let text = match system::evaluate(
                doc,
                &action,
                &args,
                Invocation::Inline,
                local.as_deref_mut(),
            ) {
                ActionOutput::Text(text) => text,
                ActionOutput::Rejected => String::new(),
                ActionOutput::Suppress => return None,
            };
            let start = range.start;
            line.replace_range(range, &text);
            pos = start + text.len();
        }
    }

    Some(line.replace("{\\", "{").replace("}\\", "}"))
}

fn whole<'t>(caps: &Captures<'t>) -> regex::Match<'t> {
    caps.get(0).expect("group 0 always participates")
}

/// Next match at or after `pos` whose closing brace is not followed by a
/// backslash.
fn find_unescaped<'t>(re: &Regex, text: &'t str, mut pos: usize) -> Option<Captures<'t>> {
    while pos <= text.len() {
        let caps = re.captures_at(text, pos)?;
        let m = whole(&caps);
        if text[m.end()..].starts_with('\\') {
            // Braces are ASCII so the next byte is a char boundary.
            pos = m.start() + 1;
            continue;
        }
        return Some(caps);
    }
    None
}

/// Index just past the brace matching the one at `start`. Braces followed by
/// a backslash are not counted.
fn end_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for i in start..bytes.len() {
        if bytes.get(i + 1) != Some(&b'\\') {
            match bytes[i] {
                b'{' => depth += 1,
                b'}' => depth -= 1,
                _ => {}
            }
        }
        if depth == 0 {
            return Some(i + 1);
        }
    }
    None
}

/// Value of an OR or AND name list: empty if the condition holds.
fn list_value(
    doc: &mut Document,
    local: Option<&AttributeTable>,
    names: &str,
    reference: &str,
) -> Option<String> {
    let sep = if names.contains(OR) { OR } else { AND };
    let names: Vec<&str> = names
        .split(sep)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    if names.iter().any(|n| !is_name(n)) {
        doc.messages
            .error(format!("illegal attribute syntax: {}", reference));
    }
    let holds = if sep == OR {
        names.iter().any(|n| lookup(doc, local, n).is_some())
    } else {
        names.iter().all(|n| lookup(doc, local, n).is_some())
    };
    holds.then(String::new)
}

/// Apply a conditional operator. `None` drops the line.
fn conditional(
    doc: &mut Document,
    reference: &str,
    lval: Option<String>,
    op: char,
    rval: &str,
) -> Option<String> {
    match (lval, op) {
        (None, '=' | '!' | '%') => Some(rval.to_string()),
        (None, '?') => Some(String::new()),
        (None, _) => None,
        (Some(v), '=') => Some(v),
        (Some(_), '?' | '#') => Some(rval.to_string()),
        (Some(_), '!') => Some(String::new()),
        (Some(_), '%') => None,
        (Some(v), op) => regex_select(doc, reference, &v, op == '$', rval),
    }
}

/// `name@re:v1[:v2]` and `name$re:v1[:v2]` against a defined value.
///
/// With `@` a match yields v1, otherwise v2 or empty. With `$`:
/// `re:v1` yields v1 on a match and drops otherwise, `re::v2` drops on a
/// match and yields v2 otherwise, `re:v1:v2` selects like `@`.
fn regex_select(
    doc: &mut Document,
    reference: &str,
    value: &str,
    swapped: bool,
    rval: &str,
) -> Option<String> {
    let parts: Vec<String> = split_unescaped_colons(rval)
        .into_iter()
        .map(|s| s.replace("\\:", ":"))
        .collect();
    if parts.len() != 2 && parts.len() != 3 {
        doc.messages
            .error(format!("illegal attribute syntax: {}", reference));
        return Some(String::new());
    }
    let re = match Regex::new(&format!("^(?:{})$", parts[0])) {
        Ok(re) => re,
        Err(_) => {
            doc.messages
                .error(format!("illegal attribute regexp: {}", reference));
            return Some(String::new());
        }
    };
    let matched = re.is_match(value);
    let v1 = parts[1].clone();
    let v2 = parts.get(2).cloned();
    match (swapped, matched, v2) {
        (false, true, _) => Some(v1),
        (false, false, v2) => Some(v2.unwrap_or_default()),
        (true, true, Some(_)) if v1.is_empty() => None,
        (true, true, _) => Some(v1),
        (true, false, Some(v2)) => Some(v2),
        (true, false, None) => None,
    }
}

fn split_unescaped_colons(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev = None;
    for (i, c) in s.char_indices() {
        if c == ':' && prev != Some('\\') {
            parts.push(&s[start..i]);
            start = i + 1;
        }
        prev = Some(c);
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adoc::testing::document;
    use rstest::rstest;

    fn subst(doc: &mut Document, line: &str) -> Option<String> {
        substitute_line(doc, line, None)
    }

    fn doc_with(attrs: &[(&str, &str)]) -> Document {
        let mut doc = document();
        for (k, v) in attrs {
            doc.attributes.set(k, *v);
        }
        doc
    }

    #[rstest]
    #[case("{x=dflt}", "1")]
    #[case("{y=dflt}", "dflt")]
    #[case("[{x?set}]", "[set]")]
    #[case("[{y?set}]", "[]")]
    #[case("[{x!unset}]", "[]")]
    #[case("[{y!unset}]", "[unset]")]
    #[case("{x#kept}", "kept")]
    #[case("{y%kept}", "kept")]
    #[case("{x,y?any}", "any")]
    #[case("[{x+y?all}]", "[]")]
    #[case("{x@\\d+:num:other}", "num")]
    #[case("{x@[a-z]+:word}", "")]
    #[case("{x$\\d+:num}", "num")]
    #[case("{x$[a-z]::v2}", "v2")]
    #[case("{y={x}}", "1")]
    fn test_conditional_operators(#[case] line: &str, #[case] expected: &str) {
        let mut doc = doc_with(&[("x", "1")]);
        assert_eq!(subst(&mut doc, line).as_deref(), Some(expected));
    }

    #[rstest]
    #[case("{y#kept}")]
    #[case("{x%kept}")]
    #[case("{y@a:b}")]
    #[case("{x$\\d::v2}")]
    #[case("{x$[a-z]:v1}")]
    #[case("see {undefined} here")]
    fn test_dropping_references(#[case] line: &str) {
        let mut doc = doc_with(&[("x", "1")]);
        assert_eq!(subst(&mut doc, line), None);
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let mut doc = doc_with(&[("x", "1")]);
        assert_eq!(subst(&mut doc, r"\{x} {x}").as_deref(), Some("{x} 1"));
        assert_eq!(subst(&mut doc, r"\{undefined\}").as_deref(), Some("{undefined}"));
    }

    #[test]
    fn test_colon_escape_in_regex_select() {
        let mut doc = doc_with(&[("t", "a:b")]);
        assert_eq!(subst(&mut doc, r"{t@a\:b:yes:no}").as_deref(), Some("yes"));
    }

    #[test]
    fn test_illegal_regex_select_is_reported() {
        let mut doc = doc_with(&[("x", "1")]);
        assert_eq!(subst(&mut doc, "[{x@(:a}]").as_deref(), Some("[]"));
        assert_eq!(doc.messages.count_matching("illegal attribute regexp"), 1);
        assert_eq!(subst(&mut doc, "[{x@a:b:c:d}]").as_deref(), Some("[]"));
        assert_eq!(doc.messages.count_matching("illegal attribute syntax"), 1);
    }

    #[test]
    fn test_local_values_take_precedence() {
        let mut doc = doc_with(&[("target", "doc"), ("1", "positional")]);
        let mut local = AttributeTable::new();
        local.set("target", "local {target}");
        assert_eq!(
            substitute_line(&mut doc, "{target}", Some(&mut local)).as_deref(),
            Some("local doc")
        );
        assert_eq!(substitute_line(&mut doc, "[{1=none}]", Some(&mut local)).as_deref(), Some("[none]"));
        assert_eq!(subst(&mut doc, "{1}").as_deref(), Some("positional"));
    }

    #[test]
    fn test_local_values_that_drop_are_removed() {
        let mut doc = document();
        let mut local = AttributeTable::new();
        local.set("a", "{missing}");
        assert_eq!(
            substitute_line(&mut doc, "[{a=gone}]", Some(&mut local)).as_deref(),
            Some("[gone]")
        );
        assert!(!local.contains("a"));
    }

    #[test]
    fn test_counter_is_visible_to_later_lines() {
        let mut doc = document();
        let mut local = AttributeTable::new();
        let lines = vec!["{counter:n} {counter:n}".to_string(), "{n}".to_string()];
        assert_eq!(
            substitute_lines(&mut doc, &lines, Some(&mut local)),
            vec!["1 2", "2"]
        );
        assert_eq!(local.get("n"), Some("2"));
    }

    #[test]
    fn test_unknown_action_is_removed_but_line_kept() {
        let mut doc = document();
        assert_eq!(subst(&mut doc, "a{bogus:x}b").as_deref(), Some("ab"));
        assert_eq!(doc.messages.count_matching("illegal system attribute name: bogus"), 1);
    }

    #[test]
    fn test_eval_false_drops_line() {
        let mut doc = document();
        assert_eq!(subst(&mut doc, "x{eval:1 == 2}"), None);
        assert_eq!(subst(&mut doc, "x{eval:1 == 1}").as_deref(), Some("x"));
    }

    #[test]
    fn test_substitute_lines_omits_dropped() {
        let mut doc = doc_with(&[("a", "A")]);
        let lines = vec!["{a}".to_string(), "{b}".to_string(), "c".to_string()];
        assert_eq!(substitute_lines(&mut doc, &lines, None), vec!["A", "c"]);
    }

    #[test]
    fn test_end_brace_skips_escaped() {
        assert_eq!(end_brace("{a{b}}", 0), Some(6));
        assert_eq!(end_brace("{a}\\}", 0), Some(5));
        assert_eq!(end_brace("{a", 0), None);
    }
}
