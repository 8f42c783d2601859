//! System action evaluator
//!
//! System actions are invoked inline as `{name:args}` or as a read-time
//! directive `name::[args]`. Directive arguments are attribute substituted
//! first. In safe mode everything except `include` and `include1` is refused.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::attributes::{is_name, AttributeTable};
use super::context::Document;
use super::expression;
use super::reader::{expand_tabs, is_inside};
use super::shell;
use super::substitution::{substitute_line, substitute_lines};

const ACTIONS: &[&str] = &[
    "eval", "eval3", "sys", "sys2", "sys3", "include", "include1", "counter", "counter2", "set",
    "set2", "template",
];

static NAME_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(?P<attr>[^:]*?)(:(?P<value>.*))?$").unwrap());
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// `{name:args}`
    Inline,
    /// `name::[args]`
    Directive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutput {
    Text(String),
    /// Drop the line holding the reference.
    Suppress,
    /// Unknown action name.
    Rejected,
}

/// Evaluate system action `name`. `local` receives `counter`/`set` updates.
pub fn evaluate(
    doc: &mut Document,
    name: &str,
    args: &str,
    invocation: Invocation,
    local: Option<&mut AttributeTable>,
) -> ActionOutput {
    if !ACTIONS.contains(&name) {
        let kind = match invocation {
            Invocation::Inline => "attribute",
            Invocation::Directive => "macro",
        };
        doc.messages
            .warning(format!("illegal system {} name: {}", kind, name));
        return ActionOutput::Rejected;
    }
    let (args, separator) = match invocation {
        Invocation::Inline => (args.to_string(), doc.config.settings.newline.clone()),
        Invocation::Directive => match substitute_line(doc, args, None) {
            Some(args) => (args, "\n".to_string()),
            None => {
                doc.messages.warning(format!(
                    "skipped {}: undefined attribute in: {}",
                    name, args
                ));
                return ActionOutput::Suppress;
            }
        },
    };
    let syntax = match invocation {
        Invocation::Inline => format!("{{{}:{}}}", name, args),
        Invocation::Directive => format!("{}::[{}]", name, args),
    };
    if name != "include1" {
        doc.messages.verbose(format!("evaluating: {}", syntax));
    }
    if doc.config.settings.safe && name != "include" && name != "include1" {
        doc.messages.unsafe_(&syntax);
        return ActionOutput::Suppress;
    }
    let action = Action {
        name,
        args: &args,
        syntax: &syntax,
        separator: &separator,
    };
    let result = match name {
        "eval" | "eval3" => action.eval(doc),
        "sys" | "sys2" | "sys3" => action.sys(doc),
        "counter" | "counter2" => action.counter(doc, local),
        "set" | "set2" => action.set(doc, local),
        "include" => action.include(doc),
        "include1" => action.include1(doc),
        _ => action.template(doc),
    };
    match result {
        Some(text) if !text.is_empty() && (name == "eval3" || name == "sys3") => {
            ActionOutput::Text(doc.macros.passthroughs.push(text))
        }
        Some(text) => ActionOutput::Text(text),
        None => ActionOutput::Suppress,
    }
}

struct Action<'a> {
    name: &'a str,
    args: &'a str,
    syntax: &'a str,
    separator: &'a str,
}

impl Action<'_> {
    fn eval(&self, doc: &mut Document) -> Option<String> {
        match expression::evaluate(self.args) {
            Ok(value) => expression::to_text(&value),
            Err(e) => {
                tracing::debug!("{}: {}", self.syntax, e);
                doc.messages
                    .warning(format!("{}: evaluation error", self.syntax));
                None
            }
        }
    }

    fn sys(&self, doc: &mut Document) -> Option<String> {
        match shell::run(self.args, self.name == "sys2") {
            Ok(output) => {
                if !output.success {
                    doc.messages
                        .warning(format!("{}: non-zero exit status", self.syntax));
                }
                Some(output.lines.join(self.separator))
            }
            Err(e) => {
                doc.messages.warning(format!("{}: {}", self.syntax, e));
                None
            }
        }
    }

    fn counter(&self, doc: &mut Document, local: Option<&mut AttributeTable>) -> Option<String> {
        let (attr, seed) = split_name_value(self.args);
        if let Some(seed) = seed.filter(|s| !s.is_empty()) {
            if !DIGITS_RE.is_match(seed) && seed.chars().count() > 1 {
                doc.messages
                    .warning(format!("{}: illegal counter seed: {}", self.syntax, seed));
                return None;
            }
        }
        if !is_name(attr) {
            doc.messages
                .warning(format!("{}: illegal attribute name", self.syntax));
            return None;
        }
        let result = match doc.attributes.get(attr).filter(|v| !v.is_empty()) {
            Some(value) => match next_counter_value(value) {
                Some(next) => next,
                None => {
                    doc.messages.warning(format!(
                        "{}: illegal counter value: {}",
                        self.syntax, value
                    ));
                    return None;
                }
            },
            None => match seed {
                Some(seed) if !seed.is_empty() => seed.to_string(),
                _ => "1".to_string(),
            },
        };
        doc.attributes.set(attr, result.clone());
        if let Some(local) = local {
            local.set(attr, result.clone());
        }
        if self.name == "counter2" {
            Some(String::new())
        } else {
            Some(result)
        }
    }

    fn set(&self, doc: &mut Document, local: Option<&mut AttributeTable>) -> Option<String> {
        let (attr, value) = split_name_value(self.args);
        let (attr, value) = match attr.strip_suffix('!') {
            Some(attr) => (attr, None),
            None => (attr, Some(value.unwrap_or_default().to_string())),
        };
        if !is_name(attr) {
            doc.messages
                .warning(format!("{}: illegal attribute name", self.syntax));
        } else {
            if let Some(local) = local {
                local.assign(attr, value.clone());
            }
            if self.name != "set2" {
                doc.attributes.assign(attr, value.clone());
            }
        }
        value.map(|_| String::new())
    }

    fn include(&self, doc: &mut Document) -> Option<String> {
        let indir = doc.attributes.get("indir").map(PathBuf::from);
        let mut path = PathBuf::from(self.args);
        if path.is_relative() {
            if let Some(dir) = &indir {
                path = dir.join(path);
            }
        }
        if !path.exists() {
            doc.messages
                .warning(format!("{}: file does not exist", self.syntax));
            return None;
        }
        let dir = indir.unwrap_or_else(|| PathBuf::from("."));
        if doc.config.settings.safe && !is_inside(&path, &dir) {
            doc.messages.unsafe_(self.syntax);
            return None;
        }
        let lines = match read_lines(&path) {
            Ok(lines) => lines,
            Err(e) => {
                doc.messages.warning(format!("{}: {}", self.syntax, e));
                return None;
            }
        };
        if lines.is_empty() {
            return Some(String::new());
        }
        let lines = substitute_lines(doc, &lines, None);
        Some(expand_tabs(&lines.join(self.separator), doc.tabsize))
    }

    fn include1(&self, doc: &mut Document) -> Option<String> {
        match doc.include1.get(self.args) {
            Some(lines) => Some(lines.join(self.separator)),
            None => {
                doc.messages
                    .warning(format!("{}: include1 file not loaded", self.syntax));
                None
            }
        }
    }

    fn template(&self, doc: &mut Document) -> Option<String> {
        let lines = match doc.section(self.args) {
            Some(lines) => lines.to_vec(),
            None => {
                doc.messages
                    .warning(format!("{}: template does not exist", self.syntax));
                return None;
            }
        };
        Some(substitute_lines(doc, &lines, None).join("\n"))
    }
}

fn split_name_value(args: &str) -> (&str, Option<&str>) {
    match NAME_VALUE_RE.captures(args) {
        Some(caps) => (
            caps.name("attr").map(|m| m.as_str()).unwrap_or_default(),
            caps.name("value").map(|m| m.as_str()),
        ),
        None => (args, None),
    }
}

/// Numbers increment, single characters advance to the next character.
fn next_counter_value(value: &str) -> Option<String> {
    if DIGITS_RE.is_match(value) {
        return value.parse::<u128>().ok().map(|n| (n + 1).to_string());
    }
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => char::from_u32(c as u32 + 1).map(String::from),
        _ => None,
    }
}

fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(|s| s.trim_end().to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adoc::testing::{document, safe_document};
    use std::fs;

    fn inline(doc: &mut Document, name: &str, args: &str) -> ActionOutput {
        evaluate(doc, name, args, Invocation::Inline, None)
    }

    fn text(s: &str) -> ActionOutput {
        ActionOutput::Text(s.to_string())
    }

    #[test]
    fn test_counter_sequences() {
        let mut doc = document();
        assert_eq!(inline(&mut doc, "counter", "n"), text("1"));
        assert_eq!(inline(&mut doc, "counter", "n"), text("2"));
        assert_eq!(inline(&mut doc, "counter", "c:a"), text("a"));
        assert_eq!(inline(&mut doc, "counter", "c:a"), text("b"));
        assert_eq!(inline(&mut doc, "counter2", "m:5"), text(""));
        assert_eq!(doc.attributes.get("m"), Some("5"));
    }

    #[test]
    fn test_counter_rejects_bad_seed_and_name() {
        let mut doc = document();
        assert_eq!(inline(&mut doc, "counter", "n:ab"), ActionOutput::Suppress);
        assert_eq!(inline(&mut doc, "counter", "1n"), ActionOutput::Suppress);
        doc.attributes.set("w", "word");
        assert_eq!(inline(&mut doc, "counter", "w"), ActionOutput::Suppress);
        assert_eq!(doc.messages.count_matching("illegal counter"), 2);
    }

    #[test]
    fn test_counter_updates_local_map() {
        let mut doc = document();
        let mut local = AttributeTable::new();
        evaluate(&mut doc, "counter", "n:7", Invocation::Inline, Some(&mut local));
        assert_eq!(local.get("n"), Some("7"));
    }

    #[test]
    fn test_set_and_set2() {
        let mut doc = document();
        let mut local = AttributeTable::new();
        assert_eq!(
            evaluate(&mut doc, "set", "a:1", Invocation::Inline, Some(&mut local)),
            text("")
        );
        assert_eq!(doc.attributes.get("a"), Some("1"));
        assert_eq!(
            evaluate(&mut doc, "set2", "b:2", Invocation::Inline, Some(&mut local)),
            text("")
        );
        assert_eq!(doc.attributes.get("b"), None);
        assert_eq!(local.get("b"), Some("2"));
        assert_eq!(inline(&mut doc, "set", "a!"), ActionOutput::Suppress);
        assert!(!doc.attributes.contains("a"));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let mut doc = document();
        assert_eq!(inline(&mut doc, "nope", ""), ActionOutput::Rejected);
        assert_eq!(
            evaluate(&mut doc, "nope", "", Invocation::Directive, None),
            ActionOutput::Rejected
        );
        assert_eq!(doc.messages.count_matching("illegal system macro name: nope"), 1);
    }

    #[test]
    fn test_directive_args_are_substituted() {
        let mut doc = document();
        doc.attributes.set("x", "20");
        assert_eq!(
            evaluate(&mut doc, "eval", "{x}+1", Invocation::Directive, None),
            text("21")
        );
        assert_eq!(
            evaluate(&mut doc, "eval", "{y}+1", Invocation::Directive, None),
            ActionOutput::Suppress
        );
        assert_eq!(doc.messages.count_matching("skipped eval: undefined attribute"), 1);
    }

    #[test]
    fn test_eval_error_warns() {
        let mut doc = document();
        assert_eq!(inline(&mut doc, "eval", "1 +"), ActionOutput::Suppress);
        assert_eq!(doc.messages.count_matching("evaluation error"), 1);
    }

    #[test]
    fn test_eval3_wraps_result_as_passthrough() {
        let mut doc = document();
        let out = inline(&mut doc, "eval3", "'<b>'");
        let token = match out {
            ActionOutput::Text(token) => token,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(doc.macros.passthroughs.restore(&token, 0), "<b>");
    }

    #[test]
    fn test_safe_mode_refuses_execution() {
        let mut doc = safe_document();
        assert_eq!(inline(&mut doc, "sys", "echo hi"), ActionOutput::Suppress);
        assert_eq!(inline(&mut doc, "eval", "1"), ActionOutput::Suppress);
        assert_eq!(doc.messages.count_matching("unsafe: {sys:echo hi}"), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_sys_joins_lines_and_warns_on_failure() {
        let mut doc = document();
        assert_eq!(inline(&mut doc, "sys", "printf 'a\\nb\\n'"), text("a\nb"));
        assert_eq!(inline(&mut doc, "sys", "echo x; false"), text("x"));
        assert_eq!(doc.messages.count_matching("non-zero exit status"), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_sys2_captures_redirected_stderr() {
        let mut doc = document();
        assert_eq!(inline(&mut doc, "sys2", "echo oops >&2"), text("oops"));
        assert_eq!(inline(&mut doc, "sys", "echo oops >&2"), text(""));
    }

    #[test]
    fn test_include_reads_relative_to_indir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("part.txt"), "{greeting}\n\tworld\n").unwrap();
        let mut doc = document();
        doc.attributes
            .set("indir", dir.path().to_string_lossy().into_owned());
        doc.attributes.set("greeting", "hello");
        doc.tabsize = 4;
        assert_eq!(inline(&mut doc, "include", "part.txt"), text("hello\n    world"));
        assert_eq!(inline(&mut doc, "include", "missing.txt"), ActionOutput::Suppress);
        assert_eq!(doc.messages.count_matching("file does not exist"), 1);
    }

    #[test]
    fn test_template_renders_section() {
        let mut doc = document();
        doc.config
            .sections
            .insert("greeting".to_string(), vec!["Hello {who}".to_string(), "{nobody}".to_string()]);
        doc.attributes.set("who", "you");
        assert_eq!(inline(&mut doc, "template", "greeting"), text("Hello you"));
        assert_eq!(inline(&mut doc, "template", "nope"), ActionOutput::Suppress);
    }

    #[test]
    fn test_next_counter_value() {
        assert_eq!(next_counter_value("9").as_deref(), Some("10"));
        assert_eq!(next_counter_value("z").as_deref(), Some("{"));
        assert_eq!(next_counter_value("zz"), None);
    }
}
