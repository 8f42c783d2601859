//! Inline substitution pipeline
//!
//! Block content is processed by a list of substitution options applied in
//! order. [`subs`] works on whole paragraphs: lines are joined so quotes and
//! macros can span lines, passthroughs are extracted first when `macros` is
//! requested, attribute references are substituted line by line (so one
//! undefined reference drops one line, not the paragraph) and passthroughs
//! are restored last.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use regex::Regex;

use super::attributes::AttributeTable;
use super::attrlist::{parse_attributes, parse_options};
use super::context::Document;
use super::error::{CompileError, CompileResult};
use super::macros::{self, MacroPrefix};
use super::settings::{EngineConfig, Replacement};
use super::substitution::{substitute_line, substitute_lines};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsOption {
    SpecialCharacters,
    Quotes,
    Attributes,
    Replacements,
    Replacements2,
    Replacements3,
    Macros,
    /// Composite: nothing.
    None,
    /// Composite: the configured normal substitutions.
    Normal,
    /// Composite: the configured verbatim substitutions.
    Verbatim,
}

impl SubsOption {
    pub fn name(&self) -> &'static str {
        match self {
            SubsOption::SpecialCharacters => "specialcharacters",
            SubsOption::Quotes => "quotes",
            SubsOption::Attributes => "attributes",
            SubsOption::Replacements => "replacements",
            SubsOption::Replacements2 => "replacements2",
            SubsOption::Replacements3 => "replacements3",
            SubsOption::Macros => "macros",
            SubsOption::None => "none",
            SubsOption::Normal => "normal",
            SubsOption::Verbatim => "verbatim",
        }
    }
}

impl fmt::Display for SubsOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SubsOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "specialcharacters" | "specialchars" => SubsOption::SpecialCharacters,
            "quotes" => SubsOption::Quotes,
            "attributes" => SubsOption::Attributes,
            "replacements" => SubsOption::Replacements,
            "replacements2" => SubsOption::Replacements2,
            "replacements3" => SubsOption::Replacements3,
            "macros" => SubsOption::Macros,
            "none" => SubsOption::None,
            "normal" => SubsOption::Normal,
            "verbatim" => SubsOption::Verbatim,
            _ => return Err(s.to_string()),
        })
    }
}

/// Parse a comma separated substitution list. The error holds the offending
/// option name.
pub fn parse_subs(s: &str) -> Result<Vec<SubsOption>, String> {
    parse_options(s, &[])?
        .iter()
        .map(|o| o.parse())
        .collect()
}

pub fn parse_subs_list(items: &[String]) -> Result<Vec<SubsOption>, String> {
    items.iter().map(|o| o.trim().parse()).collect()
}

/// Compiled inline substitution tables.
#[derive(Debug, Default)]
pub struct InlineTables {
    specialchars: HashMap<char, String>,
    quotes: Vec<Quote>,
    replacements: [Vec<(Regex, String)>; 3],
    normal: Vec<SubsOption>,
    verbatim: Vec<SubsOption>,
}

#[derive(Debug)]
struct Quote {
    regex: Regex,
    tag: String,
    constrained: bool,
}

impl InlineTables {
    pub fn compile(config: &EngineConfig) -> CompileResult<Self> {
        let specialchars = config
            .specialcharacters
            .iter()
            .filter_map(|s| s.character.chars().next().map(|c| (c, s.replacement.clone())))
            .collect();
        let mut quotes = Vec::new();
        for entry in &config.quotes {
            if entry.tag.is_empty() {
                continue;
            }
            quotes.push(compile_quote(&entry.quote, &entry.tag)?);
        }
        let replacements = [
            compile_replacements(&config.replacements)?,
            compile_replacements(&config.replacements2)?,
            compile_replacements(&config.replacements3)?,
        ];
        let syntax = &config.syntax;
        let normal = parse_subs_list(&syntax.subs_normal).map_err(illegal_subs)?;
        let verbatim = parse_subs_list(&syntax.subs_verbatim).map_err(illegal_subs)?;
        Ok(Self {
            specialchars,
            quotes,
            replacements,
            normal,
            verbatim,
        })
    }
}

fn illegal_subs(option: String) -> CompileError {
    CompileError::Configuration(format!("illegal substitution option: {}", option))
}

pub(crate) fn compile_regex(pattern: &str) -> CompileResult<Regex> {
    Regex::new(pattern).map_err(|source| CompileError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

fn compile_replacements(entries: &[Replacement]) -> CompileResult<Vec<(Regex, String)>> {
    entries
        .iter()
        .map(|r| Ok((compile_regex(&r.pattern)?, r.replacement.clone())))
        .collect()
}

fn compile_quote(quote: &str, tag: &str) -> CompileResult<Quote> {
    let (lq, rq) = match quote.find('|') {
        Some(i) if quote != "|" && quote != "||" => (&quote[..i], &quote[i + 1..]),
        _ => (quote, quote),
    };
    let (lq, rq) = (regex::escape(lq), regex::escape(rq));
    let (pattern, tag, constrained) = match tag.strip_prefix('#') {
        Some(tag) => (
            format!(
                r"(?ms)(?P<pre>^|.)(?:\[(?P<attrlist>[^\[\]]+?)\])?(?:{})(?P<content>.+?)(?:{})",
                lq, rq
            ),
            tag,
            false,
        ),
        None => (
            // The text within constrained quotes is bounded by white space or
            // punctuation.
            format!(
                r"(?ms)(?P<pre>^|[^\w;:}}])(?:\[(?P<attrlist>[^\[\]]+?)\])?(?:{})(?P<content>\S|\S.*?\S)(?:{})(?P<post>\W|$)",
                lq, rq
            ),
            tag,
            true,
        ),
    };
    Ok(Quote {
        regex: compile_regex(&pattern)?,
        tag: tag.to_string(),
        constrained,
    })
}

/// Expand composite options.
pub fn canonical(doc: &Document, options: &[SubsOption]) -> Vec<SubsOption> {
    let mut result = Vec::new();
    for option in options {
        match option {
            SubsOption::None => {}
            SubsOption::Normal => result.extend(doc.inline.normal.iter().copied()),
            SubsOption::Verbatim => result.extend(doc.inline.verbatim.iter().copied()),
            other => result.push(*other),
        }
    }
    result
}

/// Apply `options` to a single string, in order.
pub fn subs_1(doc: &mut Document, s: &str, options: &[SubsOption]) -> String {
    if s.is_empty() {
        return String::new();
    }
    let options = if doc.attributes.contains("plaintext") {
        vec![SubsOption::SpecialCharacters]
    } else {
        canonical(doc, options)
    };
    let mut result = s.to_string();
    for option in options {
        let before = result.clone();
        result = match option {
            SubsOption::SpecialCharacters => specialchars(doc, &result),
            SubsOption::Quotes => quotes(doc, &result),
            SubsOption::Attributes => substitute_line(doc, &result, None).unwrap_or_default(),
            SubsOption::Replacements => replacements(doc, &result, 0),
            SubsOption::Replacements2 => replacements(doc, &result, 1),
            SubsOption::Replacements3 => replacements(doc, &result, 2),
            SubsOption::Macros => macros::substitute(doc, &result, MacroPrefix::Inline),
            SubsOption::None | SubsOption::Normal | SubsOption::Verbatim => result,
        };
        trace(doc, option.name(), &before, &result);
        if result.is_empty() {
            break;
        }
    }
    result
}

/// Inline processing of `lines` by `options`.
pub fn subs(
    doc: &mut Document,
    lines: &[String],
    options: &[SubsOption],
) -> CompileResult<Vec<String>> {
    if lines.is_empty() || options.is_empty() {
        return Ok(lines.to_vec());
    }
    let options = if doc.attributes.contains("plaintext") {
        vec![SubsOption::SpecialCharacters]
    } else {
        canonical(doc, options)
    };
    let mark = doc.macros.passthroughs.mark();
    let mut para = lines.join("\n");
    if options.contains(&SubsOption::Macros) {
        para = macros::extract_passthroughs(doc, &para, MacroPrefix::Inline)?;
    }
    for option in &options {
        if *option == SubsOption::Attributes {
            let split: Vec<String> = para.split('\n').map(String::from).collect();
            para = substitute_lines(doc, &split, None).join("\n");
        } else {
            para = subs_1(doc, &para, &[*option]);
        }
    }
    para = doc.macros.passthroughs.restore(&para, mark);
    doc.macros.passthroughs.truncate(mark);
    Ok(para.lines().map(String::from).collect())
}

pub fn specialchars(doc: &Document, s: &str) -> String {
    let table = &doc.inline.specialchars;
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match table.get(&c) {
            Some(r) => result.push_str(r),
            None => result.push(c),
        }
    }
    result
}

fn replacements(doc: &Document, s: &str, section: usize) -> String {
    let mut result = s.to_string();
    for (re, rep) in &doc.inline.replacements[section] {
        result = re.replace_all(&result, rep.as_str()).into_owned();
    }
    result
}

/// Values enclosed in single quotes get normal substitution, quotes removed.
pub fn subs_quoted_values(doc: &mut Document, dict: &mut AttributeTable) {
    for name in dict.names() {
        let value = match dict.get(&name) {
            Some(v) if v.len() >= 2 && v.starts_with('\'') && v.ends_with('\'') => {
                v[1..v.len() - 1].to_string()
            }
            _ => continue,
        };
        let value = subs_1(doc, &value, &[SubsOption::Normal]);
        dict.set(&name, value);
    }
}

/// Mark up quoted text.
pub fn quotes(doc: &mut Document, text: &str) -> String {
    let tables = Rc::clone(&doc.inline);
    let mut text = text.to_string();
    for quote in &tables.quotes {
        let mut pos = 0;
        while pos <= text.len() {
            let caps = match quote.regex.captures_at(&text, pos) {
                Some(caps) => caps,
                None => break,
            };
            let start = caps.get(0).map(|m| m.start()).unwrap_or(pos);
            let pre = caps.name("pre").map(|m| m.as_str()).unwrap_or("");
            if pre == "\\" {
                text.remove(start);
                pos = start + text[start..].chars().next().map(char::len_utf8).unwrap_or(1);
                continue;
            }
            let end = match caps.name("post") {
                Some(post) if quote.constrained => post.start(),
                _ => caps.get(0).map(|m| m.end()).unwrap_or(pos),
            };
            let pre = pre.to_string();
            let content = caps.name("content").map(|m| m.as_str()).unwrap_or("").to_string();
            let mut attrs = AttributeTable::new();
            if let Some(attrlist) = caps.name("attrlist") {
                parse_attributes(attrlist.as_str(), &mut attrs);
            }
            let (stag, etag) = match tag(doc, &quote.tag, &mut attrs) {
                Some(tags) => tags,
                None => {
                    pos = end;
                    continue;
                }
            };
            let s = format!("{}{}{}{}", pre, stag, content, etag);
            text.replace_range(start..end, &s);
            pos = start + s.len();
        }
    }
    text
}

/// Start and end tag `name` from the tags table, substituted against
/// `local`. A missing tag is reported and yields `None`.
pub fn tag(doc: &mut Document, name: &str, local: &mut AttributeTable) -> Option<(String, String)> {
    let value = match doc.config.tags.get(&name.to_lowercase()) {
        Some(value) => value.clone(),
        None => {
            doc.messages.warning(format!("missing tag: {}", name));
            return None;
        }
    };
    let (stag, etag) = match value.rfind('|') {
        Some(i) => (&value[..i], &value[i + 1..]),
        None => (value.as_str(), ""),
    };
    let mut render = |t: &str| -> String {
        if t.is_empty() {
            return String::new();
        }
        substitute_line(doc, t, Some(&mut *local)).unwrap_or_default()
    };
    let stag = render(stag);
    let etag = render(etag);
    Some((stag, etag))
}

/// Set the left margin of a block of lines to `margin` spaces.
pub fn set_margin(lines: &[String], margin: usize) -> Vec<String> {
    let width = lines
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);
    let pad = " ".repeat(margin);
    lines
        .iter()
        .map(|s| format!("{}{}", pad, s.chars().skip(width).collect::<String>()))
        .collect()
}

/// Log before and after text of a substitution when the `trace` attribute
/// (a regular expression) matches `name`.
pub fn trace(doc: &Document, name: &str, before: &str, after: &str) {
    let pattern = match doc.attributes.get("trace") {
        Some(pattern) => pattern,
        None => return,
    };
    let traced = match Regex::new(&format!("^(?:{})", pattern)) {
        Ok(re) => re.is_match(name),
        Err(_) => false,
    };
    if traced && before != after {
        tracing::debug!(target: "adoc::trace", "{}:\nbefore: {}\nafter: {}", name, before, after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adoc::testing::document;
    use rstest::rstest;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(String::from).collect()
    }

    #[test]
    fn test_parse_subs() {
        assert_eq!(
            parse_subs("quotes, macros").unwrap(),
            vec![SubsOption::Quotes, SubsOption::Macros]
        );
        assert_eq!(parse_subs("bogus"), Err("bogus".to_string()));
    }

    #[test]
    fn test_canonical_expands_composites() {
        let doc = document();
        assert_eq!(
            canonical(&doc, &[SubsOption::Verbatim]),
            vec![SubsOption::SpecialCharacters]
        );
        assert!(canonical(&doc, &[SubsOption::None]).is_empty());
        assert_eq!(canonical(&doc, &[SubsOption::Normal]).len(), 6);
    }

    #[rstest]
    #[case("*bold* text", "<strong>bold</strong> text")]
    #[case("an _emphasized_ word", "an <em>emphasized</em> word")]
    #[case("x**y**z", "x<strong>y</strong>z")]
    #[case("a `code` b", "a <code>code</code> b")]
    #[case("snake_case_name", "snake_case_name")]
    #[case(r"\*not bold*", "*not bold*")]
    #[case("[red]#alert#", r#"<span class="red">alert</span>"#)]
    #[case("#plain#", "plain")]
    #[case("E=mc^2^", "E=mc<sup>2</sup>")]
    fn test_quotes(#[case] input: &str, #[case] expected: &str) {
        let mut doc = document();
        assert_eq!(quotes(&mut doc, input), expected);
    }

    #[test]
    fn test_adjacent_quotes_share_boundaries() {
        let mut doc = document();
        assert_eq!(
            quotes(&mut doc, "*a* *b*"),
            "<strong>a</strong> <strong>b</strong>"
        );
    }

    #[test]
    fn test_specialchars_and_replacements() {
        let mut doc = document();
        assert_eq!(
            subs_1(&mut doc, "a < b & (C)", &[SubsOption::SpecialCharacters, SubsOption::Replacements]),
            "a &lt; b &amp; &#169;"
        );
        assert_eq!(
            subs_1(&mut doc, r"\(C) and x--y", &[SubsOption::Replacements]),
            "(C) and x&#8212;y"
        );
    }

    #[test]
    fn test_plaintext_limits_to_specialchars() {
        let mut doc = document();
        doc.attributes.set("plaintext", "");
        let out = subs(&mut doc, &lines("*a* & {b}"), &[SubsOption::Normal]).unwrap();
        assert_eq!(out, vec!["*a* &amp; {b}"]);
    }

    #[test]
    fn test_paragraph_subs_drops_only_bad_lines() {
        let mut doc = document();
        doc.attributes.set("who", "World");
        let out = subs(
            &mut doc,
            &lines("Hello {who}\nmissing {nobody}\nbye"),
            &[SubsOption::Normal],
        )
        .unwrap();
        assert_eq!(out, vec!["Hello World", "bye"]);
    }

    #[test]
    fn test_passthrough_survives_other_phases() {
        let mut doc = document();
        let out = subs(&mut doc, &lines("+++<b>*x*</b>+++ and *y*"), &[SubsOption::Normal]).unwrap();
        assert_eq!(out, vec!["<b>*x*</b> and <strong>y</strong>"]);
        assert!(doc.macros.passthroughs.is_empty());
    }

    #[test]
    fn test_line_break_replacement() {
        let mut doc = document();
        let out = subs(&mut doc, &lines("one +\ntwo"), &[SubsOption::Normal]).unwrap();
        assert_eq!(out, vec!["one<br />", "two"]);
    }

    #[test]
    fn test_set_margin() {
        let block = lines("    a\n      b\n\n    c");
        assert_eq!(set_margin(&block, 0), vec!["a", "  b", "", "c"]);
        assert_eq!(set_margin(&lines("x"), 2), vec!["  x"]);
    }

    #[test]
    fn test_tag_substitutes_attributes() {
        let mut doc = document();
        let mut attrs = AttributeTable::new();
        attrs.set("1", "big");
        assert_eq!(
            tag(&mut doc, "unquoted", &mut attrs),
            Some((r#"<span class="big">"#.to_string(), "</span>".to_string()))
        );
        assert_eq!(tag(&mut doc, "nope", &mut attrs), None);
        assert_eq!(doc.messages.count_matching("missing tag: nope"), 1);
    }
}
