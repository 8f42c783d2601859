//! Section titles
//!
//! Titles come in two forms. A one line title matches one of the per level
//! patterns (`== Title`). A two line title is a text line followed by an
//! underline made of a repeated two character pair, the pair selecting the
//! level:
//!
//! ```text
//! Chapter One
//! -----------
//! ```
//!
//! The underline length must be within two characters of the title length.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::attributes::AttributeTable;
use super::error::{CompileError, CompileResult};
use super::message::Messages;
use super::settings::Syntax;
use super::subs::{compile_regex, parse_subs_list, SubsOption};

/// Title levels 0-4.
pub const LEVELS: usize = 5;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w").unwrap());
static NON_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").unwrap());

#[derive(Debug)]
pub struct TitleDefinitions {
    single: Vec<Regex>,
    section: Option<Regex>,
    underlines: Vec<String>,
    pub subs: Vec<SubsOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TitleMatch {
    /// Named groups of the matching pattern plus `title` and `level`.
    pub attributes: AttributeTable,
    pub level: i64,
    /// Source lines taken by the title (1 or 2).
    pub linecount: usize,
}

impl TitleDefinitions {
    pub fn compile(syntax: &Syntax) -> CompileResult<Self> {
        let malformed = |what: &str| CompileError::Configuration(format!("malformed titles {} entry", what));
        if syntax.underlines.len() != LEVELS || syntax.underlines.iter().any(|u| u.chars().count() != 2) {
            return Err(malformed("underlines"));
        }
        let single = syntax
            .single_line_titles
            .iter()
            .take(LEVELS)
            .map(|p| compile_regex(p))
            .collect::<CompileResult<Vec<_>>>()?;
        let section = match syntax.section_title.as_str() {
            "" => None,
            pattern => Some(compile_regex(pattern)?),
        };
        let subs = parse_subs_list(&syntax.title_subs).map_err(|_| malformed("subs"))?;
        Ok(Self {
            single,
            section,
            underlines: syntax.underlines.clone(),
            subs,
        })
    }

    /// Parse a title at the start of `lines`. `leveloffset` is added to the
    /// level when it parses as an integer.
    pub fn parse(&self, lines: &[String], leveloffset: Option<&str>, messages: &mut Messages) -> Option<TitleMatch> {
        let first = lines.first().filter(|l| !l.is_empty())?;
        let (mut attributes, level, linecount) = self
            .parse_single(first)
            .or_else(|| self.parse_double(lines))?;
        if !attributes.contains("title") {
            messages.warning("title pattern has no title group");
            attributes.set("title", first.as_str());
        }
        let offset = leveloffset
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let level = level as i64 + offset;
        attributes.set("level", level.to_string());
        Some(TitleMatch {
            attributes,
            level,
            linecount,
        })
    }

    fn parse_single(&self, line: &str) -> Option<(AttributeTable, usize, usize)> {
        self.single.iter().enumerate().find_map(|(level, re)| {
            let caps = re.captures(line).filter(|c| c.get(0).map_or(false, |m| m.start() == 0))?;
            Some((groups(re, &caps), level, 1))
        })
    }

    fn parse_double(&self, lines: &[String]) -> Option<(AttributeTable, usize, usize)> {
        let section = self.section.as_ref()?;
        let (title, underline) = match lines {
            [title, underline, ..] => (title, underline),
            _ => return None,
        };
        let ul_len = underline.chars().count() as i64;
        if ul_len < 2 {
            return None;
        }
        let pair: String = underline.chars().take(2).collect();
        let level = self.underlines.iter().position(|u| *u == pair)?;
        let title_len = title.chars().count() as i64;
        if !(ul_len - 3 < title_len && title_len < ul_len + 3) {
            return None;
        }
        let repeated: String = pair.repeat(((ul_len + 1) / 2) as usize).chars().take(ul_len as usize).collect();
        if *underline != repeated {
            return None;
        }
        // Back to back delimited blocks are not titles.
        if !WORD_RE.is_match(title) {
            return None;
        }
        let caps = section
            .captures(title)
            .filter(|c| c.get(0).map_or(false, |m| m.start() == 0))?;
        Some((groups(section, &caps), level, 2))
    }
}

fn groups(re: &Regex, caps: &regex::Captures) -> AttributeTable {
    let mut attributes = AttributeTable::new();
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            attributes.set(name, m.as_str());
        }
    }
    attributes
}

/// Section template name: the first positional attribute of the preceding
/// attribute list (unless `float`), then its `template` attribute, then
/// `sect<level>`.
pub fn section_name(attribute_list: &AttributeTable, level: i64) -> String {
    match (attribute_list.get("1"), attribute_list.get("template")) {
        (Some(name), _) if !name.is_empty() && name != "float" => name.to_string(),
        (_, Some(template)) => template.to_string(),
        _ => format!("sect{}", level),
    }
}

/// Generate a unique section id from `title`: non-word runs become
/// underscores, lower-cased, prefixed with `idprefix`.
pub fn generate_id(title: &str, idprefix: &str, used: &mut HashSet<String>) -> String {
    let base = NON_WORD_RE.replace_all(title, "_");
    let base = format!("{}{}", idprefix, base.trim_matches('_').to_lowercase());
    let mut id = base.clone();
    let mut i = 2;
    while used.contains(&id) {
        id = format!("{}_{}", base, i);
        i += 1;
    }
    used.insert(id.clone());
    id
}

/// Running section numbers for the `numbered` attribute.
#[derive(Debug, Default)]
pub struct SectionNumbers {
    numbers: [usize; LEVELS],
}

impl SectionNumbers {
    /// Next number at `level` formatted like `1.2.3.`. Level 0 is not
    /// numbered; deeper levels restart.
    pub fn next(&mut self, level: usize) -> String {
        let mut number = String::new();
        for l in 1..LEVELS {
            if l < level {
                number.push_str(&format!("{}.", self.numbers[l]));
            } else if l == level {
                self.numbers[l] += 1;
                number.push_str(&format!("{}.", self.numbers[l]));
            } else {
                self.numbers[l] = 0;
            }
        }
        number
    }
}
