//! Macro engine
//!
//! Macros are regular expressions whose matches are rendered through a
//! template section: `<name>-inlinemacro` for inline macros and
//! `<name>-blockmacro` for block macros. The section is attribute
//! substituted against the match's named groups merged with the parsed
//! `attrlist` group. System macros (`+` prefix) are never rendered; they are
//! matched structurally through [`MacroTable::match_directive`] by the reader.
//!
//! Macros whose pattern has a `passtext` group are passthrough macros: before
//! any other substitution their passtext is replaced by an opaque token (see
//! [`passthrough`]) and restored verbatim at the end of the pipeline.

pub mod passthrough;

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::attributes::{is_name, AttributeTable};
use super::attrlist::{option_attributes, parse_attributes};
use super::context::Document;
use super::error::{CompileError, CompileResult};
use super::message::Messages;
use super::settings::MacroEntry;
use super::subs::{compile_regex, parse_subs, subs_1, subs_quoted_values, SubsOption};
use super::substitution::substitute_lines;
pub use passthrough::Passthroughs;

/// Built-in system macro: `name::target[attrlist]`.
pub const SYSTEM_PATTERN: &str =
    r"^(?P<name>\\?\w(?:\w|-)*?)::(?P<target>\S*?)(\[(?P<attrlist>.*?)\])$";

static DEFINITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<name>[^\[]*)(\[(?P<subslist>.*)\])?$").unwrap());
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "{}\\d+{}",
        passthrough::OPEN,
        passthrough::CLOSE
    ))
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroPrefix {
    Inline,
    /// `+`
    System,
    /// `#`
    Block,
}

impl MacroPrefix {
    fn section_suffix(&self) -> &'static str {
        match self {
            MacroPrefix::Block => "-blockmacro",
            _ => "-inlinemacro",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub pattern: String,
    regex: Regex,
    /// Template section base name; `None` takes it from the `name` group.
    pub name: Option<String>,
    pub prefix: MacroPrefix,
    /// Default substitutions applied to passthrough text.
    pub subslist: Vec<SubsOption>,
}

impl MacroDef {
    pub fn has_passthrough(&self) -> bool {
        self.pattern.contains("(?P<passtext>")
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Match anchored at the start of `text`.
    pub fn match_start<'t>(&self, text: &'t str) -> Option<Captures<'t>> {
        self.regex
            .captures(text)
            .filter(|caps| caps.get(0).map_or(false, |m| m.start() == 0))
    }
}

/// Named groups of a structural macro match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroMatch {
    groups: BTreeMap<String, String>,
}

impl MacroMatch {
    fn from_captures(regex: &Regex, caps: &Captures) -> Self {
        let groups = regex
            .capture_names()
            .flatten()
            .filter_map(|n| caps.name(n).map(|m| (n.to_string(), m.as_str().to_string())))
            .collect();
        Self { groups }
    }

    pub fn get(&self, group: &str) -> Option<&str> {
        self.groups.get(group).map(String::as_str)
    }

    pub fn name(&self) -> &str {
        self.get("name").unwrap_or_default()
    }

    pub fn target(&self) -> &str {
        self.get("target").unwrap_or_default()
    }

    pub fn attrlist(&self) -> &str {
        self.get("attrlist").unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct MacroTable {
    defs: Rc<Vec<MacroDef>>,
    pub passthroughs: Passthroughs,
    name_patterns: HashMap<String, Option<Regex>>,
}

impl MacroTable {
    /// A table holding only the built-in system macro.
    pub fn new() -> Self {
        let system = MacroDef {
            pattern: SYSTEM_PATTERN.to_string(),
            regex: Regex::new(SYSTEM_PATTERN).unwrap(),
            name: None,
            prefix: MacroPrefix::System,
            subslist: Vec::new(),
        };
        Self {
            defs: Rc::new(vec![system]),
            passthroughs: Passthroughs::new(),
            name_patterns: HashMap::new(),
        }
    }

    pub fn from_entries(entries: &[MacroEntry], messages: &mut Messages) -> CompileResult<Self> {
        let mut table = Self::new();
        for entry in entries {
            table.load(entry, messages)?;
        }
        Ok(table)
    }

    pub fn defs(&self) -> &[MacroDef] {
        &self.defs
    }

    /// Load a configuration entry: `pattern` with definition
    /// `[+|#][name][[subs]]`. A missing definition deletes the macro.
    pub fn load(&mut self, entry: &MacroEntry, messages: &mut Messages) -> CompileResult<()> {
        let definition = match &entry.definition {
            Some(definition) => definition.as_str(),
            None => return self.register(&entry.pattern, None, MacroPrefix::Inline, Vec::new(), messages),
        };
        let (prefix, rest) = match definition.chars().next() {
            Some('+') => (MacroPrefix::System, &definition[1..]),
            Some('#') => (MacroPrefix::Block, &definition[1..]),
            _ => (MacroPrefix::Inline, definition),
        };
        let illegal = || {
            CompileError::Configuration(format!(
                "illegal macro definition: {} = {}",
                entry.pattern, definition
            ))
        };
        let caps = DEFINITION_RE.captures(rest).ok_or_else(illegal)?;
        let name = caps.name("name").map(|m| m.as_str()).unwrap_or_default();
        let subslist = match caps.name("subslist") {
            Some(s) => parse_subs(s.as_str()).map_err(|option| {
                CompileError::Configuration(format!(
                    "illegal subs in macro entry: {}: {}",
                    entry.pattern, option
                ))
            })?,
            None => Vec::new(),
        };
        self.register(&entry.pattern, Some(name), prefix, subslist, messages)
    }

    /// Add a macro, replacing one with the identical pattern. `name` `None`
    /// deletes; an empty name is taken from each match's `name` group.
    pub fn register(
        &mut self,
        pattern: &str,
        name: Option<&str>,
        prefix: MacroPrefix,
        subslist: Vec<SubsOption>,
        messages: &mut Messages,
    ) -> CompileResult<()> {
        let defs = Rc::make_mut(&mut self.defs);
        let existing = defs.iter().position(|d| d.pattern == pattern);
        let name = match name {
            Some(name) => name,
            None => {
                match existing {
                    Some(i) => {
                        defs.remove(i);
                    }
                    None => messages.warning(format!("unable to delete missing macro: {}", pattern)),
                }
                return Ok(());
            }
        };
        if !name.is_empty() && !is_name(name) {
            return Err(CompileError::Configuration(format!(
                "illegal section name in macro entry: {}",
                name
            )));
        }
        let def = MacroDef {
            pattern: pattern.to_string(),
            regex: compile_regex(pattern)?,
            name: (!name.is_empty()).then(|| name.to_string()),
            prefix,
            subslist,
        };
        match existing {
            Some(i) => {
                messages.verbose(format!("macro redefinition: {}", pattern));
                defs[i] = def;
            }
            None => defs.push(def),
        }
        Ok(())
    }

    /// Index of the first block macro matching `line`.
    pub fn is_next(&self, line: &str) -> Option<usize> {
        self.defs
            .iter()
            .position(|d| d.prefix == MacroPrefix::Block && d.match_start(line).is_some())
    }

    /// Match `text` against the macros with `prefix` whose name is `name`
    /// or whose `name` group fully matches the `name` pattern.
    pub fn match_directive(&mut self, prefix: MacroPrefix, name: &str, text: &str) -> Option<MacroMatch> {
        let defs = Rc::clone(&self.defs);
        for def in defs.iter().filter(|d| d.prefix == prefix) {
            let caps = match def.match_start(text) {
                Some(caps) => caps,
                None => continue,
            };
            if def.name.as_deref() == Some(name) {
                return Some(MacroMatch::from_captures(&def.regex, &caps));
            }
            let group = caps.name("name").map(|m| m.as_str()).unwrap_or_default();
            let re = self
                .name_patterns
                .entry(name.to_string())
                .or_insert_with(|| Regex::new(&format!("^(?:{})$", name)).ok());
            if re.as_ref().map_or(false, |re| re.is_match(group)) {
                return Some(MacroMatch::from_captures(&def.regex, &caps));
            }
        }
        None
    }
}

impl Default for MacroTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand every non-escaped match of the macros with `prefix` in `text`.
pub fn substitute(doc: &mut Document, text: &str, prefix: MacroPrefix) -> String {
    let defs = Rc::clone(&doc.macros.defs);
    let mut result = text.to_string();
    for def in defs.iter().filter(|d| d.prefix == prefix) {
        if !def.regex.is_match(&result) {
            continue;
        }
        let mut out = String::with_capacity(result.len());
        let mut last = 0;
        for caps in def.regex.captures_iter(&result) {
            let m = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            out.push_str(&result[last..m.start()]);
            out.push_str(&render(doc, def, &caps));
            last = m.end();
        }
        out.push_str(&result[last..]);
        result = out;
    }
    result
}

/// Render the block macro at `index` (as returned by
/// [`MacroTable::is_next`]) for the whole line `text`.
pub fn render_block(doc: &mut Document, index: usize, text: &str) -> Option<String> {
    let defs = Rc::clone(&doc.macros.defs);
    let def = defs.get(index).filter(|d| d.prefix == MacroPrefix::Block)?;
    let caps = def.match_start(text)?;
    Some(render(doc, def, &caps))
}

fn render(doc: &mut Document, def: &MacroDef, caps: &Captures) -> String {
    let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    if let Some(unescaped) = whole.strip_prefix('\\') {
        return unescaped.to_string();
    }
    let mut d = AttributeTable::new();
    for group in def.regex.capture_names().flatten() {
        if let Some(m) = caps.name(group) {
            d.set(group, m.as_str());
        }
    }
    let name = match (&def.name, d.get("name")) {
        (Some(name), _) => name.clone(),
        (None, Some(name)) => name.to_string(),
        (None, None) => {
            doc.messages
                .warning(format!("missing macro name group: {}", def.pattern));
            return String::new();
        }
    };
    let section = format!("{}{}", name, def.prefix.section_suffix());
    let body = match doc.section(&section) {
        Some(body) => body.to_vec(),
        None => {
            doc.messages
                .warning(format!("missing macro section: [{}]", section));
            return String::new();
        }
    };
    if def.prefix == MacroPrefix::Block && def.name.as_deref() != Some("comment") {
        doc.consume_attribute_list(&mut d);
        doc.consume_block_title(&mut d);
    }
    if let Some(attrlist) = d.get("attrlist").map(str::to_string) {
        if attrlist.is_empty() {
            d.remove("attrlist");
        } else {
            let attrlist = match def.prefix {
                MacroPrefix::Inline => attrlist.replace("\\]", "]"),
                _ => attrlist,
            };
            parse_attributes(&attrlist, &mut d);
            if let Err(option) = option_attributes(&mut d) {
                doc.messages
                    .warning(format!("{}: illegal option name: {}", name, option));
            }
            if def.prefix == MacroPrefix::Block {
                subs_quoted_values(doc, &mut d);
            }
        }
    }
    if name == "image" {
        if let Some(alt) = d.get("1").map(str::to_string) {
            d.set("alt", alt);
        }
    }
    // {0} is withheld from substitution: it has already been substituted.
    let a0 = d.get("0").filter(|s| !s.is_empty()).map(str::to_string);
    if a0.is_some() {
        d.set("0", "\u{0}");
    }
    let lines = substitute_lines(doc, &body, Some(&mut d));
    let separator = match def.prefix {
        MacroPrefix::Block => doc.config.settings.newline.clone(),
        _ => "\n".to_string(),
    };
    let result = lines.join(&separator);
    match a0 {
        Some(a0) => result.replace('\u{0}', &a0),
        None => result,
    }
}

/// Replace the passtext of every passthrough macro with `prefix` by a
/// placeholder token, stashing the substituted text.
pub fn extract_passthroughs(doc: &mut Document, text: &str, prefix: MacroPrefix) -> CompileResult<String> {
    let defs = Rc::clone(&doc.macros.defs);
    let mut text = text.to_string();
    for def in defs.iter().filter(|d| d.prefix == prefix && d.has_passthrough()) {
        if !def.regex.is_match(&text) {
            continue;
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in def.regex.captures_iter(&text) {
            let m = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            out.push_str(&text[last..m.start()]);
            out.push_str(&stash(doc, def, &caps, &text)?);
            last = m.end();
        }
        out.push_str(&text[last..]);
        text = out;
    }
    Ok(text)
}

fn stash(doc: &mut Document, def: &MacroDef, caps: &Captures, text: &str) -> CompileResult<String> {
    let whole = match caps.get(0) {
        Some(m) => m,
        None => return Ok(String::new()),
    };
    if whole.as_str().starts_with('\\') {
        return Ok(whole.as_str().to_string());
    }
    let passtext = match caps.name("passtext") {
        Some(passtext) => passtext,
        None => {
            doc.messages.warning(format!(
                "passthrough macro {}: missing passtext group",
                caps.name("name").map(|m| m.as_str()).unwrap_or_default()
            ));
            return Ok(whole.as_str().to_string());
        }
    };
    if TOKEN_RE.is_match(passtext.as_str()) {
        doc.messages.warning("nested inline passthrough");
        return Ok(whole.as_str().to_string());
    }
    let subslist = match caps.name("subslist").map(|m| m.as_str()).filter(|s| !s.is_empty()) {
        Some(s) if s.starts_with(':') => {
            return Err(CompileError::structural(
                format!("block macro cannot occur here: {}", whole.as_str()),
                doc.messages.cursor().cloned(),
            ))
        }
        Some(s) => match parse_subs(s) {
            Ok(subslist) => subslist,
            Err(option) => {
                doc.messages
                    .error(format!("illegal passthrough macro subs option: {}", option));
                Vec::new()
            }
        },
        None => def.subslist.clone(),
    };
    let mut stashed = subs_1(doc, passtext.as_str(), &subslist);
    if def.prefix == MacroPrefix::Inline {
        stashed = stashed.replace("\\]", "]");
    }
    let token = doc.macros.passthroughs.push(stashed);
    Ok(format!(
        "{}{}{}",
        &text[whole.start()..passtext.start()],
        token,
        &text[passtext.end()..whole.end()]
    ))
}

/// Restore the placeholders of slots pushed since `mark`.
pub fn restore_passthroughs(doc: &Document, text: &str, mark: usize) -> String {
    doc.macros.passthroughs.restore(text, mark)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adoc::testing::document;

    fn entry(pattern: &str, definition: Option<&str>) -> MacroEntry {
        MacroEntry {
            pattern: pattern.to_string(),
            definition: definition.map(str::to_string),
        }
    }

    #[test]
    fn test_system_macro_is_first() {
        let table = MacroTable::new();
        assert_eq!(table.defs()[0].prefix, MacroPrefix::System);
        assert_eq!(table.defs()[0].pattern, SYSTEM_PATTERN);
    }

    #[test]
    fn test_load_parses_definition() {
        let mut messages = Messages::new();
        let mut table = MacroTable::new();
        table
            .load(&entry(r"\$\$(?P<passtext>.*?)\$\$", Some("pass[specialcharacters]")), &mut messages)
            .unwrap();
        table.load(&entry(r"^'{3,}$", Some("#ruler")), &mut messages).unwrap();
        let defs = table.defs();
        assert_eq!(defs[1].name.as_deref(), Some("pass"));
        assert_eq!(defs[1].subslist, vec![SubsOption::SpecialCharacters]);
        assert!(defs[1].has_passthrough());
        assert_eq!(defs[2].prefix, MacroPrefix::Block);
    }

    #[test]
    fn test_redefinition_replaces_and_delete_removes() {
        let mut messages = Messages::new();
        let mut table = MacroTable::new();
        table.load(&entry("x+", Some("a")), &mut messages).unwrap();
        table.load(&entry("x+", Some("b")), &mut messages).unwrap();
        assert_eq!(table.defs().len(), 2);
        assert_eq!(table.defs()[1].name.as_deref(), Some("b"));
        table.load(&entry("x+", None), &mut messages).unwrap();
        assert_eq!(table.defs().len(), 1);
        table.load(&entry("x+", None), &mut messages).unwrap();
        assert_eq!(messages.count_matching("unable to delete missing macro"), 1);
    }

    #[test]
    fn test_illegal_entries_are_configuration_errors() {
        let mut messages = Messages::new();
        let mut table = MacroTable::new();
        assert!(table.load(&entry("(", Some("a")), &mut messages).is_err());
        assert!(table.load(&entry("x", Some("a b")), &mut messages).is_err());
        assert!(table.load(&entry("x", Some("a[bogus]")), &mut messages).is_err());
    }

    #[test]
    fn test_match_directive_by_name_pattern() {
        let mut table = MacroTable::new();
        let m = table
            .match_directive(MacroPrefix::System, "include1?", "include::a.txt[tabsize=2]")
            .unwrap();
        assert_eq!(m.name(), "include");
        assert_eq!(m.target(), "a.txt");
        assert_eq!(m.attrlist(), "tabsize=2");
        assert!(table
            .match_directive(MacroPrefix::System, "include1?", "include2::a.txt[]")
            .is_none());
        assert!(table
            .match_directive(MacroPrefix::System, "ifdef|ifndef", "ifdef::x[]")
            .is_some());
    }

    #[test]
    fn test_inline_macro_renders_section() {
        let mut doc = document();
        assert_eq!(
            substitute(&mut doc, "see https://x.org/[the site] now", MacroPrefix::Inline),
            r#"see <a href="https://x.org/">the site</a> now"#
        );
    }

    #[test]
    fn test_escaped_macro_loses_backslash() {
        let mut doc = document();
        assert_eq!(
            substitute(&mut doc, r"\https://x.org/[site]", MacroPrefix::Inline),
            "https://x.org/[site]"
        );
    }

    #[test]
    fn test_image_alt_is_first_positional() {
        let mut doc = document();
        assert_eq!(
            substitute(&mut doc, "image:a.png[\"Logo\",width=20]", MacroPrefix::Inline),
            r#"<span class="image"><img src="a.png" alt="Logo" width="20" /></span>"#
        );
    }

    #[test]
    fn test_unquoted_first_word_disables_named_values() {
        let mut doc = document();
        assert_eq!(
            substitute(&mut doc, "image:a.png[Logo,width=20]", MacroPrefix::Inline),
            r#"<span class="image"><img src="a.png" alt="Logo" /></span>"#
        );
    }

    #[test]
    fn test_missing_section_warns() {
        let mut doc = document();
        doc.config.sections.remove("link-inlinemacro");
        assert_eq!(substitute(&mut doc, "link:x[y]", MacroPrefix::Inline), "");
        assert_eq!(doc.messages.count_matching("missing macro section: [link-inlinemacro]"), 1);
    }

    #[test]
    fn test_extract_and_restore() {
        let mut doc = document();
        let mark = doc.macros.passthroughs.mark();
        let text = extract_passthroughs(&mut doc, "a $$<x>$$ b", MacroPrefix::Inline).unwrap();
        assert!(!text.contains("<x>"));
        assert_eq!(restore_passthroughs(&doc, &text, mark), "a $$&lt;x&gt;$$ b");
    }

    #[test]
    fn test_escaped_passthrough_is_left_alone() {
        let mut doc = document();
        let text = extract_passthroughs(&mut doc, r"\$$<x>$$", MacroPrefix::Inline).unwrap();
        assert_eq!(text, r"\$$<x>$$");
        assert!(doc.macros.passthroughs.is_empty());
    }

    #[test]
    fn test_nested_passthrough_is_rejected() {
        let mut doc = document();
        let token = doc.macros.passthroughs.push("x");
        let text = format!("pass:[{}]", token);
        assert_eq!(extract_passthroughs(&mut doc, &text, MacroPrefix::Inline).unwrap(), text);
        assert_eq!(doc.messages.count_matching("nested inline passthrough"), 1);
    }

    #[test]
    fn test_block_subslist_in_inline_text_is_fatal() {
        let mut doc = document();
        let err = extract_passthroughs(&mut doc, "pass::[x]", MacroPrefix::Inline).unwrap_err();
        assert!(err.to_string().contains("block macro cannot occur here"));
    }
}
