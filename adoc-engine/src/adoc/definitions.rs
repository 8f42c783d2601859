//! Compiled element definitions
//!
//! The syntax section of [`EngineConfig`] is compiled once per compile into
//! the regular expressions the dispatcher probes with. Element patterns are
//! anchored at the start of the line only, like a prefix match; a pattern
//! that must consume the whole line ends with `$` itself.

use std::collections::BTreeMap;

use regex::{Captures, Regex};

use super::attributes::{is_name, AttributeTable};
use super::attrlist::parse_options;
use super::error::{CompileError, CompileResult};
use super::message::Messages;
use super::settings::{BlockDef, EngineConfig, LegacyTableDef, ListDef, StyleDef, TableDef};
use super::subs::{compile_regex, parse_subs, parse_subs_list, SubsOption};
use super::title::TitleDefinitions;

/// Compile `pattern` so it only matches at the start of a line.
pub fn anchored(pattern: &str) -> CompileResult<Regex> {
    compile_regex(&format!("^(?:{})", pattern))
}

/// Named groups of `caps` as an attribute table.
pub fn named_groups(re: &Regex, caps: &Captures) -> AttributeTable {
    let mut attributes = AttributeTable::new();
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            attributes.set(name, m.as_str());
        }
    }
    attributes
}

fn malformed(section: &str, entry: &str, value: &str) -> CompileError {
    CompileError::Configuration(format!("[{}] malformed entry {}: {}", section, entry, value))
}

fn subs_or_normal(section: &str, subs: &[String]) -> CompileResult<Vec<SubsOption>> {
    if subs.is_empty() {
        return Ok(vec![SubsOption::Normal]);
    }
    parse_subs_list(subs).map_err(|option| malformed(section, "subs", &option))
}

/// Processing parameters of one block instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub options: Vec<String>,
    pub subs: Vec<SubsOption>,
    pub postsubs: Vec<SubsOption>,
    pub filter: String,
}

impl Parameters {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    fn merge_options(&mut self, options: &[String]) {
        for option in options {
            if !self.has_option(option) {
                self.options.push(option.clone());
            }
        }
    }
}

#[derive(Debug, Clone)]
struct StyleDefinition {
    subs: Option<Vec<SubsOption>>,
    postsubs: Option<Vec<SubsOption>>,
    options: Option<Vec<String>>,
    filter: Option<String>,
    posattrs: Option<Vec<String>>,
    attributes: BTreeMap<String, String>,
}

impl StyleDefinition {
    fn compile(section: &str, name: &str, def: &StyleDef) -> CompileResult<Self> {
        if !is_name(name) {
            return Err(malformed(section, "style", name));
        }
        let subs = |list: &Option<Vec<String>>| -> CompileResult<Option<Vec<SubsOption>>> {
            list.as_ref()
                .map(|l| parse_subs_list(l).map_err(|option| malformed(section, "subs", &option)))
                .transpose()
        };
        Ok(Self {
            subs: subs(&def.subs)?,
            postsubs: subs(&def.postsubs)?,
            options: def.options.clone(),
            filter: def.filter.clone(),
            posattrs: def.posattrs.clone(),
            attributes: def.attributes.clone(),
        })
    }
}

/// A paragraph or delimited block definition.
#[derive(Debug, Clone)]
pub struct BlockDefinition {
    pub name: String,
    /// `paradef-<name>` or `blockdef-<name>`, used in messages.
    pub section: String,
    delimiter: Regex,
    pub options: Vec<String>,
    pub subs: Vec<SubsOption>,
    pub postsubs: Vec<SubsOption>,
    pub style: String,
    pub posattrs: Vec<String>,
    pub filter: String,
    styles: BTreeMap<String, StyleDefinition>,
}

impl BlockDefinition {
    pub fn compile(prefix: &str, def: &BlockDef) -> CompileResult<Self> {
        let section = format!("{}-{}", prefix, def.name);
        if !is_name(&def.name) {
            return Err(CompileError::Configuration(format!("illegal definition name: {}", section)));
        }
        if def.delimiter.is_empty() {
            return Err(CompileError::Configuration(format!("[{}] missing delimiter", section)));
        }
        if !def.style.is_empty() && !is_name(&def.style) {
            return Err(malformed(&section, "style", &def.style));
        }
        let styles = def
            .styles
            .iter()
            .map(|(name, style)| Ok((name.clone(), StyleDefinition::compile(&section, name, style)?)))
            .collect::<CompileResult<BTreeMap<_, _>>>()?;
        let postsubs = parse_subs_list(&def.postsubs).map_err(|o| malformed(&section, "postsubs", &o))?;
        Ok(Self {
            name: def.name.clone(),
            delimiter: anchored(&def.delimiter)?,
            options: def.options.clone(),
            subs: subs_or_normal(&section, &def.subs)?,
            postsubs,
            style: def.style.clone(),
            posattrs: def.posattrs.clone(),
            filter: def.filter.clone(),
            styles,
            section,
        })
    }

    pub fn delimiter(&self) -> &Regex {
        &self.delimiter
    }

    pub fn captures<'t>(&self, line: &'t str) -> Option<Captures<'t>> {
        self.delimiter.captures(line)
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.delimiter.is_match(line)
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// Merge the instance attribute list `attrs` with this definition.
    ///
    /// The style comes from the first positional attribute when `posattrs`
    /// starts with `style`, else from the `style` attribute, else the default
    /// style. Style parameters override the definition, style attributes fill
    /// in what `attrs` leaves unset, positional attributes are named after
    /// `posattrs` and parameters given in `attrs` win last.
    pub fn merge(&self, attrs: &AttributeTable, messages: &mut Messages) -> (AttributeTable, Parameters) {
        let mut attributes = AttributeTable::new();
        if !self.style.is_empty() {
            attributes.set("style", self.style.as_str());
        }
        attributes.extend_from(attrs);
        let mut params = Parameters {
            options: self.options.clone(),
            subs: self.subs.clone(),
            postsubs: self.postsubs.clone(),
            filter: self.filter.clone(),
        };
        let mut posattrs = self.posattrs.clone();
        let positional = match posattrs.first().map(String::as_str) {
            Some("style") => attributes.get("1").filter(|s| !s.is_empty()),
            _ => None,
        };
        let style = positional
            .or_else(|| attributes.get("style"))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if let Some(mut style) = style {
            if !is_name(&style) {
                messages.error(format!("illegal style name: {}", style));
                style = self.style.clone();
            } else if !self.styles.is_empty() && !self.styles.contains_key(&style) {
                messages.warning(format!("missing style: [{}]: {}", self.section, style));
                style = self.style.clone();
            }
            if let Some(def) = self.styles.get(&style) {
                attributes.set("style", style.as_str());
                if let Some(p) = &def.posattrs {
                    posattrs = p.clone();
                }
                if let Some(subs) = &def.subs {
                    params.subs = subs.clone();
                }
                if let Some(postsubs) = &def.postsubs {
                    params.postsubs = postsubs.clone();
                }
                if let Some(options) = &def.options {
                    params.merge_options(options);
                }
                if let Some(filter) = &def.filter {
                    params.filter = filter.clone();
                }
                for (k, v) in &def.attributes {
                    if !attributes.contains(k) {
                        attributes.set(k, v.as_str());
                    }
                }
            }
        }
        for (i, name) in posattrs.iter().enumerate() {
            if let Some(v) = attributes.get(&(i + 1).to_string()).map(str::to_string) {
                attributes.set(name, v);
            }
        }
        self.override_parameters(attrs, &mut params, messages);
        (attributes, params)
    }

    fn override_parameters(&self, attrs: &AttributeTable, params: &mut Parameters, messages: &mut Messages) {
        if let Some(options) = attrs.get("options") {
            match parse_options(options, &[]) {
                Ok(options) => params.merge_options(&options),
                Err(o) => messages.error(format!("[{}] illegal option name: {}", self.section, o)),
            }
        }
        for name in ["subs", "presubs"] {
            if let Some(value) = attrs.get(name) {
                match parse_subs(value) {
                    Ok(subs) => params.subs = subs,
                    Err(o) => messages.error(format!("[{}] malformed {} parameter: {}", self.section, name, o)),
                }
            }
        }
        if let Some(value) = attrs.get("postsubs") {
            match parse_subs(value) {
                Ok(subs) => params.postsubs = subs,
                Err(o) => messages.error(format!("[{}] malformed postsubs parameter: {}", self.section, o)),
            }
        }
        if let Some(filter) = attrs.get("filter") {
            params.filter = filter.to_string();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListType {
    Bulleted,
    Numbered,
    Labeled,
}

/// Groups of a list item's first line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMatch {
    pub label: Option<String>,
    pub text: Option<String>,
    pub index: Option<String>,
    /// Remaining named groups.
    pub attributes: AttributeTable,
}

#[derive(Debug, Clone)]
pub struct ListDefinition {
    pub name: String,
    pub section: String,
    pub list_type: ListType,
    delimiters: Vec<Regex>,
    pub subs: Vec<SubsOption>,
    pub style: String,
}

impl ListDefinition {
    pub fn compile(def: &ListDef) -> CompileResult<Self> {
        let section = format!("listdef-{}", def.name);
        let list_type = match def.list_type.as_str() {
            "bulleted" => ListType::Bulleted,
            "numbered" => ListType::Numbered,
            "labeled" => ListType::Labeled,
            _ => return Err(CompileError::Configuration(format!("[{}] illegal type", section))),
        };
        if def.delimiters.is_empty() {
            return Err(CompileError::Configuration(format!("[{}] missing delimiter", section)));
        }
        let delimiters = def
            .delimiters
            .iter()
            .map(|d| anchored(d))
            .collect::<CompileResult<Vec<_>>>()?;
        let style = match (list_type, def.style.as_str()) {
            (ListType::Numbered, "") => "arabic".to_string(),
            (_, style) => style.to_string(),
        };
        Ok(Self {
            name: def.name.clone(),
            subs: subs_or_normal(&section, &def.subs)?,
            section,
            list_type,
            delimiters,
            style,
        })
    }

    pub fn delimiters(&self) -> &[Regex] {
        &self.delimiters
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.delimiters.iter().any(|re| re.is_match(line))
    }

    pub fn match_item(&self, line: &str) -> Option<ItemMatch> {
        self.delimiters.iter().find_map(|re| {
            let caps = re.captures(line)?;
            let mut attributes = named_groups(re, &caps);
            Some(ItemMatch {
                label: attributes.remove("label"),
                text: attributes.remove("text"),
                index: attributes.remove("index"),
                attributes,
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// Prefix separated values: `|a |b`.
    Psv,
    /// Delimiter separated values: `a:b`.
    Dsv,
    Csv,
}

const PSV_SEPARATOR: &str = r"((?P<span>\d+)(?P<op>[*+]))?\|";

#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub name: String,
    pub section: String,
    delimiter: Regex,
    pub format: TableFormat,
    /// Cell separator; for CSV a single character.
    pub separator: Regex,
    pub csv_separator: char,
    pub subs: Vec<SubsOption>,
}

impl TableDefinition {
    pub fn compile(def: &TableDef) -> CompileResult<Self> {
        let section = format!("tabledef-{}", def.name);
        if def.delimiter.is_empty() {
            return Err(CompileError::Configuration(format!("[{}] missing delimiter", section)));
        }
        let format = match def.format.as_str() {
            "" | "psv" => TableFormat::Psv,
            "dsv" => TableFormat::Dsv,
            "csv" => TableFormat::Csv,
            other => {
                return Err(CompileError::Configuration(format!(
                    "[{}] illegal table format: {}",
                    section, other
                )))
            }
        };
        let separator = match (format, def.separator.as_str()) {
            (TableFormat::Psv, "") => PSV_SEPARATOR.to_string(),
            (TableFormat::Dsv, "") => r":|\n".to_string(),
            (TableFormat::Csv, "") => ",".to_string(),
            (TableFormat::Csv, s) => regex::escape(s),
            (_, s) => s.to_string(),
        };
        let csv_separator = match (format, def.separator.chars().next()) {
            (TableFormat::Csv, Some(c)) => c,
            _ => ',',
        };
        Ok(Self {
            name: def.name.clone(),
            delimiter: anchored(&def.delimiter)?,
            format,
            separator: compile_regex(&format!("(?ms){}", separator))?,
            csv_separator,
            subs: subs_or_normal(&section, &def.subs)?,
            section,
        })
    }

    pub fn delimiter(&self) -> &Regex {
        &self.delimiter
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.delimiter.is_match(line)
    }
}

const COL_STOP: &str = r"(`|'|\.)";

/// Deprecated ruler delimited table: a ruler of column stops and fill
/// characters opens the table, a fill character underline followed by a blank
/// line closes it.
#[derive(Debug, Clone)]
pub struct LegacyTableDefinition {
    pub name: String,
    pub section: String,
    pub fillchar: char,
    ruler: Regex,
    underline: Regex,
    pub subs: Vec<SubsOption>,
}

impl LegacyTableDefinition {
    pub fn compile(def: &LegacyTableDef) -> CompileResult<Self> {
        let section = format!("old_tabledef-{}", def.name);
        let mut chars = def.fillchar.chars();
        let fillchar = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(CompileError::Configuration(format!(
                    "[{}] missing or illegal fillchar",
                    section
                )))
            }
        };
        let fc = regex::escape(&fillchar.to_string());
        let ruler = format!(r"^({}(\d*|{}*))+{}+([\d\.]*)$", COL_STOP, fc, fc);
        Ok(Self {
            name: def.name.clone(),
            fillchar,
            ruler: compile_regex(&ruler)?,
            underline: compile_regex(&format!("^{}{{3,}}$", fc))?,
            subs: subs_or_normal(&section, &def.subs)?,
            section,
        })
    }

    pub fn ruler(&self) -> &Regex {
        &self.ruler
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.ruler.is_match(line)
    }

    pub fn is_underline(&self, line: &str) -> bool {
        self.underline.is_match(line)
    }

    /// Number of columns in a ruler: one per column stop, ignoring a trailing
    /// table width.
    pub fn column_count(&self, ruler: &str) -> usize {
        let end = ruler
            .rfind(self.fillchar)
            .map_or(ruler.len(), |i| i + self.fillchar.len_utf8());
        ruler[..end]
            .chars()
            .filter(|c| matches!(c, '`' | '\'' | '.'))
            .count()
    }
}

/// Every element definition, compiled.
#[derive(Debug)]
pub struct Definitions {
    pub attribute_entry: Regex,
    pub attribute_list: Regex,
    pub block_title: Regex,
    pub titles: TitleDefinitions,
    /// Paragraph definitions, `default` last.
    pub paragraphs: Vec<BlockDefinition>,
    pub lists: Vec<ListDefinition>,
    pub blocks: Vec<BlockDefinition>,
    pub tables: Vec<TableDefinition>,
    pub legacy_tables: Vec<LegacyTableDefinition>,
    pub paragraph_terminators: Vec<Regex>,
    pub list_terminators: Vec<Regex>,
}

impl Definitions {
    pub fn compile(config: &EngineConfig) -> CompileResult<Self> {
        let syntax = &config.syntax;
        let mut paragraphs = syntax
            .paragraphs
            .iter()
            .map(|p| BlockDefinition::compile("paradef", p))
            .collect::<CompileResult<Vec<_>>>()?;
        let default = paragraphs
            .iter()
            .position(|p| p.name == "default")
            .ok_or_else(|| CompileError::Configuration("missing section: paradef-default".to_string()))?;
        let default = paragraphs.remove(default);
        paragraphs.push(default);

        let lists = syntax
            .lists
            .iter()
            .map(ListDefinition::compile)
            .collect::<CompileResult<Vec<_>>>()?;
        let blocks = syntax
            .blocks
            .iter()
            .map(|b| BlockDefinition::compile("blockdef", b))
            .collect::<CompileResult<Vec<_>>>()?;
        let tables = syntax
            .tables
            .iter()
            .map(TableDefinition::compile)
            .collect::<CompileResult<Vec<_>>>()?;
        let legacy_tables = syntax
            .legacy_tables
            .iter()
            .map(LegacyTableDefinition::compile)
            .collect::<CompileResult<Vec<_>>>()?;
        let attribute_list = anchored(&syntax.attribute_list)?;

        let mut paragraph_terminators = vec![compile_regex(r"^\+$|^$")?, attribute_list.clone()];
        paragraph_terminators.extend(blocks.iter().map(|b| b.delimiter().clone()));
        paragraph_terminators.extend(tables.iter().map(|t| t.delimiter().clone()));
        paragraph_terminators.extend(legacy_tables.iter().map(|t| t.ruler().clone()));
        let mut list_terminators = paragraph_terminators.clone();
        list_terminators.extend(lists.iter().flat_map(|l| l.delimiters().iter().cloned()));

        Ok(Self {
            attribute_entry: anchored(&syntax.attribute_entry)?,
            attribute_list,
            block_title: anchored(&syntax.block_title)?,
            titles: TitleDefinitions::compile(syntax)?,
            paragraphs,
            lists,
            blocks,
            tables,
            legacy_tables,
            paragraph_terminators,
            list_terminators,
        })
    }

    pub fn default_paragraph(&self) -> &BlockDefinition {
        &self.paragraphs[self.paragraphs.len() - 1]
    }

    pub fn paragraph_terminators(&self) -> Vec<&Regex> {
        self.paragraph_terminators.iter().collect()
    }

    pub fn list_terminators(&self) -> Vec<&Regex> {
        self.list_terminators.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn definitions() -> Definitions {
        Definitions::compile(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_default_paragraph_is_moved_last() {
        let mut config = EngineConfig::default();
        let default = config.syntax.paragraphs.pop().unwrap();
        config.syntax.paragraphs.insert(0, default);
        let defs = Definitions::compile(&config).unwrap();
        assert_eq!(defs.default_paragraph().name, "default");
    }

    #[test]
    fn test_missing_default_paragraph_is_a_configuration_error() {
        let mut config = EngineConfig::default();
        config.syntax.paragraphs.retain(|p| p.name != "default");
        let err = Definitions::compile(&config).unwrap_err();
        assert!(err.to_string().contains("missing section: paradef-default"));
    }

    #[test]
    fn test_illegal_list_type() {
        let mut config = EngineConfig::default();
        config.syntax.lists[0].list_type = "spiral".to_string();
        assert!(Definitions::compile(&config).is_err());
    }

    #[rstest]
    #[case("- item", "bulleted", Some("item"))]
    #[case("** nested", "bulleted", Some("nested"))]
    #[case("2. second", "numbered", Some("second"))]
    #[case("term:: definition", "labeled", Some("definition"))]
    #[case("term::", "labeled", None)]
    fn test_list_items(#[case] line: &str, #[case] list: &str, #[case] text: Option<&str>) {
        let defs = definitions();
        let def = defs.lists.iter().find(|l| l.is_match(line)).unwrap();
        assert_eq!(def.name, list);
        assert_eq!(def.match_item(line).unwrap().text.as_deref(), text);
    }

    #[test]
    fn test_numbered_item_index() {
        let defs = definitions();
        let item = defs.lists[1].match_item("b. bee").unwrap();
        assert_eq!(item.index.as_deref(), Some("b."));
    }

    #[test]
    fn test_merge_style_from_first_positional() {
        let defs = definitions();
        let mut messages = Messages::new();
        let mut attrs = AttributeTable::new();
        attrs.set("1", "literal");
        let (attributes, params) = defs.default_paragraph().merge(&attrs, &mut messages);
        assert_eq!(attributes.get("style"), Some("literal"));
        assert_eq!(params.subs, vec![SubsOption::Verbatim]);
        assert!(!messages.has_warnings());
    }

    #[test]
    fn test_merge_unknown_style_falls_back() {
        let defs = definitions();
        let mut messages = Messages::new();
        let mut attrs = AttributeTable::new();
        attrs.set("style", "bogus");
        let (attributes, _) = defs.default_paragraph().merge(&attrs, &mut messages);
        assert_eq!(attributes.get("style"), Some("normal"));
        assert_eq!(messages.count_matching("missing style: [paradef-default]: bogus"), 1);
    }

    #[test]
    fn test_merge_attribute_parameters_win() {
        let defs = definitions();
        let mut messages = Messages::new();
        let mut attrs = AttributeTable::new();
        attrs.set("subs", "quotes");
        attrs.set("options", "skip");
        let (_, params) = defs.default_paragraph().merge(&attrs, &mut messages);
        assert_eq!(params.subs, vec![SubsOption::Quotes]);
        assert!(params.has_option("skip"));
    }

    #[rstest]
    #[case("`---------------", true)]
    #[case("`15'15.20-------", true)]
    #[case("--------", false)]
    #[case("plain", false)]
    fn test_legacy_ruler(#[case] line: &str, #[case] expected: bool) {
        assert_eq!(definitions().legacy_tables[0].is_match(line), expected);
    }

    #[test]
    fn test_terminators() {
        let defs = definitions();
        let hits = |line: &str| defs.paragraph_terminators.iter().any(|re| re.is_match(line));
        assert!(hits(""));
        assert!(hits("+"));
        assert!(hits("[quote]"));
        assert!(hits("----"));
        assert!(hits("|==="));
        assert!(!hits("- item"));
        assert!(defs.list_terminators.iter().any(|re| re.is_match("- item")));
    }
}
