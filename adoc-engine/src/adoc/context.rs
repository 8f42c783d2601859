//! Compile context
//!
//! [`Document`] is the state every engine reads and mutates during one
//! compile: the attribute table, the macro table, the diagnostics sink, the
//! compiled substitution tables and element definitions, and the pending
//! attribute list and block title. [`CompileContext`] bundles it with the
//! reader and the dispatcher. Nothing is shared between compiles.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

use serde::Serialize;

use super::attributes::AttributeTable;
use super::attrlist::option_attributes;
use super::definitions::Definitions;
use super::dispatch::{Dispatcher, ElementKind};
use super::error::CompileResult;
use super::macros::MacroTable;
use super::message::{Diagnostic, Messages};
use super::reader::{Reader, Source};
use super::settings::EngineConfig;
use super::subs::InlineTables;
use super::title::SectionNumbers;
use super::translate::{self, Element};

/// Attributes given on the command line. `None` undefines.
pub type CommandAttributes = BTreeMap<String, Option<String>>;

/// Command line attributes that attribute entries in the document may still
/// override.
const OVERRIDABLE: &[&str] = &["trace", "numbered"];

/// Parse a command line attribute: `name=value`, `name` (empty value) or
/// `name!` (undefine).
pub fn parse_command_attribute(s: &str) -> (String, Option<String>) {
    match s.split_once('=') {
        Some((name, value)) => (name.trim().to_lowercase(), Some(value.to_string())),
        None => match s.trim().strip_suffix('!') {
            Some(name) => (name.to_lowercase(), None),
            None => (s.trim().to_lowercase(), Some(String::new())),
        },
    }
}

#[derive(Debug)]
pub struct Document {
    pub config: EngineConfig,
    pub attributes: AttributeTable,
    pub cmd_attributes: CommandAttributes,
    pub macros: MacroTable,
    pub messages: Messages,
    pub inline: Rc<InlineTables>,
    pub definitions: Rc<Definitions>,
    /// Files loaded by `include1::`, keyed by path.
    pub include1: HashMap<String, Vec<String>>,
    /// Tab width of the source being read.
    pub tabsize: usize,
    /// Attributes of the last attribute list, until an element consumes them.
    pub attribute_list: AttributeTable,
    /// The last block title, until an element consumes it.
    pub block_title: Option<String>,
    pub(crate) level: i64,
    pub(crate) section_ids: HashSet<String>,
    pub(crate) section_numbers: SectionNumbers,
    blocknames: Vec<String>,
}

impl Document {
    pub fn new(mut config: EngineConfig, cmd_attributes: CommandAttributes) -> CompileResult<Self> {
        config.sections = std::mem::take(&mut config.sections)
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        let mut messages = Messages::new();
        let macros = MacroTable::from_entries(&config.macros, &mut messages)?;
        let inline = Rc::new(InlineTables::compile(&config)?);
        let definitions = Rc::new(Definitions::compile(&config)?);

        let mut attributes = AttributeTable::new();
        for (name, value) in &config.attributes {
            attributes.set(name, value.as_str());
        }
        attributes.set("adoc-version", env!("CARGO_PKG_VERSION"));
        if config.settings.safe {
            attributes.set("safe-mode", "");
        }
        for (name, value) in &cmd_attributes {
            attributes.assign(name, value.clone());
        }
        let tabsize = config.settings.tabsize;
        Ok(Self {
            config,
            attributes,
            cmd_attributes,
            macros,
            messages,
            inline,
            definitions,
            include1: HashMap::new(),
            tabsize,
            attribute_list: AttributeTable::new(),
            block_title: None,
            level: 0,
            section_ids: HashSet::new(),
            section_numbers: SectionNumbers::default(),
            blocknames: Vec::new(),
        })
    }

    /// Template section lines by case-insensitive name.
    pub fn section(&self, name: &str) -> Option<&Vec<String>> {
        self.config.sections.get(&name.to_lowercase())
    }

    /// True if an attribute entry for `name` must yield to the command line.
    pub fn is_command_attribute(&self, name: &str) -> bool {
        self.cmd_attributes.contains_key(name) && !OVERRIDABLE.contains(&name)
    }

    /// The style of the pending attribute list: `style`, else the first
    /// positional attribute.
    pub fn attribute_list_style(&self) -> Option<&str> {
        self.attribute_list
            .get("style")
            .or_else(|| self.attribute_list.get("1"))
    }

    /// Move the pending attribute list into `dict`, adding `<name>-option`
    /// attributes for its options.
    pub fn consume_attribute_list(&mut self, dict: &mut AttributeTable) {
        if self.attribute_list.is_empty() {
            return;
        }
        dict.extend_from(&self.attribute_list);
        self.attribute_list.clear();
        if let Err(option) = option_attributes(dict) {
            self.messages.warning(format!("illegal option name: {}", option));
        }
    }

    /// Move the pending block title into `dict` as `title`.
    pub fn consume_block_title(&mut self, dict: &mut AttributeTable) {
        if let Some(title) = self.block_title.take().filter(|t| !t.is_empty()) {
            dict.set("title", title);
        }
    }

    /// Enter a block: `blockname` names the innermost open block.
    pub fn push_blockname(&mut self, name: &str) {
        let name = name.to_lowercase();
        tracing::trace!("push blockname: {}", name);
        self.attributes.set("blockname", name.as_str());
        self.blocknames.push(name);
    }

    pub fn pop_blockname(&mut self) {
        self.blocknames.pop();
        match self.blocknames.last() {
            Some(name) => {
                let name = name.clone();
                self.attributes.set("blockname", name);
            }
            None => {
                self.attributes.remove("blockname");
            }
        }
    }
}

/// Everything one compile owns.
pub struct CompileContext {
    pub doc: Document,
    pub reader: Reader,
    pub dispatcher: Dispatcher,
}

impl CompileContext {
    pub fn new(config: EngineConfig) -> CompileResult<Self> {
        Self::with_attributes(config, CommandAttributes::new())
    }

    pub fn with_attributes(config: EngineConfig, cmd_attributes: CommandAttributes) -> CompileResult<Self> {
        Ok(Self {
            doc: Document::new(config, cmd_attributes)?,
            reader: Reader::new(),
            dispatcher: Dispatcher::new(),
        })
    }

    /// Classify the next element. `None` at end of input.
    pub fn next_element(&mut self) -> CompileResult<Option<ElementKind>> {
        self.dispatcher.next(&mut self.reader, &mut self.doc)
    }

    /// Compile `source` into elements. Diagnostics stay in
    /// [`Document::messages`] so they survive a fatal error.
    pub fn compile(&mut self, source: Source) -> CompileResult<Vec<Element>> {
        if let Source::Path(path) = &source {
            self.set_document_location(path);
        }
        self.reader.open(&mut self.doc, source)?;
        translate::translate_document(self)
    }

    fn set_document_location(&mut self, path: &Path) {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.doc.attributes.set("docfile", path.to_string_lossy());
        if let Some(dir) = path.parent() {
            self.doc.attributes.set("docdir", dir.to_string_lossy());
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.doc.messages.diagnostics()
    }
}

/// The result of a successful compile.
#[derive(Debug, Serialize)]
pub struct Compilation {
    pub elements: Vec<Element>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    /// Every output line, depth first.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for element in &self.elements {
            element.collect_lines(&mut lines);
        }
        lines
    }
}

fn compile_source(source: Source, config: EngineConfig, cmd_attributes: CommandAttributes) -> CompileResult<Compilation> {
    let mut ctx = CompileContext::with_attributes(config, cmd_attributes)?;
    let elements = ctx.compile(source)?;
    Ok(Compilation {
        elements,
        diagnostics: ctx.doc.messages.take(),
    })
}

pub fn compile_str(text: &str, config: EngineConfig) -> CompileResult<Compilation> {
    compile_source(Source::text("<string>", text), config, CommandAttributes::new())
}

pub fn compile_file(path: impl AsRef<Path>, config: EngineConfig) -> CompileResult<Compilation> {
    compile_source(Source::Path(path.as_ref().to_path_buf()), config, CommandAttributes::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adoc::testing::document;
    use rstest::rstest;

    #[rstest]
    #[case("name=value", "name", Some("value"))]
    #[case("Name=a=b", "name", Some("a=b"))]
    #[case("flag", "flag", Some(""))]
    #[case("gone!", "gone", None)]
    fn test_parse_command_attribute(#[case] s: &str, #[case] name: &str, #[case] value: Option<&str>) {
        let (n, v) = parse_command_attribute(s);
        assert_eq!(n, name);
        assert_eq!(v.as_deref(), value);
    }

    #[test]
    fn test_command_attributes_override_config() {
        let mut config = EngineConfig::default();
        config.attributes.insert("lang".to_string(), "en".to_string());
        config.attributes.insert("drop".to_string(), "x".to_string());
        let mut cmd = CommandAttributes::new();
        cmd.insert("lang".to_string(), Some("fr".to_string()));
        cmd.insert("drop".to_string(), None);
        let doc = Document::new(config, cmd).unwrap();
        assert_eq!(doc.attributes.get("lang"), Some("fr"));
        assert!(!doc.attributes.contains("drop"));
        assert!(doc.is_command_attribute("lang"));
    }

    #[test]
    fn test_sections_are_case_insensitive() {
        let mut config = EngineConfig::default();
        config.sections.insert("MySection".to_string(), vec!["x".to_string()]);
        let doc = Document::new(config, CommandAttributes::new()).unwrap();
        assert_eq!(doc.section("mysection").map(|s| s.len()), Some(1));
        assert_eq!(doc.section("MYSECTION").map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_consume_attribute_list_adds_options() {
        let mut doc = document();
        doc.attribute_list.set("options", "header,footer");
        let mut dict = AttributeTable::new();
        doc.consume_attribute_list(&mut dict);
        assert!(doc.attribute_list.is_empty());
        assert_eq!(dict.get("header-option"), Some(""));
        assert_eq!(dict.get("footer-option"), Some(""));
    }

    #[test]
    fn test_consume_block_title_once() {
        let mut doc = document();
        doc.block_title = Some("Caption".to_string());
        let mut dict = AttributeTable::new();
        doc.consume_block_title(&mut dict);
        assert_eq!(dict.get("title"), Some("Caption"));
        assert!(doc.block_title.is_none());
    }

    #[test]
    fn test_blockname_stack() {
        let mut doc = document();
        doc.push_blockname("Sidebar");
        doc.push_blockname("listing");
        assert_eq!(doc.attributes.get("blockname"), Some("listing"));
        doc.pop_blockname();
        assert_eq!(doc.attributes.get("blockname"), Some("sidebar"));
        doc.pop_blockname();
        assert!(!doc.attributes.contains("blockname"));
    }

    #[test]
    fn test_compile_str_collects_lines() {
        let compilation = compile_str("Hello *world*", EngineConfig::default()).unwrap();
        assert_eq!(compilation.lines(), vec!["Hello <strong>world</strong>"]);
        assert!(compilation.diagnostics.is_empty());
    }

    #[test]
    fn test_compile_file_not_found() {
        let err = compile_file("/no/such/file.txt", EngineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("input file not found"));
    }
}
