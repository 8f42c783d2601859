//! Lexical dispatcher
//!
//! Decides which structural element starts at the next non-blank line. The
//! candidates are probed in a fixed order and the first one that matches
//! wins:
//!
//! 1. attribute entry
//! 2. attribute list
//! 3. block title (unless the line is also a legacy table ruler)
//! 4. section title, floating when the pending attribute list style is `float`
//! 5. block macro
//! 6. list item
//! 7. delimited block
//! 8. legacy table ruler
//! 9. table
//! 10. paragraph
//!
//! Every line matches some paragraph definition; if even the default
//! paragraph fails the configuration is inconsistent and the compile aborts.
//! The answer for a position is memoized on the cursor of its first line.

use std::rc::Rc;

use super::context::Document;
use super::cursor::Cursor;
use super::definitions::Definitions;
use super::error::{CompileError, CompileResult};
use super::reader::Reader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    AttributeEntry,
    AttributeList,
    BlockTitle,
    Title,
    FloatingTitle,
    /// Index into the macro table.
    BlockMacro(usize),
    /// Index into [`Definitions::lists`].
    List(usize),
    DelimitedBlock(usize),
    LegacyTable(usize),
    Table(usize),
    Paragraph(usize),
}

/// The lookahead a matcher can inspect.
pub struct Probe<'a> {
    pub reader: &'a mut Reader,
    pub doc: &'a mut Document,
    pub definitions: Rc<Definitions>,
    line: String,
}

impl Probe<'_> {
    /// The next unconsumed line.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Up to `count` lines from the next one on, without consuming them.
    pub fn lines_ahead(&mut self, count: usize) -> CompileResult<Vec<String>> {
        self.reader.read_ahead(self.doc, count)
    }
}

pub trait ElementMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>>;
}

pub struct AttributeEntryMatcher;

impl ElementMatcher for AttributeEntryMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        Ok(probe
            .definitions
            .attribute_entry
            .is_match(probe.line())
            .then_some(ElementKind::AttributeEntry))
    }
}

pub struct AttributeListMatcher;

impl ElementMatcher for AttributeListMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        Ok(probe
            .definitions
            .attribute_list
            .is_match(probe.line())
            .then_some(ElementKind::AttributeList))
    }
}

pub struct BlockTitleMatcher;

impl ElementMatcher for BlockTitleMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        let defs = &probe.definitions;
        let line = probe.line();
        // A legacy table ruler may start with a period too.
        let title = defs.block_title.is_match(line) && !defs.legacy_tables.iter().any(|t| t.is_match(line));
        Ok(title.then_some(ElementKind::BlockTitle))
    }
}

pub struct TitleMatcher;

impl ElementMatcher for TitleMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        let lines = probe.lines_ahead(2)?;
        let doc = &mut *probe.doc;
        let leveloffset = doc.attributes.get("leveloffset").map(str::to_string);
        if probe
            .definitions
            .titles
            .parse(&lines, leveloffset.as_deref(), &mut doc.messages)
            .is_none()
        {
            return Ok(None);
        }
        Ok(Some(match doc.attribute_list_style() {
            Some("float") => ElementKind::FloatingTitle,
            _ => ElementKind::Title,
        }))
    }
}

pub struct BlockMacroMatcher;

impl ElementMatcher for BlockMacroMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        Ok(probe.doc.macros.is_next(probe.line()).map(ElementKind::BlockMacro))
    }
}

pub struct ListMatcher;

impl ElementMatcher for ListMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        let line = probe.line();
        Ok(probe
            .definitions
            .lists
            .iter()
            .position(|l| l.is_match(line))
            .map(ElementKind::List))
    }
}

pub struct DelimitedBlockMatcher;

impl ElementMatcher for DelimitedBlockMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        let line = probe.line();
        Ok(probe
            .definitions
            .blocks
            .iter()
            .position(|b| b.is_match(line))
            .map(ElementKind::DelimitedBlock))
    }
}

pub struct LegacyTableMatcher;

impl ElementMatcher for LegacyTableMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        let line = probe.line();
        Ok(probe
            .definitions
            .legacy_tables
            .iter()
            .position(|t| t.is_match(line))
            .map(ElementKind::LegacyTable))
    }
}

pub struct TableMatcher;

impl ElementMatcher for TableMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        let line = probe.line();
        Ok(probe
            .definitions
            .tables
            .iter()
            .position(|t| t.is_match(line))
            .map(ElementKind::Table))
    }
}

/// The fallback: the first matching paragraph definition.
pub struct ParagraphMatcher;

impl ElementMatcher for ParagraphMatcher {
    fn try_match(&self, probe: &mut Probe) -> CompileResult<Option<ElementKind>> {
        let line = probe.line();
        match probe.definitions.paragraphs.iter().position(|p| p.is_match(line)) {
            Some(i) => Ok(Some(ElementKind::Paragraph(i))),
            None => Err(CompileError::Configuration("paragraph expected".to_string())),
        }
    }
}

pub struct Dispatcher {
    matchers: Vec<Box<dyn ElementMatcher>>,
    memo: Option<(Cursor, ElementKind)>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_matchers(vec![
            Box::new(AttributeEntryMatcher),
            Box::new(AttributeListMatcher),
            Box::new(BlockTitleMatcher),
            Box::new(TitleMatcher),
            Box::new(BlockMacroMatcher),
            Box::new(ListMatcher),
            Box::new(DelimitedBlockMatcher),
            Box::new(LegacyTableMatcher),
            Box::new(TableMatcher),
            Box::new(ParagraphMatcher),
        ])
    }

    /// A dispatcher probing `matchers` in order. The last matcher must always
    /// match.
    pub fn with_matchers(matchers: Vec<Box<dyn ElementMatcher>>) -> Self {
        Self { matchers, memo: None }
    }

    /// Skip blank lines and classify the element starting at the next line.
    /// `None` at end of input.
    pub fn next(&mut self, reader: &mut Reader, doc: &mut Document) -> CompileResult<Option<ElementKind>> {
        reader.skip_blank_lines(doc)?;
        let cursor = match reader.peek_cursor(doc)? {
            Some(cursor) => cursor,
            None => return Ok(None),
        };
        if let Some((memo, kind)) = &self.memo {
            if *memo == cursor {
                return Ok(Some(*kind));
            }
        }
        let mut probe = Probe {
            definitions: Rc::clone(&doc.definitions),
            line: cursor.text.clone(),
            reader,
            doc,
        };
        for matcher in &self.matchers {
            if let Some(kind) = matcher.try_match(&mut probe)? {
                tracing::trace!("{}: {:?}", cursor, kind);
                self.memo = Some((cursor, kind));
                return Ok(Some(kind));
            }
        }
        Err(CompileError::Configuration("paragraph expected".to_string()))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
