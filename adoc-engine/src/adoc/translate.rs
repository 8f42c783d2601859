//! Element translation
//!
//! Consumes the element kinds the dispatcher yields and turns each into an
//! [`Element`]: the substituted lines of a paragraph, block, list item or
//! table cell plus the attributes that apply to it. Attribute entries,
//! attribute lists and block titles yield no element; they update the
//! document state the next element consumes.
//!
//! Sections are flat. A section element carries its title and the body
//! elements follow it at the same level.

use std::collections::BTreeMap;
use std::rc::Rc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::attributes::AttributeTable;
use super::attrlist::parse_attributes;
use super::context::{CompileContext, Document};
use super::cursor::Cursor;
use super::definitions::{named_groups, Definitions, ListType, TableDefinition, TableFormat};
use super::dispatch::ElementKind;
use super::error::{CompileError, CompileResult};
use super::macros::{self, MacroPrefix};
use super::message::Messages;
use super::shell;
use super::subs::{self, parse_subs, set_margin, subs_quoted_values, SubsOption};
use super::substitution::substitute_line;
use super::title::{generate_id, section_name, LEVELS};

static PASS_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^pass:(?P<subs>.*)\[(?P<value>.*)\]$").unwrap());
static ILLEGAL_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w-]").unwrap());
static WIDTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2})%?$").unwrap());
static COLS_MULTIPLIER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\*").unwrap());
static NUMBER_STYLE_RES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"^\d+[.>]$", "arabic"),
        (r"^[ivx]+\)$", "lowerroman"),
        (r"^[IVX]+\)$", "upperroman"),
        (r"^[a-z]\.$", "loweralpha"),
        (r"^[A-Z]\.$", "upperalpha"),
    ]
    .into_iter()
    .map(|(p, style)| (Regex::new(p).unwrap(), style))
    .collect()
});

const NUMBER_STYLES: &[&str] = &["arabic", "loweralpha", "upperalpha", "lowerroman", "upperroman"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    Section,
    FloatingTitle,
    BlockMacro,
    Paragraph,
    Block,
    List,
    /// Labeled list entry: one or more terms then the item.
    ListEntry,
    ListTerm,
    ListItem,
    Table,
    Row,
    Cell,
    LegacyTable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub kind: Kind,
    /// Definition or template name (`sect1`, `listing`, `image`, …).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(kind: Kind, name: impl Into<String>, cursor: Option<Cursor>) -> Self {
        Self {
            kind,
            name: name.into(),
            cursor,
            attributes: BTreeMap::new(),
            lines: Vec::new(),
            children: Vec::new(),
        }
    }

    fn with_attributes(mut self, attributes: AttributeTable) -> Self {
        self.attributes = attributes.into_map();
        self
    }

    fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    fn with_children(mut self, children: Vec<Element>) -> Self {
        self.children = children;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Append this element's lines, then its children's, depth first.
    pub fn collect_lines(&self, lines: &mut Vec<String>) {
        lines.extend(self.lines.iter().cloned());
        for child in &self.children {
            child.collect_lines(lines);
        }
    }
}

/// Translate the whole input of `ctx`.
pub fn translate_document(ctx: &mut CompileContext) -> CompileResult<Vec<Element>> {
    let defs = Rc::clone(&ctx.doc.definitions);
    let mut translator = Translator {
        ctx,
        defs,
        open_lists: Vec::new(),
    };
    translator.body(None)
}

struct OpenList {
    index: usize,
    ordinal: usize,
}

struct Translator<'a> {
    ctx: &'a mut CompileContext,
    defs: Rc<Definitions>,
    open_lists: Vec<OpenList>,
}

impl Translator<'_> {
    fn next(&mut self) -> CompileResult<Option<ElementKind>> {
        self.ctx.next_element()
    }

    fn read(&mut self) -> CompileResult<String> {
        let CompileContext { doc, reader, .. } = &mut *self.ctx;
        Ok(reader.read(doc)?.unwrap_or_default())
    }

    fn read_next(&mut self) -> CompileResult<Option<String>> {
        let CompileContext { doc, reader, .. } = &mut *self.ctx;
        reader.read_next(doc)
    }

    fn peek_cursor(&mut self) -> CompileResult<Option<Cursor>> {
        let CompileContext { doc, reader, .. } = &mut *self.ctx;
        reader.peek_cursor(doc)
    }

    fn eof(&mut self) -> CompileResult<bool> {
        let CompileContext { doc, reader, .. } = &mut *self.ctx;
        reader.eof(doc)
    }

    fn read_until(&mut self, terminators: &[&Regex], same_file: bool) -> CompileResult<Vec<String>> {
        let CompileContext { doc, reader, .. } = &mut *self.ctx;
        reader.read_until(doc, terminators, same_file)
    }

    /// Translate elements until the end of input or, inside a section body
    /// block, until the closing delimiter of block `terminator`.
    fn body(&mut self, terminator: Option<usize>) -> CompileResult<Vec<Element>> {
        let mut elements = Vec::new();
        while let Some(kind) = self.next()? {
            if let Some(block) = terminator {
                if kind == ElementKind::DelimitedBlock(block) {
                    break;
                }
                if kind == ElementKind::Title {
                    self.ctx
                        .doc
                        .messages
                        .error("section title not permitted in delimited block");
                }
            }
            if let Some(element) = self.translate(kind)? {
                elements.push(element);
            }
        }
        Ok(elements)
    }

    fn translate(&mut self, kind: ElementKind) -> CompileResult<Option<Element>> {
        match kind {
            ElementKind::AttributeEntry => self.attribute_entry().map(|_| None),
            ElementKind::AttributeList => self.attribute_list().map(|_| None),
            ElementKind::BlockTitle => self.block_title().map(|_| None),
            ElementKind::Title => self.section().map(Some),
            ElementKind::FloatingTitle => self.floating_title().map(Some),
            ElementKind::BlockMacro(index) => self.block_macro(index),
            ElementKind::List(index) => self.list(index).map(Some),
            ElementKind::DelimitedBlock(index) => self.delimited_block(index),
            ElementKind::LegacyTable(index) => self.legacy_table(index).map(Some),
            ElementKind::Table(index) => self.table(index),
            ElementKind::Paragraph(index) => self.paragraph(index),
        }
    }

    fn attribute_entry(&mut self) -> CompileResult<()> {
        let line = self.read()?;
        let (name, name2, mut value) = match self.defs.attribute_entry.captures(&line) {
            Some(caps) => (
                caps.name("attrname").map_or("", |m| m.as_str()).to_string(),
                caps.name("attrname2").map(|m| m.as_str().to_string()),
                caps.name("attrvalue").map_or("", |m| m.as_str()).trim().to_string(),
            ),
            None => return Ok(()),
        };
        while value.ends_with(" +") {
            if self.read_next()?.is_none() {
                break;
            }
            value.pop();
            let continued = self.read()?;
            value.push_str(continued.trim());
        }
        let doc = &mut self.ctx.doc;
        match name2 {
            Some(entry) if entry.is_empty() => {
                doc.config.sections.insert(name.to_lowercase(), vec![value]);
            }
            Some(entry) => configuration_entry(doc, &name, &entry, value),
            None => set_attribute(doc, &name, value)?,
        }
        Ok(())
    }

    fn attribute_list(&mut self) -> CompileResult<()> {
        let line = self.read()?;
        let groups = match self.defs.attribute_list.captures(&line) {
            Some(caps) => named_groups(&self.defs.attribute_list, &caps),
            None => return Ok(()),
        };
        let doc = &mut self.ctx.doc;
        let mut attrs = AttributeTable::new();
        for (name, value) in groups.iter() {
            if name == "attrlist" {
                if let Some(list) = substitute_line(doc, value, None).filter(|s| !s.is_empty()) {
                    parse_attributes(&list, &mut attrs);
                }
            } else {
                doc.attribute_list.set(name, value);
            }
        }
        subs_quoted_values(doc, &mut attrs);
        doc.attribute_list.extend_from(&attrs);
        Ok(())
    }

    fn block_title(&mut self) -> CompileResult<()> {
        let line = self.read()?;
        let title = self
            .defs
            .block_title
            .captures(&line)
            .and_then(|caps| caps.name("title"))
            .map_or("", |m| m.as_str())
            .to_string();
        let title = title_text(&mut self.ctx.doc, &self.defs, &title)?;
        if title.is_empty() {
            self.ctx.doc.messages.warning("blank block title");
        }
        self.ctx.doc.block_title = Some(title);
        Ok(())
    }

    /// Consume a title and return its attributes with the title substituted.
    fn title(&mut self) -> CompileResult<(AttributeTable, i64)> {
        let cursor = self.peek_cursor()?;
        let lines = {
            let CompileContext { doc, reader, .. } = &mut *self.ctx;
            reader.read_ahead(doc, 2)?
        };
        let doc = &mut self.ctx.doc;
        let leveloffset = doc.attributes.get("leveloffset").map(str::to_string);
        let title = match self.defs.titles.parse(&lines, leveloffset.as_deref(), &mut doc.messages) {
            Some(title) => title,
            None => return Err(CompileError::structural("section title expected", cursor)),
        };
        for _ in 0..title.linecount {
            self.read()?;
        }
        let mut attributes = title.attributes;
        let text = attributes.get("title").unwrap_or_default().to_string();
        let text = title_text(&mut self.ctx.doc, &self.defs, &text)?;
        if text.is_empty() {
            self.ctx.doc.messages.warning("blank section title");
        }
        attributes.set("title", text);
        Ok((attributes, title.level))
    }

    fn section(&mut self) -> CompileResult<Element> {
        let cursor = self.peek_cursor()?;
        let (mut attributes, level) = self.title()?;
        let doc = &mut self.ctx.doc;
        let sectname = section_name(&doc.attribute_list, level);
        if level > doc.level + 1 {
            doc.messages.warning(format!(
                "section title out of sequence: expected level {}, got level {}",
                doc.level + 1,
                level
            ));
        }
        let title = attributes.get("title").unwrap_or_default().to_string();
        set_section_id(doc, &title);
        doc.level = level;
        let sectnum = if doc.attributes.contains("numbered") {
            doc.section_numbers
                .next(level.clamp(0, LEVELS as i64 - 1) as usize)
        } else {
            String::new()
        };
        attributes.set("sectnum", sectnum);
        doc.consume_attribute_list(&mut attributes);
        tracing::debug!("section open: level {}: {}", level, title);
        Ok(Element::new(Kind::Section, sectname, cursor)
            .with_attributes(attributes)
            .with_lines(vec![title]))
    }

    fn floating_title(&mut self) -> CompileResult<Element> {
        let cursor = self.peek_cursor()?;
        let (mut attributes, _) = self.title()?;
        let doc = &mut self.ctx.doc;
        let title = attributes.get("title").unwrap_or_default().to_string();
        set_section_id(doc, &title);
        doc.consume_attribute_list(&mut attributes);
        Ok(Element::new(Kind::FloatingTitle, "floatingtitle", cursor)
            .with_attributes(attributes)
            .with_lines(vec![title]))
    }

    fn block_macro(&mut self, index: usize) -> CompileResult<Option<Element>> {
        let cursor = self.peek_cursor()?;
        let line = self.read()?;
        let doc = &mut self.ctx.doc;
        let (name, has_passthrough) = match doc.macros.defs().get(index) {
            Some(def) => (
                def.name.clone().unwrap_or_else(|| {
                    def.match_start(&line)
                        .and_then(|caps| caps.name("name").map(|m| m.as_str().to_string()))
                        .unwrap_or_default()
                }),
                def.has_passthrough(),
            ),
            None => return Ok(None),
        };
        let mark = doc.macros.passthroughs.mark();
        let mut text = line.clone();
        if has_passthrough {
            text = macros::extract_passthroughs(doc, &text, MacroPrefix::Block)?;
        }
        let rendered = match substitute_line(doc, &text, None).filter(|s| !s.is_empty()) {
            Some(text) => macros::render_block(doc, index, &text).unwrap_or(text),
            None => String::new(),
        };
        let rendered = macros::restore_passthroughs(doc, &rendered, mark);
        doc.macros.passthroughs.truncate(mark);
        if rendered.is_empty() {
            return Ok(None);
        }
        subs::trace(doc, "macro block", &line, &rendered);
        let lines = rendered
            .split(doc.config.settings.newline.as_str())
            .map(String::from)
            .collect();
        Ok(Some(Element::new(Kind::BlockMacro, name, cursor).with_lines(lines)))
    }

    fn list(&mut self, index: usize) -> CompileResult<Element> {
        let defs = Rc::clone(&self.defs);
        let def = &defs.lists[index];
        let cursor = self.peek_cursor()?;
        let first = self.read_next()?.unwrap_or_default();
        let item = def.match_item(&first).unwrap_or_default();

        let doc = &mut self.ctx.doc;
        let mut attributes = AttributeTable::new();
        if !def.style.is_empty() {
            attributes.set("style", def.style.as_str());
        }
        attributes.extend_from(&item.attributes);
        if let Some(style) = item.index.as_deref().and_then(number_style) {
            attributes.set("style", style);
        }
        doc.consume_block_title(&mut attributes);
        doc.consume_attribute_list(&mut attributes);
        if let Some(style) = attributes.get("1").filter(|s| !s.is_empty()).map(str::to_string) {
            attributes.set("style", style);
        }
        let number_style = match def.list_type {
            ListType::Numbered => {
                let style = attributes.get("style").unwrap_or_default().to_string();
                if NUMBER_STYLES.contains(&style.as_str()) {
                    Some(style)
                } else {
                    doc.messages
                        .error(format!("illegal numbered list style: {}", style));
                    attributes.set("style", def.style.as_str());
                    Some(def.style.clone())
                }
            }
            _ => None,
        };
        if let Some(width) = attributes.get("width").map(str::to_string) {
            match WIDTH_RE.captures(&width).and_then(|c| c[1].parse::<usize>().ok()) {
                Some(labelwidth) => {
                    attributes.set("labelwidth", labelwidth.to_string());
                    attributes.set("itemwidth", (100 - labelwidth).to_string());
                }
                None => doc.messages.error(format!(
                    "[{}] illegal attribute value: width=\"{}\"",
                    def.section, width
                )),
            }
        }
        let blockname = attributes
            .get("style")
            .filter(|s| !s.is_empty())
            .unwrap_or(def.name.as_str())
            .to_string();
        doc.push_blockname(&blockname);

        self.open_lists.push(OpenList { index, ordinal: 0 });
        let mut children = Vec::new();
        while self.next()? == Some(ElementKind::List(index)) && self.ctx.doc.block_title.is_none() {
            let ordinal = match self.open_lists.last_mut() {
                Some(open) => {
                    open.ordinal += 1;
                    open.ordinal
                }
                None => 1,
            };
            self.ctx.doc.attributes.set("listindex", ordinal.to_string());
            let line = self.read_next()?.unwrap_or_default();
            let item = def.match_item(&line).unwrap_or_default();
            if let Some(style) = &number_style {
                check_index(&mut self.ctx.doc.messages, item.index.as_deref(), style, ordinal);
            }
            let child = match def.list_type {
                ListType::Labeled => self.list_entry(index)?,
                ListType::Bulleted | ListType::Numbered => {
                    let item_cursor = self.peek_cursor()?;
                    self.read()?;
                    self.list_item(index, item.text, item_cursor)?
                }
            };
            children.push(child);
        }
        self.open_lists.pop();
        if let Some(parent) = self.open_lists.last() {
            let ordinal = parent.ordinal.to_string();
            self.ctx.doc.attributes.set("listindex", ordinal);
        }
        self.ctx.doc.pop_blockname();
        Ok(Element::new(Kind::List, def.name.as_str(), cursor)
            .with_attributes(attributes)
            .with_children(children))
    }

    fn list_entry(&mut self, index: usize) -> CompileResult<Element> {
        let defs = Rc::clone(&self.defs);
        let def = &defs.lists[index];
        let cursor = self.peek_cursor()?;
        let mut children = Vec::new();
        let mut text = None;
        while self.next()? == Some(ElementKind::List(index)) {
            let term_cursor = self.peek_cursor()?;
            let line = self.read()?;
            let item = def.match_item(&line).unwrap_or_default();
            let label = item.label.unwrap_or_default();
            let lines = subs::subs(&mut self.ctx.doc, &[label], &def.subs)?;
            children.push(Element::new(Kind::ListTerm, "", term_cursor).with_lines(lines));
            if item.text.is_some() {
                text = item.text;
                break;
            }
        }
        let item_cursor = self.ctx.reader.cursor().cloned();
        children.push(self.list_item(index, text, item_cursor)?);
        Ok(Element::new(Kind::ListEntry, "", cursor).with_children(children))
    }

    /// The item text after the first line has been read, then any list
    /// continuations.
    fn list_item(&mut self, index: usize, text: Option<String>, cursor: Option<Cursor>) -> CompileResult<Element> {
        let defs = Rc::clone(&self.defs);
        let body = self.read_until(&defs.list_terminators(), false)?;
        let mut lines: Vec<String> = text.into_iter().collect();
        lines.extend(body);
        if !lines.is_empty() {
            lines = subs::subs(&mut self.ctx.doc, &lines, &defs.lists[index].subs)?;
        }
        let mut children = Vec::new();
        loop {
            let continuation = self.read_next()?.as_deref() == Some("+");
            if continuation {
                self.read()?;
            }
            while let Some(kind @ (ElementKind::BlockTitle | ElementKind::AttributeList)) = self.next()? {
                self.translate(kind)?;
            }
            // A titled element ends the list.
            if !continuation && self.ctx.doc.block_title.is_some() {
                break;
            }
            let kind = match self.next()? {
                Some(kind) => kind,
                None => break,
            };
            match kind {
                ElementKind::List(i) if self.open_lists.iter().any(|l| l.index == i) => break,
                ElementKind::List(i) => children.push(self.list(i)?),
                ElementKind::Paragraph(i) if defs.paragraphs[i].has_option("listelement") => {
                    children.extend(self.paragraph(i)?);
                }
                ElementKind::Title if continuation => {
                    let cursor = self.peek_cursor()?;
                    return Err(CompileError::structural("section title not allowed in list item", cursor));
                }
                _ if continuation => children.extend(self.translate(kind)?),
                _ => break,
            }
        }
        Ok(Element::new(Kind::ListItem, "", cursor)
            .with_lines(lines)
            .with_children(children))
    }

    fn paragraph(&mut self, index: usize) -> CompileResult<Option<Element>> {
        let defs = Rc::clone(&self.defs);
        let def = &defs.paragraphs[index];
        let cursor = self.peek_cursor()?;
        let line = self.read()?;
        let (mut attrs, text) = match def.captures(&line) {
            Some(caps) => {
                let mut groups = named_groups(def.delimiter(), &caps);
                let text = groups.remove("text").unwrap_or_else(|| line.clone());
                (groups, text)
            }
            None => (AttributeTable::new(), line.clone()),
        };
        let doc = &mut self.ctx.doc;
        doc.consume_block_title(&mut attrs);
        doc.consume_attribute_list(&mut attrs);
        let (attributes, params) = def.merge(&attrs, &mut doc.messages);
        let body = self.read_until(&defs.paragraph_terminators(), false)?;
        if params.has_option("skip") {
            return Ok(None);
        }
        let doc = &mut self.ctx.doc;
        let mut lines = vec![text];
        lines.extend(body);
        if !doc.attributes.contains("plaintext") {
            lines = set_margin(&lines, 0);
        }
        let lines = subs::subs(doc, &lines, &params.subs)?;
        let lines = filter_lines(doc, &params.filter, lines, &attributes);
        let lines = subs::subs(doc, &lines, &params.postsubs)?;
        Ok(Some(
            Element::new(Kind::Paragraph, def.name.as_str(), cursor)
                .with_attributes(attributes)
                .with_lines(lines),
        ))
    }

    fn delimited_block(&mut self, index: usize) -> CompileResult<Option<Element>> {
        let defs = Rc::clone(&self.defs);
        let def = &defs.blocks[index];
        let start = self.peek_cursor()?;
        self.read()?;
        let doc = &mut self.ctx.doc;
        let pending = doc.attribute_list.clone();
        let (mut attributes, params) = def.merge(&pending, &mut doc.messages);
        let skip = params.has_option("skip");
        if !skip {
            doc.consume_block_title(&mut attributes);
            doc.attribute_list.clear();
        }
        let blockname = attributes
            .get("style")
            .filter(|s| !s.is_empty())
            .unwrap_or(def.name.as_str())
            .to_string();
        doc.push_blockname(&blockname);

        let delimiter = [def.delimiter()];
        let mut element = Element::new(Kind::Block, def.name.as_str(), start.clone());
        if skip {
            self.read_until(&delimiter, true)?;
        } else if params.has_option("sectionbody") {
            element.children = self.body(Some(index))?;
        } else {
            let body = self.read_until(&delimiter, true)?;
            let doc = &mut self.ctx.doc;
            let body = subs::subs(doc, &body, &params.subs)?;
            let body = filter_lines(doc, &params.filter, body, &attributes);
            element.lines = subs::subs(doc, &body, &params.postsubs)?;
        }
        if self.eof()? {
            self.ctx
                .doc
                .messages
                .error_at(format!("[{}] missing closing delimiter", def.section), start);
        } else {
            self.read()?;
        }
        self.ctx.doc.pop_blockname();
        if skip {
            return Ok(None);
        }
        Ok(Some(element.with_attributes(attributes)))
    }

    fn table(&mut self, index: usize) -> CompileResult<Option<Element>> {
        let defs = Rc::clone(&self.defs);
        let def = &defs.tables[index];
        let start = self.peek_cursor()?;
        self.read()?;
        let mut attributes = AttributeTable::new();
        let doc = &mut self.ctx.doc;
        doc.consume_block_title(&mut attributes);
        doc.consume_attribute_list(&mut attributes);
        let text = self.read_until(&[def.delimiter()], false)?;
        if self.eof()? {
            self.ctx
                .doc
                .messages
                .error_at(format!("[{}] missing closing delimiter", def.section), start.clone());
        } else {
            self.read()?;
        }
        let doc = &mut self.ctx.doc;
        if text.is_empty() {
            doc.messages.warning(format!("[{}] table is empty", def.section));
            return Ok(None);
        }
        doc.push_blockname("table");
        let colcount = attributes
            .get("cols")
            .and_then(column_count)
            .unwrap_or_else(|| match def.format {
                TableFormat::Csv => text[0].matches(def.csv_separator).count() + 1,
                TableFormat::Psv | TableFormat::Dsv => {
                    parse_cells(def, &text[..1], &mut Messages::new()).iter().map(|c| c.span).sum()
                }
            })
            .max(1);
        attributes.set("colcount", colcount.to_string());
        let mut rows = match def.format {
            TableFormat::Csv => parse_csv(def, &text, &mut doc.messages),
            TableFormat::Psv | TableFormat::Dsv => {
                build_rows(parse_cells(def, &text, &mut doc.messages), colcount)
            }
        };
        check_row_spans(&rows, &mut doc.messages);
        attributes.set("rowcount", rows.len().to_string());

        let head = if attributes.contains("header-option") && !rows.is_empty() {
            Some(rows.remove(0))
        } else {
            None
        };
        let foot = if attributes.contains("footer-option") { rows.pop() } else { None };
        let mut children = Vec::new();
        if let Some(cells) = head {
            children.push(row(doc, def, cells, "header")?);
        }
        for cells in rows {
            children.push(row(doc, def, cells, "body")?);
        }
        if let Some(cells) = foot {
            children.push(row(doc, def, cells, "footer")?);
        }
        doc.pop_blockname();
        Ok(Some(
            Element::new(Kind::Table, def.name.as_str(), start)
                .with_attributes(attributes)
                .with_children(children),
        ))
    }

    fn legacy_table(&mut self, index: usize) -> CompileResult<Element> {
        let defs = Rc::clone(&self.defs);
        let def = &defs.legacy_tables[index];
        let cursor = self.peek_cursor()?;
        let doc = &mut self.ctx.doc;
        doc.messages.deprecated("old tables syntax");
        let mut attributes = AttributeTable::new();
        doc.consume_block_title(&mut attributes);
        doc.consume_attribute_list(&mut attributes);
        let ruler = self.read()?;
        attributes.set("cols", def.column_count(&ruler).to_string());
        let mut table: Vec<String> = Vec::new();
        loop {
            let line = self.read_next()?;
            // An underline followed by a blank line or the end of input ends
            // the table.
            let underlined = table.last().map_or(false, |l| def.is_underline(l));
            if underlined && line.as_deref().map_or(true, str::is_empty) {
                break;
            }
            if line.is_none() {
                return Err(CompileError::structural(
                    format!("closing [{}] underline expected", def.section),
                    cursor,
                ));
            }
            table.push(self.read()?);
        }
        attributes.set("rows", table.len().to_string());
        let doc = &mut self.ctx.doc;
        doc.push_blockname("table");
        doc.pop_blockname();
        Ok(Element::new(Kind::LegacyTable, def.name.as_str(), cursor)
            .with_attributes(attributes)
            .with_lines(table))
    }
}

fn title_text(doc: &mut Document, defs: &Definitions, title: &str) -> CompileResult<String> {
    let options = if defs.titles.subs.is_empty() {
        vec![SubsOption::Normal]
    } else {
        defs.titles.subs.clone()
    };
    let lines = subs::subs(doc, &[title.to_string()], &options)?;
    Ok(lines.join(&doc.config.settings.newline))
}

/// `:section.entry: value` sets a configuration entry. Only the
/// `attributes` section is supported.
fn configuration_entry(doc: &mut Document, section: &str, entry: &str, value: String) {
    match section {
        "attributes" => match entry.strip_suffix('!') {
            Some(name) => {
                doc.attributes.remove(&name.to_lowercase());
            }
            None => {
                doc.attributes.set(&entry.to_lowercase(), value);
            }
        },
        _ => doc
            .messages
            .warning(format!("unsupported configuration entry: [{}] {}", section, entry)),
    }
}

fn set_attribute(doc: &mut Document, name: &str, value: String) -> CompileResult<()> {
    let (name, value) = match name.strip_suffix('!') {
        Some(name) => (name, None),
        None => (name, Some(value)),
    };
    let name = ILLEGAL_NAME_RE.replace_all(name, "").to_lowercase();
    if doc.is_command_attribute(&name) {
        return Ok(());
    }
    let value = match value {
        Some(value) => value,
        None => {
            doc.attributes.remove(&name);
            return Ok(());
        }
    };
    let (options, value) = match PASS_VALUE_RE.captures(&value) {
        Some(caps) => (caps["subs"].to_string(), caps["value"].to_string()),
        None => (
            doc.attributes
                .get("attributeentry-subs")
                .unwrap_or("specialcharacters,attributes")
                .to_string(),
            value.clone(),
        ),
    };
    let options = match parse_subs(&options) {
        Ok(options) => options,
        Err(option) => {
            doc.messages
                .error(format!("illegal substitution option: {}", option));
            return Ok(());
        }
    };
    let value = subs::subs(doc, &[value], &options)?.join("\n");
    doc.attributes.set(&name, value);
    Ok(())
}

fn set_section_id(doc: &mut Document, title: &str) {
    if doc.attributes.contains("sectids") && !doc.attribute_list.contains("id") {
        let idprefix = doc.attributes.get("idprefix").unwrap_or("_").to_string();
        let id = generate_id(title, &idprefix, &mut doc.section_ids);
        doc.attribute_list.set("id", id);
    }
}

/// Numbering style implied by an explicit list item index.
fn number_style(index: &str) -> Option<&'static str> {
    NUMBER_STYLE_RES
        .iter()
        .find(|(re, _)| re.is_match(index))
        .map(|(_, style)| *style)
}

/// Ordinal (1, 2, …) of an explicit list item index.
fn item_ordinal(index: &str, style: &str) -> Option<usize> {
    let digits = &index[..index.len().saturating_sub(1)];
    match style {
        "arabic" => digits.parse().ok(),
        "lowerroman" | "upperroman" => roman_to_int(digits),
        "loweralpha" => digits.chars().next().map(|c| c as usize - 'a' as usize + 1),
        "upperalpha" => digits.chars().next().map(|c| c as usize - 'A' as usize + 1),
        _ => None,
    }
}

fn roman_to_int(roman: &str) -> Option<usize> {
    let digit = |c: char| match c.to_ascii_lowercase() {
        'i' => Some(1i64),
        'v' => Some(5),
        'x' => Some(10),
        _ => None,
    };
    let digits = roman.chars().map(digit).collect::<Option<Vec<_>>>()?;
    let mut result = 0i64;
    for (i, d) in digits.iter().enumerate() {
        match digits.get(i + 1) {
            Some(next) if next > d => result -= d,
            _ => result += d,
        }
    }
    usize::try_from(result).ok()
}

fn check_index(messages: &mut Messages, index: Option<&str>, expected: &str, ordinal: usize) {
    let index = match index {
        Some(index) => index,
        None => return,
    };
    let style = match number_style(index) {
        Some(style) => style,
        None => return,
    };
    if style != expected {
        messages.warning(format!("list item style: expected {} got {}", expected, style));
    }
    if let Some(n) = item_ordinal(index, style) {
        if n != ordinal {
            messages.warning(format!("list item index: expected {} got {}", ordinal, n));
        }
    }
}

/// Pipe `lines` through the shell command `command`, after substituting the
/// block attributes into it.
fn filter_lines(doc: &mut Document, command: &str, lines: Vec<String>, attributes: &AttributeTable) -> Vec<String> {
    if command.trim().is_empty() {
        return lines;
    }
    let mut local = attributes.clone();
    let cmd = match substitute_line(doc, command, Some(&mut local)) {
        Some(cmd) if !cmd.trim().is_empty() => cmd.trim().to_string(),
        _ => {
            doc.messages
                .error(format!("undefined filter attribute in command: {}", command));
            return Vec::new();
        }
    };
    if doc.config.settings.safe {
        doc.messages.unsafe_(format!("{} filter", cmd));
        return lines;
    }
    doc.messages.verbose(format!("filtering: {}", cmd));
    match shell::filter(&cmd, &lines) {
        Ok(output) => {
            if !output.success {
                doc.messages
                    .warning(format!("filter non-zero exit code: {}", cmd));
            }
            if !lines.is_empty() && output.lines.is_empty() {
                doc.messages.warning(format!("no output from filter: {}", cmd));
            }
            output.lines
        }
        Err(err) => {
            doc.messages.error(format!("filter error: {}: {}", cmd, err));
            lines
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Cell {
    data: String,
    span: usize,
}

/// Column count from a `cols` attribute: a number, or a comma separated list
/// of column specifiers where `N*` repeats a specifier.
fn column_count(cols: &str) -> Option<usize> {
    if let Ok(n) = cols.trim().parse::<usize>() {
        return Some(n);
    }
    let count = cols
        .split(',')
        .map(|spec| {
            COLS_MULTIPLIER_RE
                .captures(spec.trim())
                .and_then(|c| c[1].parse::<usize>().ok())
                .unwrap_or(1)
        })
        .sum::<usize>();
    (count > 0).then_some(count)
}

/// Split PSV or DSV table text into cells. A separator preceded by a
/// backslash is kept as data.
fn parse_cells(def: &TableDefinition, text: &[String], messages: &mut Messages) -> Vec<Cell> {
    fn push(cells: &mut Vec<Cell>, data: String, span: Option<usize>, op: Option<&str>) {
        let span = span.unwrap_or(1);
        match op {
            Some("*") => cells.extend((0..span).map(|_| Cell {
                data: data.clone(),
                span: 1,
            })),
            _ => cells.push(Cell { data, span }),
        }
    }

    let text = text.join("\n");
    let mut cells = Vec::new();
    let mut data = String::new();
    let mut span = None;
    let mut op: Option<String> = None;
    let mut start = 0;
    for caps in def.separator.captures_iter(&text) {
        let m = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        data.push_str(&text[start..m.start()]);
        if data.ends_with('\\') {
            data.pop();
            data.push_str(m.as_str());
        } else {
            push(&mut cells, std::mem::take(&mut data), span, op.as_deref());
            span = caps.name("span").and_then(|s| s.as_str().parse().ok());
            op = caps.name("op").map(|o| o.as_str().to_string());
        }
        start = m.end();
    }
    data.push_str(&text[start..]);
    push(&mut cells, data, span, op.as_deref());

    // PSV text starts with a separator, leaving a blank first cell.
    if def.format == TableFormat::Psv {
        match cells.first() {
            Some(first) if !first.data.trim().is_empty() => {
                messages.error(format!("[{}] missing leading separator", def.section));
            }
            Some(_) => {
                cells.remove(0);
            }
            None => {}
        }
    }
    cells
}

fn build_rows(cells: Vec<Cell>, colcount: usize) -> Vec<Vec<Cell>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut ci = 0;
    for cell in cells {
        ci += cell.span;
        if ci <= colcount {
            row.push(cell);
        }
        if ci >= colcount {
            rows.push(std::mem::take(&mut row));
            ci = 0;
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }
    rows
}

fn parse_csv(def: &TableDefinition, text: &[String], messages: &mut Messages) -> Vec<Vec<Cell>> {
    let delimiter = u8::try_from(def.csv_separator).unwrap_or(b',');
    let data = text.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::Fields)
        .delimiter(delimiter)
        .from_reader(data.as_bytes());
    let mut rows = Vec::new();
    for record in reader.records() {
        match record {
            Ok(record) => rows.push(
                record
                    .iter()
                    .map(|data| Cell {
                        data: data.to_string(),
                        span: 1,
                    })
                    .collect(),
            ),
            Err(err) => {
                messages.error(format!("[{}] csv parse error: {}", def.section, err));
                break;
            }
        }
    }
    rows
}

fn check_row_spans(rows: &[Vec<Cell>], messages: &mut Messages) {
    let span = |row: &Vec<Cell>| row.iter().map(|c| c.span).sum::<usize>();
    let header_span = match rows.first() {
        Some(row) => span(row),
        None => return,
    };
    for (i, row) in rows.iter().enumerate() {
        let row_span = span(row);
        if row_span < header_span {
            messages.warning(format!("table row {}: does not span all columns", i + 1));
        } else if row_span > header_span {
            messages.warning(format!("table row {}: exceeds columns span", i + 1));
        }
    }
}

fn row(doc: &mut Document, def: &TableDefinition, cells: Vec<Cell>, rowtype: &str) -> CompileResult<Element> {
    let mut children = Vec::with_capacity(cells.len());
    for cell in cells {
        let text: Vec<String> = cell.data.trim().lines().map(String::from).collect();
        let mut element = Element::new(Kind::Cell, "", None).with_lines(subs::subs(doc, &text, &def.subs)?);
        if cell.span > 1 {
            element.attributes.insert("colspan".to_string(), cell.span.to_string());
        }
        children.push(element);
    }
    let mut row = Element::new(Kind::Row, "", None).with_children(children);
    row.attributes.insert("rowtype".to_string(), rowtype.to_string());
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adoc::reader::Source;
    use crate::adoc::settings::{EngineConfig, TableDef};
    use crate::adoc::testing::{compile, compile_with, context_with};
    use rstest::rstest;

    fn elements(text: &str) -> Vec<Element> {
        compile(text).unwrap().elements
    }

    fn lines(text: &str) -> Vec<String> {
        compile(text).unwrap().lines()
    }

    fn warnings(text: &str, needle: &str) -> usize {
        compile(text)
            .unwrap()
            .diagnostics
            .iter()
            .filter(|d| d.message.contains(needle))
            .count()
    }

    #[rstest]
    #[case(":who: World\n\nHello {who}", &["Hello World"])]
    #[case(":a: one +\ntwo\n\n{a}", &["one two"])]
    #[case(":a: <b>\n\n{a}", &["&lt;b&gt;"])]
    #[case(":a: pass:[<b>]\n\n{a}", &["<b>"])]
    #[case(":a: x\n:a!:\n\n{a} dropped\nkept", &["kept"])]
    #[case(":attributes.b: y\n\n{b}", &["y"])]
    fn test_attribute_entries(#[case] input: &str, #[case] expected: &[&str]) {
        assert_eq!(lines(input), expected);
    }

    #[test]
    fn test_command_line_attribute_wins() {
        let mut ctx = context_with(&["a=cmd"]);
        let elements = ctx.compile(Source::text("doc.txt", ":a: doc\n\n{a}")).unwrap();
        assert_eq!(elements[0].lines, vec!["cmd"]);
    }

    #[test]
    fn test_template_section_entry() {
        let mut ctx = context_with(&[]);
        ctx.compile(Source::text("doc.txt", ":tpl.: <hr>")).unwrap();
        assert_eq!(ctx.doc.section("tpl"), Some(&vec!["<hr>".to_string()]));
    }

    #[test]
    fn test_attribute_list_selects_style() {
        let elements = elements("[literal]\nsome *text*");
        assert_eq!(elements[0].attribute("style"), Some("literal"));
        assert_eq!(elements[0].lines, vec!["some *text*"]);
    }

    #[test]
    fn test_block_title_is_consumed_by_next_element() {
        let elements = elements(".Caption\nText\n\nMore");
        assert_eq!(elements[0].attribute("title"), Some("Caption"));
        assert_eq!(elements[1].attribute("title"), None);
    }

    #[test]
    fn test_blank_block_title_warns() {
        assert_eq!(warnings(".{undefined}\ntext", "blank block title"), 1);
    }

    #[test]
    fn test_sections() {
        let elements = elements(":sectids:\n\n== Hello World\n\ntext\n\n[[intro]]\n== Intro");
        assert_eq!(elements[0].kind, Kind::Section);
        assert_eq!(elements[0].name, "sect1");
        assert_eq!(elements[0].lines, vec!["Hello World"]);
        assert_eq!(elements[0].attribute("id"), Some("_hello_world"));
        assert_eq!(elements[0].attribute("level"), Some("1"));
        assert_eq!(elements[1].kind, Kind::Paragraph);
        assert_eq!(elements[2].attribute("id"), Some("intro"));
    }

    #[test]
    fn test_section_numbers() {
        let elements = elements(":numbered:\n\n== One\n\n== Two\n\n=== Sub");
        let numbers: Vec<_> = elements.iter().map(|e| e.attribute("sectnum").unwrap_or_default()).collect();
        assert_eq!(numbers, vec!["1.", "2.", "2.1."]);
    }

    #[test]
    fn test_section_out_of_sequence_warns() {
        assert_eq!(
            warnings("=== Deep", "section title out of sequence: expected level 1, got level 2"),
            1
        );
    }

    #[test]
    fn test_floating_title() {
        let elements = elements("[float]\n== Aside\n\ntext");
        assert_eq!(elements[0].kind, Kind::FloatingTitle);
        assert_eq!(elements[0].name, "floatingtitle");
        assert_eq!(elements[0].lines, vec!["Aside"]);
    }

    #[test]
    fn test_bulleted_list() {
        let elements = elements("- one\n- two");
        assert_eq!(elements.len(), 1);
        let list = &elements[0];
        assert_eq!(list.kind, Kind::List);
        assert_eq!(list.name, "bulleted");
        let items: Vec<_> = list.children.iter().map(|c| c.lines.clone()).collect();
        assert_eq!(items, vec![vec!["one"], vec!["two"]]);
    }

    #[test]
    fn test_nested_list() {
        let elements = elements("- a\n. b\n. c\n- d");
        let list = &elements[0];
        assert_eq!(list.children.len(), 2);
        let nested = &list.children[0].children[0];
        assert_eq!(nested.name, "numbered");
        assert_eq!(nested.attribute("style"), Some("arabic"));
        assert_eq!(nested.children.len(), 2);
        assert_eq!(list.children[1].lines, vec!["d"]);
    }

    #[test]
    fn test_numbered_list_index_is_checked() {
        assert_eq!(warnings("1. one\n3. three", "list item index: expected 2 got 3"), 1);
        assert_eq!(warnings("a. one\nb. two", "list item"), 0);
    }

    #[test]
    fn test_labeled_list() {
        let elements = elements("a::\nb:: text\nc:: more");
        let list = &elements[0];
        assert_eq!(list.children.len(), 2);
        let entry = &list.children[0];
        assert_eq!(entry.kind, Kind::ListEntry);
        let kinds: Vec<_> = entry.children.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![Kind::ListTerm, Kind::ListTerm, Kind::ListItem]);
        assert_eq!(entry.children[2].lines, vec!["text"]);
    }

    #[test]
    fn test_list_continuation() {
        let elements = elements("- item\n+\n----\ncode\n----\n- next");
        let list = &elements[0];
        assert_eq!(list.children.len(), 2);
        let block = &list.children[0].children[0];
        assert_eq!(block.kind, Kind::Block);
        assert_eq!(block.name, "listing");
        assert_eq!(block.lines, vec!["code"]);
    }

    #[test]
    fn test_section_title_in_list_item_is_fatal() {
        let err = compile("- item\n+\n== Title").unwrap_err();
        assert!(err.to_string().contains("section title not allowed in list item"));
    }

    #[test]
    fn test_section_body_block() {
        let elements = elements("****\ntext\n****\nafter");
        assert_eq!(elements[0].name, "sidebar");
        assert_eq!(elements[0].children[0].lines, vec!["text"]);
        assert_eq!(elements[1].lines, vec!["after"]);
    }

    #[test]
    fn test_missing_closing_delimiter() {
        let compilation = compile("----\ncode").unwrap();
        assert_eq!(compilation.elements[0].lines, vec!["code"]);
        assert!(compilation
            .diagnostics
            .iter()
            .any(|d| d.message == "[blockdef-listing] missing closing delimiter"));
    }

    #[test]
    fn test_skipped_block() {
        assert_eq!(lines("////\nhidden\n////\nshown"), vec!["shown"]);
    }

    #[test]
    fn test_psv_table() {
        let elements = elements("[options=\"header\"]\n|===\n|h1 |h2\n|a |b\n|===");
        let table = &elements[0];
        assert_eq!(table.kind, Kind::Table);
        assert_eq!(table.attribute("colcount"), Some("2"));
        assert_eq!(table.children.len(), 2);
        assert_eq!(table.children[0].attribute("rowtype"), Some("header"));
        let cells: Vec<_> = table.children[1].children.iter().map(|c| c.lines.clone()).collect();
        assert_eq!(cells, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_psv_spans() {
        let elements = elements("|===\n|a |b |c\n2+|wide |d\n2*|x |y\n|===");
        let rows = &elements[0].children;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].children[0].attribute("colspan"), Some("2"));
        assert_eq!(rows[2].children.len(), 3);
    }

    #[test]
    fn test_empty_table_warns() {
        let compilation = compile("|===\n|===").unwrap();
        assert!(compilation.elements.is_empty());
        assert!(compilation
            .diagnostics
            .iter()
            .any(|d| d.message == "[tabledef-default] table is empty"));
    }

    #[test]
    fn test_csv_table() {
        let mut config = EngineConfig::default();
        config.syntax.tables.push(TableDef {
            name: "csv".to_string(),
            delimiter: r"^,={3,}$".to_string(),
            format: "csv".to_string(),
            ..Default::default()
        });
        let compilation = compile_with(",===\na,b\nc,d\n,===", config).unwrap();
        let table = &compilation.elements[0];
        assert_eq!(table.name, "csv");
        assert_eq!(table.children.len(), 2);
        assert_eq!(table.children[1].children[1].lines, vec!["d"]);
    }

    #[test]
    fn test_legacy_table() {
        let compilation = compile("`-----\nab\n-----\n\nafter").unwrap();
        let table = &compilation.elements[0];
        assert_eq!(table.kind, Kind::LegacyTable);
        assert_eq!(table.lines, vec!["ab", "-----"]);
        assert_eq!(table.attribute("cols"), Some("1"));
        assert!(compilation.diagnostics.iter().any(|d| d.message == "old tables syntax"));
    }

    #[test]
    fn test_legacy_table_without_underline_is_fatal() {
        let err = compile("`-----\nab").unwrap_err();
        assert!(err
            .to_string()
            .contains("closing [old_tabledef-default] underline expected"));
    }

    #[test]
    fn test_block_macros() {
        let elements = elements("'''\n\nimage::a.png[Logo]");
        assert_eq!(elements[0].name, "ruler");
        assert_eq!(elements[0].lines, vec!["<hr />"]);
        assert_eq!(elements[1].name, "image");
        assert!(elements[1]
            .lines
            .contains(&r#"<img src="a.png" alt="Logo" />"#.to_string()));
    }

    #[test]
    fn test_comment_block_macro_is_dropped() {
        assert_eq!(lines("// a comment\ntext"), vec!["text"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_block_filter() {
        assert_eq!(lines("[filter=\"tr a-z A-Z\"]\n----\nabc\n----"), vec!["ABC"]);
    }

    #[test]
    fn test_filter_refused_in_safe_mode() {
        let mut config = EngineConfig::default();
        config.settings.safe = true;
        let compilation = compile_with("[filter=\"tr a-z A-Z\"]\n----\nabc\n----", config).unwrap();
        assert_eq!(compilation.lines(), vec!["abc"]);
        assert!(compilation
            .diagnostics
            .iter()
            .any(|d| d.message == "unsafe: tr a-z A-Z filter"));
    }

    #[rstest]
    #[case("1.", Some("arabic"), Some(1))]
    #[case("iv)", Some("lowerroman"), Some(4))]
    #[case("IX)", Some("upperroman"), Some(9))]
    #[case("c.", Some("loweralpha"), Some(3))]
    #[case("B.", Some("upperalpha"), Some(2))]
    #[case("-", None, None)]
    fn test_item_index(#[case] index: &str, #[case] style: Option<&str>, #[case] ordinal: Option<usize>) {
        assert_eq!(number_style(index), style);
        assert_eq!(style.and_then(|s| item_ordinal(index, s)), ordinal);
    }

    #[rstest]
    #[case("3", Some(3))]
    #[case("1,2,4", Some(3))]
    #[case("3*,2", Some(4))]
    #[case("", Some(1))]
    fn test_column_count(#[case] cols: &str, #[case] expected: Option<usize>) {
        assert_eq!(column_count(cols), expected);
    }
}
