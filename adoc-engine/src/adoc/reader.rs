//! Line oriented input reader
//!
//! The reader hands out logical lines: decoded, right trimmed and tab
//! expanded. `include::` directives are resolved by pushing a new
//! [frame](frame::Frame) onto an explicit stack, and conditional directives
//! (`ifdef`, `ifndef`, `ifeval`, `endif`) are consumed so callers see one
//! flat stream of emitted lines.
//!
//! Lookahead is implemented with per-frame pushback queues: [`Reader::unread`]
//! puts a cursor back and the next [`Reader::read`] hands it out again. Lines
//! produced by read-time directive processing are marked resolved on their
//! cursor so pushed back lines are never evaluated twice.
//!
//! All methods take the [`Document`] explicitly: the reader consults and
//! updates document attributes (`infile`, `indir`, `encoding`) and reports
//! through its message sink.

mod conditional;
mod frame;

pub use frame::{expand_tabs, Source, STDIN_NAME};

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::attributes::AttributeTable;
use super::attrlist::parse_attributes;
use super::context::Document;
use super::cursor::Cursor;
use super::error::{CompileError, CompileResult};
use super::expression;
use super::macros::{passthrough, MacroMatch, MacroPrefix};
use super::substitution::substitute_line;
use super::system::{self, ActionOutput, Invocation};
use conditional::Conditionals;
use frame::{decode, Decoded, Frame};

static NON_BLANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\S").unwrap());
static ENV_VAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:\{(?P<braced>[^}]*)\}|(?P<plain>\w+))").unwrap());

const CONDITIONAL_NAMES: &str = "ifdef|ifndef|ifeval|endif";
const EXECUTABLE_NAMES: &str = "eval|sys|sys2";
const ESCAPED_NAMES: &str =
    r"\\eval|\\sys|\\sys2|\\ifdef|\\ifndef|\\endif|\\include|\\include1";

pub struct Reader {
    frames: Vec<Frame>,
    cursor: Option<Cursor>,
    conditionals: Conditionals,
    warned_encodings: HashSet<String>,
}

enum Included {
    /// Continue with the next line (child opened or directive skipped).
    Next,
    /// Hand out this line instead of the directive.
    Line(Cursor),
}

impl Reader {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            cursor: None,
            conditionals: Conditionals::default(),
            warned_encodings: HashSet::new(),
        }
    }

    /// Open the top level source, discarding any previous state.
    pub fn open(&mut self, doc: &mut Document, source: Source) -> CompileResult<()> {
        if let Source::Path(path) = &source {
            if !path.is_file() {
                return Err(CompileError::NotFound(path.clone()));
            }
        }
        let path = match &source {
            Source::Path(p) => Some(p.clone()),
            _ => None,
        };
        let settings = &doc.config.settings;
        let frame = Frame::open(source, settings.tabsize, settings.max_include_depth).map_err(
            |source| CompileError::Io {
                path: path.unwrap_or_else(|| PathBuf::from(STDIN_NAME)),
                source,
            },
        )?;
        doc.messages.verbose(format!("reading: {}", frame.name));
        self.frames.clear();
        self.cursor = None;
        self.conditionals = Conditionals::default();
        self.push_frame(doc, frame);
        Ok(())
    }

    /// Cursor of the line most recently returned by [`read`](Self::read).
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Include depth of the frame currently being read.
    pub fn depth(&self) -> usize {
        self.frames.last().map(|f| f.current_depth).unwrap_or(0)
    }

    /// Read and process the next line. `None` at end of input.
    pub fn read(&mut self, doc: &mut Document) -> CompileResult<Option<String>> {
        loop {
            let skip = self.conditionals.skip;
            let mut cursor = match self.read_raw(doc, skip)? {
                Some(cursor) => cursor,
                None if skip => return Err(self.conditionals.missing_endif()),
                None => return Ok(None),
            };
            if skip {
                self.track_skipped(&cursor)?;
                continue;
            }
            if cursor.is_resolved() {
                return Ok(Some(self.emit(doc, cursor)));
            }
            if let Some(m) =
                doc.macros
                    .match_directive(MacroPrefix::System, CONDITIONAL_NAMES, &cursor.text)
            {
                if let Some(line) = self.conditional(doc, &cursor, &m)? {
                    cursor.resolve(line);
                    return Ok(Some(self.emit(doc, cursor)));
                }
                continue;
            }
            if let Some(m) =
                doc.macros
                    .match_directive(MacroPrefix::System, EXECUTABLE_NAMES, &cursor.text)
            {
                let name = m.name().to_string();
                let args = m.attrlist().to_string();
                match system::evaluate(doc, &name, &args, Invocation::Directive, None) {
                    ActionOutput::Text(text) => cursor.resolve(text),
                    ActionOutput::Suppress | ActionOutput::Rejected => continue,
                }
            } else if doc
                .macros
                .match_directive(MacroPrefix::System, ESCAPED_NAMES, &cursor.text)
                .is_some()
            {
                let unescaped = cursor.text[1..].to_string();
                cursor.resolve(unescaped);
            }
            return Ok(Some(self.emit(doc, cursor)));
        }
    }

    /// Like [`read`](Self::read) but does not advance.
    pub fn read_next(&mut self, doc: &mut Document) -> CompileResult<Option<String>> {
        Ok(self.peek_cursor(doc)?.map(|c| c.text))
    }

    /// Cursor of the next line without advancing.
    pub fn peek_cursor(&mut self, doc: &mut Document) -> CompileResult<Option<Cursor>> {
        let saved = self.cursor.clone();
        if self.read(doc)?.is_none() {
            return Ok(None);
        }
        let next = self.cursor.take();
        if let Some(cursor) = &next {
            self.unread(cursor.clone());
        }
        self.restore_cursor(doc, saved);
        Ok(next)
    }

    /// True if all lines have been read.
    pub fn eof(&mut self, doc: &mut Document) -> CompileResult<bool> {
        Ok(self.read_next(doc)?.is_none())
    }

    /// Push a line back; the caller restores the previous cursor if needed.
    pub fn unread(&mut self, cursor: Cursor) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pushback.push_front(cursor);
        }
    }

    /// Read up to `count` lines.
    pub fn read_lines(&mut self, doc: &mut Document, count: usize) -> CompileResult<Vec<String>> {
        let mut result = Vec::new();
        while result.len() < count {
            match self.read(doc)? {
                Some(line) => result.push(line),
                None => break,
            }
        }
        Ok(result)
    }

    /// Same as [`read_lines`](Self::read_lines) but does not advance.
    pub fn read_ahead(&mut self, doc: &mut Document, count: usize) -> CompileResult<Vec<String>> {
        let saved = self.cursor.clone();
        let mut result = Vec::new();
        let mut putback = Vec::new();
        while result.len() < count {
            match self.read(doc)? {
                Some(line) => {
                    result.push(line);
                    if let Some(cursor) = self.cursor.clone() {
                        putback.push(cursor);
                    }
                }
                None => break,
            }
        }
        while let Some(cursor) = putback.pop() {
            self.unread(cursor);
        }
        self.restore_cursor(doc, saved);
        Ok(result)
    }

    pub fn skip_blank_lines(&mut self, doc: &mut Document) -> CompileResult<()> {
        self.read_until(doc, &[&*NON_BLANK_RE], false)?;
        Ok(())
    }

    /// Read lines up to, not including, the first line matching one of the
    /// `terminators`. With `same_file` only lines from the file being read
    /// when called can terminate.
    pub fn read_until(
        &mut self,
        doc: &mut Document,
        terminators: &[&Regex],
        same_file: bool,
    ) -> CompileResult<Vec<String>> {
        let source = self.cursor.as_ref().map(|c| c.source.clone());
        let mut result = Vec::new();
        loop {
            let saved = self.cursor.clone();
            let line = match self.read(doc)? {
                Some(line) => line,
                None => break,
            };
            let here = self.cursor.as_ref().map(|c| &c.source);
            if !same_file || source.as_ref() == here {
                if terminators.iter().any(|re| re.is_match(&line)) {
                    if let Some(cursor) = self.cursor.take() {
                        self.unread(cursor);
                    }
                    self.restore_cursor(doc, saved);
                    return Ok(result);
                }
            }
            result.push(line);
        }
        Ok(result)
    }

    fn emit(&mut self, doc: &mut Document, cursor: Cursor) -> String {
        let text = cursor.text.clone();
        doc.messages.set_cursor(Some(cursor.clone()));
        self.cursor = Some(cursor);
        text
    }

    fn restore_cursor(&mut self, doc: &mut Document, cursor: Option<Cursor>) {
        doc.messages.set_cursor(cursor.clone());
        self.cursor = cursor;
    }

    fn push_frame(&mut self, doc: &mut Document, frame: Frame) {
        set_location(doc, &frame);
        self.frames.push(frame);
    }

    /// Drop an exhausted child frame. False if only the top level is left.
    fn pop_frame(&mut self, doc: &mut Document) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        self.frames.pop();
        if let Some(parent) = self.frames.last() {
            set_location(doc, parent);
        }
        true
    }

    /// Next line from the frame stack with include directives resolved
    /// (unless `skip`).
    fn read_raw(&mut self, doc: &mut Document, skip: bool) -> CompileResult<Option<Cursor>> {
        loop {
            let cursor = match self.next_cursor(doc)? {
                Some(cursor) => cursor,
                None => return Ok(None),
            };
            doc.messages.set_cursor(Some(cursor.clone()));
            if skip || cursor.is_resolved() {
                return Ok(Some(cursor));
            }
            let m = match doc
                .macros
                .match_directive(MacroPrefix::System, "include1?", &cursor.text)
            {
                Some(m) => m,
                None => return Ok(Some(cursor)),
            };
            match self.include(doc, cursor, &m)? {
                Included::Line(cursor) => return Ok(Some(cursor)),
                Included::Next => continue,
            }
        }
    }

    fn next_cursor(&mut self, doc: &mut Document) -> CompileResult<Option<Cursor>> {
        loop {
            let frame = match self.frames.last_mut() {
                Some(frame) => frame,
                None => return Ok(None),
            };
            if let Some(cursor) = frame.pushback.pop_front() {
                return Ok(Some(cursor));
            }
            let bytes = frame.read_raw().map_err(|source| CompileError::Io {
                path: PathBuf::from(&frame.name),
                source,
            })?;
            let bytes = match bytes {
                Some(bytes) => bytes,
                None => {
                    if self.pop_frame(doc) {
                        continue;
                    }
                    return Ok(None);
                }
            };
            let (name, lineno, tabsize) = (frame.name.clone(), frame.lineno, frame.tabsize);
            let cursor = Cursor::new(name, lineno, "");
            let encoding = doc.attributes.get("encoding").unwrap_or("utf-8").to_string();
            let text = match decode(&bytes, &encoding, lineno == 1) {
                Decoded::Text(text) => text,
                Decoded::Unsupported(text) => {
                    if self.warned_encodings.insert(encoding.clone()) {
                        doc.messages.set_cursor(Some(cursor.clone()));
                        doc.messages
                            .warning(format!("unsupported encoding: {}: decoding as utf-8", encoding));
                    }
                    text
                }
            };
            let text = text.trim_end();
            if text.starts_with(":encoding:") {
                if let Some(encoding) = text.split(':').nth(2) {
                    doc.attributes.set("encoding", encoding.trim());
                }
            }
            let mut text = expand_tabs(text, tabsize);
            if passthrough::contains_reserved(&text) {
                doc.messages.set_cursor(Some(cursor.clone()));
                doc.messages.warning("reserved character replaced in input");
                text = passthrough::sanitize(&text);
            }
            return Ok(Some(Cursor { text, ..cursor }));
        }
    }

    fn include(
        &mut self,
        doc: &mut Document,
        mut cursor: Cursor,
        m: &MacroMatch,
    ) -> CompileResult<Included> {
        let mut attrs = AttributeTable::new();
        parse_attributes(m.attrlist(), &mut attrs);
        let warnings = !attrs.get("warnings").map(is_false).unwrap_or(false);
        let (current_depth, max_depth, parent_dir, file_backed) = match self.frames.last() {
            Some(frame) => (
                frame.current_depth,
                frame.max_depth,
                frame.dir().map(Path::to_path_buf),
                frame.path.is_some(),
            ),
            None => return Ok(Included::Line(cursor)),
        };
        if current_depth >= max_depth {
            doc.messages.warning("maximum include depth exceeded");
            let text = cursor.text.clone();
            cursor.resolve(text);
            return Ok(Included::Line(cursor));
        }
        let target = match substitute_line(doc, m.target(), None) {
            Some(target) if !target.is_empty() => target,
            _ => return Ok(Included::Next),
        };
        let expanded = expand_path(&target);
        let path = if file_backed {
            let dir = parent_dir.unwrap_or_default();
            let path = if expanded.is_absolute() {
                normalize(&expanded)
            } else {
                normalize(&dir.join(&expanded))
            };
            if doc.config.settings.safe && !is_inside(&path, &dir) {
                doc.messages
                    .unsafe_(format!("include file: {}", path.display()));
                return Ok(Included::Next);
            }
            path
        } else {
            if doc.config.settings.safe {
                doc.messages
                    .unsafe_(format!("include file: {}", expanded.display()));
                return Ok(Included::Next);
            }
            expanded
        };
        if !path.is_file() {
            if warnings {
                doc.messages
                    .warning(format!("include file not found: {}", path.display()));
            }
            return Ok(Included::Next);
        }
        let key = path.to_string_lossy().into_owned();
        if m.name() == "include1" {
            if !doc.include1.contains_key(&key) {
                doc.messages.verbose(format!("include1: {}", key));
                let bytes = std::fs::read(&path).map_err(|source| CompileError::Io {
                    path: path.clone(),
                    source,
                })?;
                let lines = String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(|s| s.trim_end().to_string())
                    .collect();
                doc.include1.insert(key.clone(), lines);
            }
            cursor.resolve(format!("{{include1:{}}}", key));
            return Ok(Included::Line(cursor));
        }
        let tabsize = match attrs.get("tabsize") {
            Some(v) => v.trim().parse::<usize>().map_err(|_| {
                CompileError::structural(
                    "illegal include macro tabsize argument",
                    Some(cursor.clone()),
                )
            })?,
            None => doc.config.settings.tabsize,
        };
        let max_depth = match attrs.get("depth") {
            Some(v) => match v.trim().parse::<usize>() {
                Ok(n) if n >= 1 => current_depth + n,
                _ => {
                    return Err(CompileError::structural(
                        "include macro: illegal 'depth' argument",
                        Some(cursor.clone()),
                    ))
                }
            },
            None => max_depth,
        };
        doc.messages.verbose(format!("include: {}", key));
        let mut frame = Frame::open(Source::Path(path.clone()), tabsize, max_depth)
            .map_err(|source| CompileError::Io { path, source })?;
        frame.current_depth = current_depth + 1;
        self.push_frame(doc, frame);
        Ok(Included::Next)
    }

    /// Process a conditional directive on an emitted line. Returns the text
    /// of an inline conditional that holds.
    fn conditional(
        &mut self,
        doc: &mut Document,
        cursor: &Cursor,
        m: &MacroMatch,
    ) -> CompileResult<Option<String>> {
        let target = m.target();
        let attrlist = m.attrlist();
        match m.name() {
            "endif" => {
                self.conditionals.close(target, cursor)?;
                Ok(None)
            }
            name @ ("ifdef" | "ifndef") => {
                if target.is_empty() {
                    return Err(missing_target(cursor));
                }
                let holds = doc.attributes.is_defined(target) == (name == "ifdef");
                if !attrlist.is_empty() {
                    return Ok(holds.then(|| attrlist.to_string()));
                }
                self.conditionals.open(target, holds, cursor);
                Ok(None)
            }
            _ => {
                if doc.config.settings.safe {
                    doc.messages.unsafe_("ifeval invalid");
                    return Err(CompileError::structural(
                        "ifeval invalid safe document",
                        Some(cursor.clone()),
                    ));
                }
                if attrlist.is_empty() {
                    return Err(CompileError::structural(
                        format!("missing ifeval condition: {}", cursor.text),
                        Some(cursor.clone()),
                    ));
                }
                let mut holds = false;
                if let Some(expr) = substitute_line(doc, attrlist, None) {
                    if !expr.is_empty() {
                        let value = expression::evaluate(&expr).map_err(|e| {
                            CompileError::structural(
                                format!(
                                    "error evaluating ifeval condition: {}: {}",
                                    cursor.text, e
                                ),
                                Some(cursor.clone()),
                            )
                        })?;
                        holds = expression::is_truthy(&value);
                        doc.messages.verbose(format!("ifeval: {}: {}", expr, holds));
                    }
                }
                self.conditionals.open(target, holds, cursor);
                Ok(None)
            }
        }
    }

    /// Track nesting of conditionals inside a skipped region.
    fn track_skipped(&mut self, cursor: &Cursor) -> CompileResult<()> {
        let m = match skipped_directive(&cursor.text) {
            Some(m) => m,
            None => return Ok(()),
        };
        let (name, target, attrlist) = m;
        match name.as_str() {
            "endif" => self.conditionals.close(&target, cursor),
            "ifdef" | "ifndef" => {
                if target.is_empty() {
                    return Err(missing_target(cursor));
                }
                if attrlist.is_empty() {
                    self.conditionals.open_skipped(&target);
                }
                Ok(())
            }
            _ => {
                if attrlist.is_empty() {
                    return Err(CompileError::structural(
                        format!("missing ifeval condition: {}", cursor.text),
                        Some(cursor.clone()),
                    ));
                }
                self.conditionals.open_skipped(&target);
                Ok(())
            }
        }
    }
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

static SKIPPED_DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>ifdef|ifndef|ifeval|endif)::(?P<target>\S*?)(\[(?P<attrlist>.*?)\])$")
        .unwrap()
});

/// Conditional directives seen while skipping. Skipped lines never reach
/// the macro table so configuration changes inside them have no effect.
fn skipped_directive(line: &str) -> Option<(String, String, String)> {
    let caps = SKIPPED_DIRECTIVE_RE.captures(line)?;
    let group = |n: &str| caps.name(n).map(|m| m.as_str().to_string()).unwrap_or_default();
    Some((group("name"), group("target"), group("attrlist")))
}

fn missing_target(cursor: &Cursor) -> CompileError {
    CompileError::structural(
        format!("missing macro target: {}", cursor.text),
        Some(cursor.clone()),
    )
}

fn is_false(value: &str) -> bool {
    matches!(value.trim(), "" | "0" | "False" | "false" | "None")
}

fn set_location(doc: &mut Document, frame: &Frame) {
    match &frame.path {
        Some(path) => {
            doc.attributes.set("infile", path.to_string_lossy());
            let dir = path
                .parent()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default();
            doc.attributes.set("indir", dir);
        }
        None => {
            doc.attributes.remove("infile");
            doc.attributes.remove("indir");
        }
    }
    doc.tabsize = frame.tabsize;
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unknown variables
/// are left as written.
fn expand_path(target: &str) -> PathBuf {
    let mut s = target.to_string();
    if s == "~" || s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            s = format!("{}{}", home.to_string_lossy(), &s[1..]);
        }
    }
    let s = ENV_VAR_RE.replace_all(&s, |caps: &regex::Captures| {
        let name = caps
            .name("braced")
            .or_else(|| caps.name("plain"))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
    });
    PathBuf::from(s.into_owned())
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// True if `path` lies inside `dir`. Compares canonical paths when both exist.
pub(crate) fn is_inside(path: &Path, dir: &Path) -> bool {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    match (path.canonicalize(), dir.canonicalize()) {
        (Ok(p), Ok(d)) => p.starts_with(d),
        _ => normalize(path).starts_with(normalize(dir)),
    }
}
