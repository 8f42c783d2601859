//! One open input source on the reader's include stack.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor as IoCursor};
use std::path::{Path, PathBuf};

use super::super::cursor::Cursor;

/// Name used for standard input in cursors and messages.
pub const STDIN_NAME: &str = "<stdin>";

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Where a frame reads its lines from.
pub enum Source {
    Path(PathBuf),
    Stdin,
    /// In-memory text with a display name.
    Text { name: String, text: String },
}

impl Source {
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Source::Text {
            name: name.into(),
            text: text.into(),
        }
    }
}

pub(crate) struct Frame {
    pub name: String,
    /// Set for file backed frames.
    pub path: Option<PathBuf>,
    input: Box<dyn BufRead>,
    pub lineno: usize,
    pub tabsize: usize,
    pub current_depth: usize,
    pub max_depth: usize,
    pub pushback: VecDeque<Cursor>,
}

impl Frame {
    pub fn open(source: Source, tabsize: usize, max_depth: usize) -> io::Result<Self> {
        let (name, path, input): (String, Option<PathBuf>, Box<dyn BufRead>) = match source {
            Source::Path(path) => {
                let file = File::open(&path)?;
                (
                    path.to_string_lossy().into_owned(),
                    Some(path),
                    Box::new(BufReader::new(file)),
                )
            }
            Source::Stdin => (
                STDIN_NAME.to_string(),
                None,
                Box::new(BufReader::new(io::stdin())),
            ),
            Source::Text { name, text } => {
                (name, None, Box::new(IoCursor::new(text.into_bytes())))
            }
        };
        Ok(Self {
            name,
            path,
            input,
            lineno: 0,
            tabsize,
            current_depth: 0,
            max_depth,
            pushback: VecDeque::new(),
        })
    }

    /// Directory of a file backed frame.
    pub fn dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Next raw line without its terminator, or `None` at end of input.
    pub fn read_raw(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        if self.input.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        self.lineno += 1;
        Ok(Some(buf))
    }
}

/// Outcome of decoding a raw line.
pub(crate) enum Decoded {
    Text(String),
    /// The encoding name is unsupported; the line was decoded as lossy UTF-8.
    Unsupported(String),
}

/// Decode `bytes` per `encoding`. A UTF-8 byte order mark is dropped when
/// `first_line` is set.
pub(crate) fn decode(bytes: &[u8], encoding: &str, first_line: bool) -> Decoded {
    let bytes = if first_line && bytes.starts_with(UTF8_BOM) {
        &bytes[UTF8_BOM.len()..]
    } else {
        bytes
    };
    match encoding.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" | "utf-8-sig" | "ascii" | "us-ascii" => {
            Decoded::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" | "l1" => {
            Decoded::Text(bytes.iter().map(|&b| b as char).collect())
        }
        _ => Decoded::Unsupported(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Expand tabs to the next multiple of `tabsize` columns.
pub fn expand_tabs(s: &str, tabsize: usize) -> String {
    if tabsize == 0 || !s.contains('\t') {
        return s.to_string();
    }
    let mut result = String::with_capacity(s.len());
    let mut column = 0;
    for c in s.chars() {
        match c {
            '\t' => {
                let n = tabsize - (column % tabsize);
                result.extend(std::iter::repeat(' ').take(n));
                column += n;
            }
            '\n' | '\r' => {
                result.push(c);
                column = 0;
            }
            _ => {
                result.push(c);
                column += 1;
            }
        }
    }
    result
}
