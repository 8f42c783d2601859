//! Conditional compilation state: `ifdef`, `ifndef`, `ifeval`, `endif`.

use super::super::cursor::Cursor;
use super::super::error::{CompileError, CompileResult};

#[derive(Debug, Default)]
pub(crate) struct Conditionals {
    /// Nesting depth of open conditional regions.
    pub depth: i64,
    /// True while lines are being skipped.
    pub skip: bool,
    /// Depth at which skipping ends.
    pub skipto: i64,
    /// Target of the directive that started skipping.
    pub skipname: String,
    /// Directive that started skipping.
    skipfrom: Option<Cursor>,
    /// Targets of the open regions, innermost last.
    names: Vec<String>,
}

impl Conditionals {
    /// Open a region at `cursor`. `include` is whether its lines are emitted.
    pub fn open(&mut self, target: &str, include: bool, cursor: &Cursor) {
        if !include && !self.skip {
            self.skip = true;
            self.skipto = self.depth;
            self.skipname = target.to_string();
            self.skipfrom = Some(cursor.clone());
        }
        self.names.push(target.to_string());
        self.depth += 1;
    }

    /// Open a nested region while skipping; only depth is tracked.
    pub fn open_skipped(&mut self, target: &str) {
        self.names.push(target.to_string());
        self.depth += 1;
    }

    /// Close the innermost region. A non-empty `target` must name the
    /// directive being closed.
    pub fn close(&mut self, target: &str, cursor: &Cursor) -> CompileResult<()> {
        self.depth -= 1;
        if self.depth < 0 {
            return Err(mismatched(cursor));
        }
        let opened = self.names.pop().unwrap_or_default();
        if !target.is_empty() && target != opened {
            return Err(mismatched(cursor));
        }
        if self.skip && self.depth == self.skipto {
            self.skip = false;
            self.skipfrom = None;
        }
        Ok(())
    }

    /// Error for end of input while a region is being skipped, located at
    /// the directive that started skipping.
    pub fn missing_endif(&self) -> CompileError {
        CompileError::structural(
            format!("missing endif::{}[]", self.skipname),
            self.skipfrom.clone(),
        )
    }
}

fn mismatched(cursor: &Cursor) -> CompileError {
    CompileError::structural(
        format!("mismatched macro: {}", cursor.text),
        Some(cursor.clone()),
    )
}
