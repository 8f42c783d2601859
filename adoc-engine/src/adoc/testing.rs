//! Builders for tests
//!
//! Contexts and documents over the built-in [`EngineConfig`] defaults, so
//! unit and integration tests need no configuration files.

use super::context::{CommandAttributes, Compilation, CompileContext, Document};
use super::error::CompileResult;
use super::reader::Source;
use super::settings::EngineConfig;

/// A document over the default configuration.
pub fn document() -> Document {
    Document::new(EngineConfig::default(), CommandAttributes::new()).expect("default configuration compiles")
}

/// A document over the default configuration in safe mode.
pub fn safe_document() -> Document {
    let mut config = EngineConfig::default();
    config.settings.safe = true;
    Document::new(config, CommandAttributes::new()).expect("default configuration compiles")
}

/// A context over the default configuration with `attributes` given as
/// command line attributes (`name=value`, `name`, `name!`).
pub fn context_with(attributes: &[&str]) -> CompileContext {
    let cmd = attributes
        .iter()
        .map(|a| super::context::parse_command_attribute(a))
        .collect();
    CompileContext::with_attributes(EngineConfig::default(), cmd).expect("default configuration compiles")
}

/// Compile `text` over the default configuration, keeping diagnostics.
pub fn compile(text: &str) -> CompileResult<Compilation> {
    compile_with(text, EngineConfig::default())
}

pub fn compile_with(text: &str, config: EngineConfig) -> CompileResult<Compilation> {
    let mut ctx = CompileContext::new(config)?;
    let elements = ctx.compile(Source::text("doc.txt", text))?;
    Ok(Compilation {
        elements,
        diagnostics: ctx.doc.messages.take(),
    })
}
