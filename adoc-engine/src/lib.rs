//! # adoc-engine
//!
//! The document compilation engine for the adoc markup language.
//!
//! adoc is a forgiving, configuration driven markup language: every
//! structural element and every inline construct is described by regular
//! expressions and template sections supplied through
//! [`EngineConfig`](adoc::settings::EngineConfig). This crate drives the
//! substitution engines over the line oriented input stream:
//!
//!   reader ──> dispatch ──> translate
//!     │            │            │
//!     │            └── macros ──┤
//!     └── substitution ── system
//!
//! - The [reader](adoc::reader) yields normalized lines and resolves
//!   `include::` and `ifdef::`/`ifndef::`/`ifeval::` transparently.
//! - The [substitution](adoc::substitution) engine expands `{…}` references.
//! - The [system](adoc::system) evaluator implements the action vocabulary
//!   (`eval`, `sys`, `counter`, `set`, `include`, `template`, …).
//! - The [macros](adoc::macros) engine expands regex macros and protects
//!   passthrough text.
//! - The [dispatcher](adoc::dispatch) decides which element comes next.
//!
//! Everything lives inside one [`CompileContext`](adoc::context::CompileContext)
//! per compile; there is no global state.

#![allow(rustdoc::invalid_html_tags)]

pub mod adoc;

pub use adoc::context::{compile_file, compile_str, Compilation, CompileContext};
pub use adoc::error::{CompileError, CompileResult};
pub use adoc::settings::EngineConfig;
