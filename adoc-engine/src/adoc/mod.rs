//! Main module for adoc engine functionality

pub mod attributes;
pub mod attrlist;
pub mod context;
pub mod cursor;
pub mod definitions;
pub mod dispatch;
pub mod error;
pub mod expression;
pub mod macros;
pub mod message;
pub mod reader;
pub mod settings;
pub mod shell;
pub mod subs;
pub mod substitution;
pub mod system;
pub mod testing;
pub mod title;
pub mod translate;
