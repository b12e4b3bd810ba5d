//! Language-agnostic scriptlet document engine.
//!
//! Documents are text with embedded scriptlets (`<% ... %>` or `<? ... ?>`)
//! in any mix of languages, each served by a pluggable [`LanguageAdapter`].
//! A document is compiled once into an [`Executable`] of collapsed segments,
//! cached on its [`DocumentDescriptor`], and executed many times against
//! per-call [`ExecutionContext`]s. The [`DocumentService`] lets running
//! programs include and execute further documents through the same cache.

pub mod adapter;
pub mod cli;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod executable;
pub mod parser;
pub mod registry;
pub mod segment;
pub mod service;

#[cfg(test)]
mod test_helpers;

pub use adapter::{ExecutionController, LanguageAdapter, Program, ProgramInfo};
pub use config::EngineConfig;
pub use context::{ExecutionContext, SharedBuffer};
pub use document::{DocumentDescriptor, DocumentSource, FileDocumentSource, MemoryDocumentSource};
pub use error::{Error, ExecutionError, ParsingError, Result, StackFrame};
pub use executable::Executable;
pub use parser::ParsingContext;
pub use registry::{LanguageRegistry, RegisteredAdapter};
pub use segment::Segment;
pub use service::DocumentService;
