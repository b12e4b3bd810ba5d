//! Language adapter interface
//!
//! This module defines the stable API surface the engine expects from a
//! language adapter (JavaScript, Ruby, Python, ...). The engine never looks
//! inside an adapter: it asks it to turn literal text, expressions and
//! include expressions into source code, to compile source code into a
//! [`Program`], and optionally to call a named entry point defined by an
//! earlier run.

use serde_json::Value as JsonValue;

use crate::context::ExecutionContext;
use crate::error::{ExecutionError, ParsingError};

/// Construction-time metadata handed to [`LanguageAdapter::create_program`],
/// mostly for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct ProgramInfo<'a> {
    /// Name of the document the program belongs to.
    pub document_name: &'a str,
    /// Ordinal of the segment within its executable.
    pub position: usize,
    /// Line of the segment start in the original document (1-based).
    pub start_line: u32,
    /// Column of the segment start in the original document (1-based).
    pub start_column: u32,
}

/// A compiled (or compilable) unit of source code in one language.
pub trait Program: Send + Sync {
    /// The source code this program was created from.
    fn source_code(&self) -> &str;

    /// Eager preparation (compile-ahead). Optional; adapters that only
    /// compile on first execution leave the default.
    fn prepare(&self) -> Result<(), ParsingError> {
        Ok(())
    }

    fn execute(&self, context: &mut ExecutionContext) -> Result<(), ExecutionError>;
}

/// The capability contract for one pluggable language.
///
/// Adapters are stateless from the engine's point of view and shared behind
/// an `Arc`; per-run state belongs in the [`ExecutionContext`] attributes.
pub trait LanguageAdapter: Send + Sync {
    /// Human-readable adapter name, for diagnostics.
    fn name(&self) -> &str;

    /// Language tags this adapter serves, e.g. `["js", "javascript"]`.
    /// Never empty.
    fn tags(&self) -> Vec<String>;

    /// The tag to report when this adapter is picked by extension.
    fn default_tag(&self) -> String;

    /// Filename extensions this adapter serves, e.g. `["js"]`.
    fn extensions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Whether concurrent calls into this adapter are safe. Adapters that
    /// return false are serialized process-wide by the registry's
    /// per-adapter lock.
    fn is_thread_safe(&self) -> bool;

    /// Source code that writes the given literal text to standard output.
    fn source_code_for_literal_output(&self, literal: &str) -> String;

    /// Source code that evaluates the expression and writes the result to
    /// standard output.
    fn source_code_for_expression_output(&self, expression: &str) -> String;

    /// Source code that evaluates the expression to a document name and
    /// includes that document via the container service.
    fn source_code_for_expression_include(&self, expression: &str) -> String;

    fn create_program(
        &self,
        source_code: String,
        info: &ProgramInfo<'_>,
    ) -> Result<Box<dyn Program>, ParsingError>;

    /// Calls a named entry point (function, closure, method) defined during
    /// an earlier execution in this context. Optional.
    fn enter(
        &self,
        entry_point: &str,
        context: &mut ExecutionContext,
        args: &[JsonValue],
    ) -> Result<JsonValue, ExecutionError> {
        let _ = (context, args);
        Err(ExecutionError::new(
            crate::error::ExecutionErrorKind::Adapter {
                message: format!("{} does not support entry points: {}", self.name(), entry_point),
            },
        ))
    }
}

/// Optional hooks applied around a whole execution (not per segment).
/// Hooks are skipped once a context has been made immutable.
pub trait ExecutionController: Send + Sync {
    /// Called before the first segment runs; typically exposes variables.
    fn initialize(&self, context: &mut ExecutionContext) -> Result<(), ExecutionError>;

    /// Called after the run, on success and on error.
    fn release(&self, context: &mut ExecutionContext) {
        let _ = context;
    }
}
