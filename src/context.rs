//! Execution context
//!
//! Per-call mutable state passed into every segment execution: the output
//! writers, the variables and services exposed to programs, and a bag of
//! attributes for adapter-private state. A context is owned by its caller
//! and must not be shared across threads without external synchronization;
//! for concurrent execution of one executable, give each thread its own
//! context.

use std::any::Any;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::registry::RegisteredAdapter;

pub struct ExecutionContext {
    writer: Box<dyn Write + Send>,
    error_writer: Box<dyn Write + Send>,
    exposed_variables: HashMap<String, JsonValue>,
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
    attributes: HashMap<String, Box<dyn Any + Send>>,
    current_adapter: Option<RegisteredAdapter>,
    immutable: bool,
}

impl ExecutionContext {
    /// A context whose output is discarded. Set writers before executing
    /// anything whose output matters.
    pub fn new() -> Self {
        Self::with_writers(Box::new(io::sink()), Box::new(io::sink()))
    }

    pub fn with_writers(
        writer: Box<dyn Write + Send>,
        error_writer: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            writer,
            error_writer,
            exposed_variables: HashMap::new(),
            services: HashMap::new(),
            attributes: HashMap::new(),
            current_adapter: None,
            immutable: false,
        }
    }

    /* ===================== Writers ===================== */

    pub fn write(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())
    }

    pub fn write_error(&mut self, text: &str) -> io::Result<()> {
        self.error_writer.write_all(text.as_bytes())
    }

    pub fn writer(&mut self) -> &mut (dyn Write + Send) {
        &mut *self.writer
    }

    pub fn error_writer(&mut self) -> &mut (dyn Write + Send) {
        &mut *self.error_writer
    }

    /// Swaps the standard writer, returning the previous one.
    pub fn set_writer(&mut self, writer: Box<dyn Write + Send>) -> Box<dyn Write + Send> {
        std::mem::replace(&mut self.writer, writer)
    }

    /// Swaps the error writer, returning the previous one.
    pub fn set_error_writer(
        &mut self,
        error_writer: Box<dyn Write + Send>,
    ) -> Box<dyn Write + Send> {
        std::mem::replace(&mut self.error_writer, error_writer)
    }

    /* ===================== Exposed state ===================== */

    /// Variables exposed to programs by name.
    pub fn exposed_variables(&self) -> &HashMap<String, JsonValue> {
        &self.exposed_variables
    }

    pub fn exposed_variables_mut(&mut self) -> &mut HashMap<String, JsonValue> {
        &mut self.exposed_variables
    }

    /// Services exposed to programs, e.g. the handle back to the executing
    /// executable installed under its exposed name.
    pub fn service(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.services.get(name).cloned()
    }

    pub fn services_mut(&mut self) -> &mut HashMap<String, Arc<dyn Any + Send + Sync>> {
        &mut self.services
    }

    /// Adapter-private state keyed by convention (e.g. an interpreter handle
    /// per context).
    pub fn attribute(&self, name: &str) -> Option<&(dyn Any + Send)> {
        self.attributes.get(name).map(|value| &**value)
    }

    pub fn attributes_mut(&mut self) -> &mut HashMap<String, Box<dyn Any + Send>> {
        &mut self.attributes
    }

    /* ===================== Adapter tracking ===================== */

    /// The adapter that most recently executed in this context.
    pub fn current_adapter(&self) -> Option<&RegisteredAdapter> {
        self.current_adapter.as_ref()
    }

    pub(crate) fn set_current_adapter(&mut self, adapter: RegisteredAdapter) {
        self.current_adapter = Some(adapter);
    }

    /* ===================== Immutability ===================== */

    /// Once immutable, controller hooks and service swapping are skipped;
    /// set when the context is claimed as an enterable context.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub(crate) fn make_immutable(&mut self) {
        self.immutable = true;
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("exposed_variables", &self.exposed_variables.len())
            .field("services", &self.services.len())
            .field("attributes", &self.attributes.len())
            .field("immutable", &self.immutable)
            .finish()
    }
}

/// A writer collecting output into a shared buffer; handy for callers that
/// need the rendered output as a string.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
