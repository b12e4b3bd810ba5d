//! Container service
//!
//! The service running programs use to pull in other documents. It is
//! exposed to every program under the parsing context's exposed name, so a
//! scriptlet (or the code an include shorthand expands to) can ask the
//! container to execute another document into the same context.
//!
//! The service also maintains a per-context document stack: while a document
//! runs, anything it pulls in is recorded as a dependency of its descriptor,
//! so editing an included document invalidates its includers.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::adapter::ExecutionController;
use crate::context::ExecutionContext;
use crate::document::{DocumentDescriptor, DocumentSource};
use crate::error::{Error, Result};
use crate::executable::Executable;
use crate::parser::ParsingContext;

const DOCUMENT_STACK_ATTRIBUTE: &str = "weft.document_stack";
const EXECUTED_ATTRIBUTE: &str = "weft.executed";

pub struct DocumentService {
    source: Arc<dyn DocumentSource>,
    parsing_context: ParsingContext,
    controller: Option<Arc<dyn ExecutionController>>,
}

impl DocumentService {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        mut parsing_context: ParsingContext,
        controller: Option<Arc<dyn ExecutionController>>,
    ) -> Arc<Self> {
        parsing_context.document_source = Some(source.clone());
        Arc::new(Self {
            source,
            parsing_context,
            controller,
        })
    }

    pub fn source(&self) -> &Arc<dyn DocumentSource> {
        &self.source
    }

    pub fn parsing_context(&self) -> &ParsingContext {
        &self.parsing_context
    }

    /// Executes a programmatic document: the whole source is one program in
    /// the default language.
    pub fn execute(self: &Arc<Self>, name: &str, context: &mut ExecutionContext) -> Result<()> {
        self.run(name, false, context)
    }

    /// Includes a text-with-scriptlets document into the context's output.
    pub fn include(self: &Arc<Self>, name: &str, context: &mut ExecutionContext) -> Result<()> {
        self.run(name, true, context)
    }

    /// Executes a programmatic document unless it already ran in this
    /// context; returns whether it ran now.
    pub fn execute_once(
        self: &Arc<Self>,
        name: &str,
        context: &mut ExecutionContext,
    ) -> Result<bool> {
        if !self.mark_executed(name, context) {
            trace!(document = name, "already executed in this context");
            return Ok(false);
        }
        self.execute(name, context)?;
        Ok(true)
    }

    /// Marks a document as executed in this context; returns whether it was
    /// previously unmarked.
    pub fn mark_executed(&self, name: &str, context: &mut ExecutionContext) -> bool {
        let executed = context
            .attributes_mut()
            .entry(EXECUTED_ATTRIBUTE.to_string())
            .or_insert_with(|| Box::new(HashSet::<String>::new()));
        match executed.downcast_mut::<HashSet<String>>() {
            Some(executed) => executed.insert(name.to_string()),
            None => false,
        }
    }

    fn run(
        self: &Arc<Self>,
        name: &str,
        text_with_scriptlets: bool,
        context: &mut ExecutionContext,
    ) -> Result<()> {
        let (descriptor, executable) =
            Executable::create_once(name, text_with_scriptlets, &self.parsing_context)?;

        if let Some(current) = current_descriptor(context) {
            current.add_dependency(name);
        }
        push_descriptor(context, descriptor);

        let result = executable.execute(context, Some(self), self.controller.as_deref());

        pop_descriptor(context);
        result.map_err(Error::Execution)
    }
}

impl std::fmt::Debug for DocumentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentService")
            .field("source", &self.source.identifier())
            .finish()
    }
}

/* ===================== Document stack ===================== */

type DescriptorStack = Vec<Arc<DocumentDescriptor>>;

fn current_descriptor(context: &ExecutionContext) -> Option<Arc<DocumentDescriptor>> {
    context
        .attribute(DOCUMENT_STACK_ATTRIBUTE)
        .and_then(|attribute| attribute.downcast_ref::<DescriptorStack>())
        .and_then(|stack| stack.last().cloned())
}

fn push_descriptor(context: &mut ExecutionContext, descriptor: Arc<DocumentDescriptor>) {
    let stack = context
        .attributes_mut()
        .entry(DOCUMENT_STACK_ATTRIBUTE.to_string())
        .or_insert_with(|| Box::new(DescriptorStack::new()));
    if let Some(stack) = stack.downcast_mut::<DescriptorStack>() {
        stack.push(descriptor);
    }
}

fn pop_descriptor(context: &mut ExecutionContext) {
    if let Some(stack) = context
        .attributes_mut()
        .get_mut(DOCUMENT_STACK_ATTRIBUTE)
        .and_then(|attribute| attribute.downcast_mut::<DescriptorStack>())
    {
        stack.pop();
    }
}

/* ===================== Tests ===================== */
