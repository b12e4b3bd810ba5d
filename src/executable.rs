//! Compiled executables
//!
//! An [`Executable`] is the compiled form of one document: an immutable
//! sequence of segments, each either literal text the engine writes directly
//! or a program owned by one language adapter. Compilation happens once;
//! execution happens arbitrarily often, concurrently, each run against its
//! own [`ExecutionContext`].
//!
//! Beyond plain execution an executable can be made *enterable*: one
//! execution context is run once, claimed and frozen, after which named
//! entry points defined during that run can be called repeatedly without
//! re-executing the whole document.

use std::any::Any;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use crate::adapter::{ExecutionController, ProgramInfo};
use crate::context::ExecutionContext;
use crate::document::DocumentDescriptor;
use crate::error::{
    DocumentError, Error, ExecutionError, ExecutionErrorKind, ParsingError, StackFrame,
};
use crate::parser::{self, ParsingContext};
use crate::segment::{
    collapse_adjacent, collapse_literals_into_programs, RawSegment, ResolvedProgram, Segment,
    SegmentBody,
};
use crate::service::DocumentService;

pub struct Executable {
    document_name: String,
    /// Identifier of the document source this executable was compiled from.
    partition: String,
    document_timestamp: i64,
    segments: Vec<Segment>,
    delimiter_start: Option<&'static str>,
    delimiter_end: Option<&'static str>,
    exposed_executable_name: String,
    attributes: DashMap<String, JsonValue>,
    last_executed: AtomicI64,
    enterable: Mutex<Option<ExecutionContext>>,
    in_flow_dependencies: Vec<String>,
}

impl Executable {
    /// Compiles a document. With `text_with_scriptlets` the source is
    /// segmented, collapsed and resolved; otherwise the whole source is one
    /// program in the context's default language.
    pub fn new(
        document_name: &str,
        partition: &str,
        document_timestamp: i64,
        source_code: &str,
        text_with_scriptlets: bool,
        context: &ParsingContext,
    ) -> Result<Arc<Self>, ParsingError> {
        let (raw, delimiters, in_flow_documents) = if text_with_scriptlets {
            let segmented = parser::segment_source(document_name, source_code, context)?;
            (
                segmented.segments,
                (segmented.delimiter_start, segmented.delimiter_end),
                segmented.in_flow_documents,
            )
        } else {
            (
                vec![RawSegment::program(
                    source_code,
                    &context.default_language_tag,
                    1,
                    1,
                )],
                (None, None),
                Vec::new(),
            )
        };

        // Each in-flow scriptlet becomes its own compiled document,
        // registered under its synthesized name so the replacement include
        // can find it at run time.
        let mut in_flow_dependencies = Vec::with_capacity(in_flow_documents.len());
        for in_flow in in_flow_documents {
            let executable = Executable::new(
                &format!("{}/{}", document_name, in_flow.name),
                partition,
                document_timestamp,
                &in_flow.source_code,
                true,
                context,
            )?;
            let source = context.document_source.as_ref().ok_or_else(|| {
                ParsingError::malformed(
                    "in-flow scriptlet requires a document source",
                    StackFrame::new(document_name),
                )
            })?;
            source
                .set_document(&in_flow.name, &in_flow.source_code, "", Some(executable))
                .map_err(|error| {
                    ParsingError::malformed(error.to_string(), StackFrame::new(document_name))
                })?;
            in_flow_dependencies.push(in_flow.name);
        }

        let raw = collapse_adjacent(raw);
        let raw = collapse_literals_into_programs(document_name, raw, &context.registry)?;
        let segments = resolve_segments(document_name, raw, context)?;

        debug!(
            document = document_name,
            segments = segments.len(),
            "compiled executable"
        );

        Ok(Arc::new(Self {
            document_name: document_name.to_string(),
            partition: partition.to_string(),
            document_timestamp,
            segments,
            delimiter_start: delimiters.0,
            delimiter_end: delimiters.1,
            exposed_executable_name: context.exposed_executable_name.clone(),
            attributes: DashMap::new(),
            last_executed: AtomicI64::new(0),
            enterable: Mutex::new(None),
            in_flow_dependencies,
        }))
    }

    /// Fetches the compiled executable for a named document, compiling and
    /// caching it if needed. Concurrent callers may compile in parallel, but
    /// the descriptor's insert-if-absent guarantees all of them end up
    /// holding the same winner.
    pub fn create_once(
        document_name: &str,
        text_with_scriptlets: bool,
        context: &ParsingContext,
    ) -> Result<(Arc<DocumentDescriptor>, Arc<Executable>), Error> {
        let source = context
            .document_source
            .clone()
            .ok_or(DocumentError::NoSource)?;
        let descriptor = source.get_document(document_name)?;
        if let Some(executable) = descriptor.executable() {
            trace!(document = document_name, "executable cache hit");
            return Ok((descriptor, executable));
        }

        // For text documents, the filename extension picks the default
        // scriptlet language when it maps to a registered adapter.
        let mut effective = context.clone();
        if text_with_scriptlets {
            if let Some(tag) = context.registry.language_tag_by_extension(
                document_name,
                Some(descriptor.tag()),
                &context.default_language_tag,
            ) {
                effective.default_language_tag = tag;
            }
        }

        let executable = Executable::new(
            document_name,
            source.identifier(),
            descriptor.timestamp(),
            descriptor.source_code(),
            text_with_scriptlets,
            &effective,
        )?;
        for dependency in executable.in_flow_dependencies() {
            descriptor.add_dependency(dependency.clone());
        }
        let winner = descriptor.set_executable_if_absent(executable);
        Ok((descriptor, winner))
    }

    /* ===================== Accessors ===================== */

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Timestamp of the document content this executable was compiled from.
    pub fn document_timestamp(&self) -> i64 {
        self.document_timestamp
    }

    /// Millisecond timestamp of the last successful execution; 0 if never.
    pub fn last_executed(&self) -> i64 {
        self.last_executed.load(Ordering::SeqCst)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn delimiter_start(&self) -> Option<&'static str> {
        self.delimiter_start
    }

    pub fn delimiter_end(&self) -> Option<&'static str> {
        self.delimiter_end
    }

    /// Shared attribute map for container bookkeeping across runs.
    pub fn attributes(&self) -> &DashMap<String, JsonValue> {
        &self.attributes
    }

    /// Names of in-flow sub-documents this executable registered.
    pub fn in_flow_dependencies(&self) -> &[String] {
        &self.in_flow_dependencies
    }

    /// If the whole document collapsed to literal text, that text; callers
    /// can then skip execution entirely.
    pub fn as_pure_text(&self) -> Option<&str> {
        match &self.segments[..] {
            [only] if !only.is_program() => Some(only.source_code()),
            _ => None,
        }
    }

    /* ===================== Execution ===================== */

    /// Runs every segment in order against the context. The container
    /// service, when given, is exposed to programs under the configured name
    /// for the duration of the run and restored afterwards.
    pub fn execute(
        &self,
        context: &mut ExecutionContext,
        service: Option<&Arc<DocumentService>>,
        controller: Option<&dyn ExecutionController>,
    ) -> Result<(), ExecutionError> {
        let immutable = context.is_immutable();

        let mut installed = false;
        let mut previous: Option<Arc<dyn Any + Send + Sync>> = None;
        if !immutable {
            if let Some(service) = service {
                previous = context.services_mut().insert(
                    self.exposed_executable_name.clone(),
                    service.clone() as Arc<dyn Any + Send + Sync>,
                );
                installed = true;
            }
        }

        let result = (|| {
            if !immutable {
                if let Some(controller) = controller {
                    controller.initialize(context)?;
                }
            }
            self.run_segments(context)
        })();

        if installed {
            match previous {
                Some(previous) => {
                    context
                        .services_mut()
                        .insert(self.exposed_executable_name.clone(), previous);
                }
                None => {
                    context.services_mut().remove(&self.exposed_executable_name);
                }
            }
        }
        if !immutable {
            if let Some(controller) = controller {
                controller.release(context);
            }
        }

        if result.is_ok() {
            self.last_executed
                .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        }
        result
    }

    fn run_segments(&self, context: &mut ExecutionContext) -> Result<(), ExecutionError> {
        for segment in &self.segments {
            match &segment.body {
                SegmentBody::Literal => {
                    context.write(segment.source_code()).map_err(|error| {
                        ExecutionError::with_frame(
                            ExecutionErrorKind::Io {
                                message: error.to_string(),
                            },
                            StackFrame::at(
                                &self.document_name,
                                segment.start_line(),
                                segment.start_column(),
                            ),
                        )
                    })?;
                }
                SegmentBody::Program(resolved) => {
                    context.set_current_adapter(resolved.adapter.clone());
                    let _guard = resolved.adapter.acquire();
                    resolved.program.execute(context).map_err(|mut error| {
                        error.push_frame(StackFrame::at(
                            &self.document_name,
                            segment.start_line(),
                            segment.start_column(),
                        ));
                        error
                    })?;
                }
            }
        }
        Ok(())
    }

    /* ===================== Entering ===================== */

    /// Executes once in the given context, then tries to claim it as this
    /// executable's shared enterable context. Returns `false` without
    /// executing when one is already claimed; a context that loses the race
    /// after executing is discarded.
    pub fn make_enterable(
        &self,
        mut context: ExecutionContext,
        service: Option<&Arc<DocumentService>>,
        controller: Option<&dyn ExecutionController>,
    ) -> Result<bool, ExecutionError> {
        if self.enterable.lock().is_some() {
            return Ok(false);
        }

        self.execute(&mut context, service, controller)?;

        let mut slot = self.enterable.lock();
        if slot.is_some() {
            return Ok(false);
        }
        context.make_immutable();
        *slot = Some(context);
        debug!(document = %self.document_name, "made enterable");
        Ok(true)
    }

    /// Calls a named entry point defined during the enterable run. Entries
    /// share the claimed context, so they are serialized.
    pub fn enter(
        &self,
        entry_point: &str,
        args: &[JsonValue],
    ) -> Result<JsonValue, ExecutionError> {
        let mut slot = self.enterable.lock();
        let context = slot
            .as_mut()
            .ok_or_else(|| ExecutionError::not_enterable(&self.document_name))?;
        let adapter = context.current_adapter().cloned().ok_or_else(|| {
            ExecutionError::adapter(
                "enterable context has no adapter",
                StackFrame::new(&self.document_name),
            )
        })?;

        let _guard = adapter.acquire();
        adapter
            .adapter()
            .enter(entry_point, context, args)
            .map_err(|mut error| {
                error.push_frame(StackFrame::new(&self.document_name));
                error
            })
    }

    /// Releases the enterable context, if any. Idempotent; the executable
    /// can be made enterable again afterwards.
    pub fn release(&self) {
        if self.enterable.lock().take().is_some() {
            debug!(document = %self.document_name, "released enterable context");
        }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executable")
            .field("document_name", &self.document_name)
            .field("partition", &self.partition)
            .field("segments", &self.segments.len())
            .field("enterable", &self.enterable.lock().is_some())
            .finish()
    }
}

/* ===================== Resolution ===================== */

/// Turns raw segments into final ones: literals pass through, program
/// source is compiled by its language's adapter. This is where a plain
/// scriptlet in an unregistered language finally fails.
fn resolve_segments(
    document_name: &str,
    raw: Vec<RawSegment>,
    context: &ParsingContext,
) -> Result<Vec<Segment>, ParsingError> {
    let mut segments = Vec::with_capacity(raw.len());
    for (position, segment) in raw.into_iter().enumerate() {
        let frame = StackFrame::at(document_name, segment.start_line, segment.start_column);
        let body = if segment.is_program {
            let entry = context
                .registry
                .adapter_by_tag(&segment.language_tag)
                .ok_or_else(|| {
                    ParsingError::adapter_not_found(&segment.language_tag, frame.clone())
                })?;
            let info = ProgramInfo {
                document_name,
                position,
                start_line: segment.start_line,
                start_column: segment.start_column,
            };
            let program = entry
                .adapter()
                .create_program(segment.source_code.clone(), &info)
                .map_err(|mut error| {
                    error.push_frame(frame.clone());
                    error
                })?;
            if context.prepare {
                program.prepare().map_err(|mut error| {
                    error.push_frame(frame.clone());
                    error
                })?;
            }
            SegmentBody::Program(ResolvedProgram {
                program,
                adapter: entry,
            })
        } else {
            SegmentBody::Literal
        };
        segments.push(Segment {
            source_code: segment.source_code,
            language_tag: segment.language_tag,
            start_line: segment.start_line,
            start_column: segment.start_column,
            position,
            body,
        });
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedBuffer;
    use crate::error::ParsingErrorKind;
    use crate::test_helpers::{buffer_context, parsing_context};

    fn compile(source: &str) -> Arc<Executable> {
        Executable::new("doc", "test", 0, source, true, &parsing_context()).unwrap()
    }

    #[test]
    fn literal_and_expression_segments_render_in_order() {
        let executable = compile("Hello <%=js 2+2%> World");
        let buffer = SharedBuffer::new();
        let mut context = buffer_context(&buffer);
        executable.execute(&mut context, None, None).unwrap();
        assert_eq!(buffer.contents(), "Hello 4 World");
    }

    #[test]
    fn collapsing_keeps_leading_literal_unconverted() {
        let executable = compile("Hello <%=js 2+2%> World");
        // "Hello " stays literal; the expression and trailing literal fold
        // into one program.
        assert_eq!(executable.segments().len(), 2);
        assert!(!executable.segments()[0].is_program());
        assert!(executable.segments()[1].is_program());
    }

    #[test]
    fn pure_text_document_is_exposed_as_such() {
        let executable = compile("just text");
        assert_eq!(executable.as_pure_text(), Some("just text"));
        assert!(compile("a<%js b();%>").as_pure_text().is_none());
    }

    #[test]
    fn pure_source_mode_compiles_whole_input_as_one_program() {
        let executable =
            Executable::new("doc", "test", 0, "print('hi');", false, &parsing_context()).unwrap();
        assert_eq!(executable.segments().len(), 1);
        assert!(executable.segments()[0].is_program());
        assert!(executable.as_pure_text().is_none());

        let buffer = SharedBuffer::new();
        let mut context = buffer_context(&buffer);
        executable.execute(&mut context, None, None).unwrap();
        assert_eq!(buffer.contents(), "hi");
    }

    #[test]
    fn unknown_language_fails_at_resolution() {
        let error =
            Executable::new("doc", "test", 0, "<%elvish sing()%>", true, &parsing_context())
                .unwrap_err();
        assert!(matches!(
            error.kind(),
            ParsingErrorKind::AdapterNotFound { tag } if tag == "elvish"
        ));
    }

    #[test]
    fn execution_error_carries_document_frame() {
        let executable = compile("<%js bogus%>");
        let mut context = ExecutionContext::new();
        let error = executable.execute(&mut context, None, None).unwrap_err();
        let frame = error.stack().last().unwrap();
        assert_eq!(frame.document_name, "doc");
    }

    #[test]
    fn last_executed_is_updated_on_success() {
        let executable = compile("text");
        assert_eq!(executable.last_executed(), 0);
        let mut context = ExecutionContext::new();
        executable.execute(&mut context, None, None).unwrap();
        assert!(executable.last_executed() > 0);
    }

    #[test]
    fn enter_before_make_enterable_is_rejected() {
        let executable = compile("<%js def greet 'hello'%>");
        let error = executable.enter("greet", &[]).unwrap_err();
        assert!(matches!(error.kind(), ExecutionErrorKind::NotEnterable));
    }

    #[test]
    fn enterable_lifecycle() {
        let executable = compile("<%js def greet 'hello'%>");

        assert!(executable
            .make_enterable(ExecutionContext::new(), None, None)
            .unwrap());
        // Second claim loses without executing.
        assert!(!executable
            .make_enterable(ExecutionContext::new(), None, None)
            .unwrap());

        let result = executable.enter("greet", &[]).unwrap();
        assert_eq!(result, JsonValue::String("hello".into()));

        let missing = executable.enter("nope", &[]).unwrap_err();
        assert!(missing.is_entry_point_not_found());

        executable.release();
        executable.release();
        let error = executable.enter("greet", &[]).unwrap_err();
        assert!(matches!(error.kind(), ExecutionErrorKind::NotEnterable));

        // Re-claimable after release.
        assert!(executable
            .make_enterable(ExecutionContext::new(), None, None)
            .unwrap());
    }

    #[test]
    fn eager_preparation_fails_at_compile_time() {
        let context = parsing_context().with_prepare(true);
        let error =
            Executable::new("doc", "test", 0, "<%js bogus%>", true, &context).unwrap_err();
        assert!(matches!(error.kind(), ParsingErrorKind::Preparation { .. }));
    }

    #[test]
    fn attributes_are_shared_across_runs() {
        let executable = compile("text");
        executable
            .attributes()
            .insert("counter".into(), JsonValue::from(1));
        assert_eq!(
            executable.attributes().get("counter").map(|v| v.clone()),
            Some(JsonValue::from(1))
        );
    }
}
