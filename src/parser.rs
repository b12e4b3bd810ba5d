//! Segmenter
//!
//! Splits text-with-scriptlets source into raw segments. A document uses
//! exactly one delimiter style, `<% %>` or `<? ?>`, decided by whichever
//! start delimiter occurs first. Inside a scriptlet, an optional shorthand
//! character follows the start delimiter (`=` expression, `&` include,
//! `:` in-flow), then an optional language tag, then the body.
//!
//! Expression and include shorthands are turned into program source here,
//! since this is the only point that knows they need an adapter; an unknown
//! tag on a shorthand therefore fails during segmentation, while a plain
//! scriptlet in an unknown language only fails once its program is resolved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pest::Parser;
use pest_derive::Parser;
use tracing::trace;

use crate::document::DocumentSource;
use crate::error::{ParsingError, ParsingErrorKind, StackFrame};
use crate::registry::LanguageRegistry;
use crate::segment::RawSegment;

#[derive(Parser)]
#[grammar = "document.pest"]
struct DocumentParser;

const PERCENT: (&str, &str) = ("<%", "%>");
const QUESTION: (&str, &str) = ("<?", "?>");

const EXPRESSION_SHORTHAND: char = '=';
const INCLUDE_SHORTHAND: char = '&';
const IN_FLOW_SHORTHAND: char = ':';

const IN_FLOW_PREFIX: &str = "_IN_FLOW_";

static IN_FLOW_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Everything segmentation needs besides the source text itself.
#[derive(Clone)]
pub struct ParsingContext {
    pub registry: Arc<LanguageRegistry>,
    pub default_language_tag: String,
    /// Eagerly prepare (compile-ahead) every resolved program.
    pub prepare: bool,
    /// Where synthesized in-flow documents are registered; in-flow scriptlets
    /// in a different language than the active one require a source.
    pub document_source: Option<Arc<dyn DocumentSource>>,
    /// Name under which the container service is exposed to programs.
    pub exposed_executable_name: String,
}

impl ParsingContext {
    pub fn new(registry: Arc<LanguageRegistry>, default_language_tag: impl Into<String>) -> Self {
        Self {
            registry,
            default_language_tag: default_language_tag.into(),
            prepare: false,
            document_source: None,
            exposed_executable_name: "document".into(),
        }
    }

    pub fn with_document_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.document_source = Some(source);
        self
    }

    pub fn with_prepare(mut self, prepare: bool) -> Self {
        self.prepare = prepare;
        self
    }
}

impl std::fmt::Debug for ParsingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsingContext")
            .field("default_language_tag", &self.default_language_tag)
            .field("prepare", &self.prepare)
            .field("has_document_source", &self.document_source.is_some())
            .finish()
    }
}

/// A synthesized sub-document for an in-flow scriptlet, to be compiled and
/// registered by the executable that owns the enclosing document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InFlowDocument {
    pub name: String,
    pub source_code: String,
}

/// Output of segmentation, before collapsing and program resolution.
#[derive(Debug)]
pub(crate) struct SegmentedDocument {
    pub segments: Vec<RawSegment>,
    pub delimiter_start: Option<&'static str>,
    pub delimiter_end: Option<&'static str>,
    pub in_flow_documents: Vec<InFlowDocument>,
}

/* ===================== Segmentation ===================== */

pub(crate) fn segment_source(
    document_name: &str,
    source_code: &str,
    context: &ParsingContext,
) -> Result<SegmentedDocument, ParsingError> {
    // Delimiter style: whichever start delimiter occurs first wins.
    let style = match (source_code.find(PERCENT.0), source_code.find(QUESTION.0)) {
        (Some(p), Some(q)) => Some(if p <= q { PERCENT } else { QUESTION }),
        (Some(_), None) => Some(PERCENT),
        (None, Some(_)) => Some(QUESTION),
        (None, None) => None,
    };

    let Some((delimiter_start, delimiter_end)) = style else {
        // Trivial document: a single literal segment.
        return Ok(SegmentedDocument {
            segments: vec![RawSegment::literal(
                source_code,
                &context.default_language_tag,
                1,
                1,
            )],
            delimiter_start: None,
            delimiter_end: None,
            in_flow_documents: Vec::new(),
        });
    };

    let rule = if delimiter_start == PERCENT.0 {
        Rule::percent_document
    } else {
        Rule::question_document
    };

    let document = DocumentParser::parse(rule, source_code)
        .map_err(|error| missing_end_delimiter(document_name, &error))?
        .next()
        .ok_or_else(|| {
            ParsingError::malformed("empty parse result", StackFrame::new(document_name))
        })?;

    let mut active_tag = context.default_language_tag.clone();
    let mut segments: Vec<RawSegment> = Vec::new();
    let mut in_flow_documents: Vec<InFlowDocument> = Vec::new();

    for pair in document.into_inner() {
        match pair.as_rule() {
            Rule::percent_text | Rule::question_text => {
                let (line, column) = pair.as_span().start_pos().line_col();
                segments.push(RawSegment::literal(
                    pair.as_str(),
                    &active_tag,
                    line as u32,
                    column as u32,
                ));
            }
            Rule::percent_scriptlet | Rule::question_scriptlet => {
                let body = pair.into_inner().next().ok_or_else(|| {
                    ParsingError::malformed("scriptlet without body", StackFrame::new(document_name))
                })?;
                let (line, column) = body.as_span().start_pos().line_col();
                process_scriptlet(
                    document_name,
                    body.as_str(),
                    line as u32,
                    column as u32,
                    (delimiter_start, delimiter_end),
                    context,
                    &mut active_tag,
                    &mut segments,
                    &mut in_flow_documents,
                )?;
            }
            Rule::EOI => {}
            _ => {}
        }
    }

    if segments.is_empty() {
        segments.push(RawSegment::literal("", &active_tag, 1, 1));
    }

    trace!(
        document = document_name,
        segments = segments.len(),
        in_flow = in_flow_documents.len(),
        "segmented"
    );

    Ok(SegmentedDocument {
        segments,
        delimiter_start: Some(delimiter_start),
        delimiter_end: Some(delimiter_end),
        in_flow_documents,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shorthand {
    Expression,
    Include,
    InFlow,
}

#[allow(clippy::too_many_arguments)]
fn process_scriptlet(
    document_name: &str,
    body: &str,
    mut line: u32,
    mut column: u32,
    delimiters: (&'static str, &'static str),
    context: &ParsingContext,
    active_tag: &mut String,
    segments: &mut Vec<RawSegment>,
    in_flow_documents: &mut Vec<InFlowDocument>,
) -> Result<(), ParsingError> {
    let mut rest = body;

    let shorthand = match rest.chars().next() {
        Some(EXPRESSION_SHORTHAND) => Some(Shorthand::Expression),
        Some(INCLUDE_SHORTHAND) => Some(Shorthand::Include),
        Some(IN_FLOW_SHORTHAND) => Some(Shorthand::InFlow),
        _ => None,
    };
    if shorthand.is_some() {
        advance(&mut line, &mut column, &rest[..1]);
        rest = &rest[1..];
    }

    // Optional language tag: the contiguous non-whitespace run right after
    // the marker. One whitespace character after it belongs to the syntax.
    let mut explicit_tag: Option<&str> = None;
    if rest.chars().next().is_some_and(|c| !c.is_whitespace()) {
        let end = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        explicit_tag = Some(&rest[..end]);
        advance(&mut line, &mut column, &rest[..end]);
        rest = &rest[end..];
        if let Some(c) = rest.chars().next() {
            advance(&mut line, &mut column, &rest[..c.len_utf8()]);
            rest = &rest[c.len_utf8()..];
        }
    }

    let mut shorthand = shorthand;
    let tag = explicit_tag.unwrap_or(active_tag).to_string();

    // An in-flow scriptlet in the already-active language gains nothing from
    // the detour through a synthesized document.
    if shorthand == Some(Shorthand::InFlow) && tag == *active_tag {
        shorthand = None;
    }

    if !rest.trim().is_empty() {
        match shorthand {
            Some(Shorthand::Expression) | Some(Shorthand::Include) => {
                let entry = context.registry.adapter_by_tag(&tag).ok_or_else(|| {
                    ParsingError::adapter_not_found(&tag, StackFrame::at(document_name, line, column))
                })?;
                let code = if shorthand == Some(Shorthand::Expression) {
                    entry.adapter().source_code_for_expression_output(rest)
                } else {
                    entry.adapter().source_code_for_expression_include(rest)
                };
                segments.push(RawSegment::program(code, &tag, line, column));
            }
            Some(Shorthand::InFlow) => {
                // The include replacing the in-flow runs in the previously
                // active language, so that adapter is the one needed here.
                let entry = context.registry.adapter_by_tag(active_tag).ok_or_else(|| {
                    ParsingError::adapter_not_found(
                        active_tag.as_str(),
                        StackFrame::at(document_name, line, column),
                    )
                })?;
                if context.document_source.is_none() {
                    return Err(ParsingError::with_frame(
                        ParsingErrorKind::Malformed {
                            message: "in-flow scriptlet requires a document source".into(),
                        },
                        StackFrame::at(document_name, line, column),
                    ));
                }

                let name = format!(
                    "{}{}",
                    IN_FLOW_PREFIX,
                    IN_FLOW_COUNTER.fetch_add(1, Ordering::SeqCst)
                );
                in_flow_documents.push(InFlowDocument {
                    name: name.clone(),
                    source_code: format!(
                        "{}{} {}{}",
                        delimiters.0, tag, rest, delimiters.1
                    ),
                });
                let code = entry
                    .adapter()
                    .source_code_for_expression_include(&format!("'{}'", name));
                segments.push(RawSegment::program(code, active_tag.as_str(), line, column));
            }
            None => {
                segments.push(RawSegment::program(rest, &tag, line, column));
            }
        }
    }

    // An explicit tag switches the active language even when the scriptlet
    // body is empty; in-flow leaves the active language alone.
    if shorthand != Some(Shorthand::InFlow) {
        *active_tag = tag;
    }

    Ok(())
}

fn advance(line: &mut u32, column: &mut u32, consumed: &str) {
    for c in consumed.chars() {
        if c == '\n' {
            *line += 1;
            *column = 1;
        } else {
            *column += 1;
        }
    }
}

fn missing_end_delimiter(document_name: &str, error: &pest::error::Error<Rule>) -> ParsingError {
    let (line, column) = match error.line_col {
        pest::error::LineColLocation::Pos((line, column)) => (line, column),
        pest::error::LineColLocation::Span((line, column), _) => (line, column),
    };
    ParsingError::with_frame(
        ParsingErrorKind::MissingEndDelimiter,
        StackFrame::at(document_name, line as u32, column as u32),
    )
}
