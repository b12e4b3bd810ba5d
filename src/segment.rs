//! Segments and the segment collapser
//!
//! The segmenter produces a flat list of raw segments (literal text or
//! program source). Two collapse passes then minimize the number of
//! segments, and with it the number of distinct programs and adapter
//! context switches at run time, without changing the output order.

use crate::adapter::Program;
use crate::error::{ParsingError, StackFrame};
use crate::registry::{LanguageRegistry, RegisteredAdapter};

/// A segment before program resolution: plain data, owned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawSegment {
    pub source_code: String,
    pub is_program: bool,
    pub language_tag: String,
    pub start_line: u32,
    pub start_column: u32,
}

impl RawSegment {
    pub fn literal(
        source_code: impl Into<String>,
        language_tag: impl Into<String>,
        start_line: u32,
        start_column: u32,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            is_program: false,
            language_tag: language_tag.into(),
            start_line,
            start_column,
        }
    }

    pub fn program(
        source_code: impl Into<String>,
        language_tag: impl Into<String>,
        start_line: u32,
        start_column: u32,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            is_program: true,
            language_tag: language_tag.into(),
            start_line,
            start_column,
        }
    }
}

/// A resolved program segment: the compiled program plus the registry entry
/// that owns the adapter's exclusion lock.
pub(crate) struct ResolvedProgram {
    pub program: Box<dyn Program>,
    pub adapter: RegisteredAdapter,
}

pub(crate) enum SegmentBody {
    Literal,
    Program(ResolvedProgram),
}

/// One segment of a compiled executable. Immutable once the executable is
/// built; owned exclusively by it.
pub struct Segment {
    pub(crate) source_code: String,
    pub(crate) language_tag: String,
    pub(crate) start_line: u32,
    pub(crate) start_column: u32,
    pub(crate) position: usize,
    pub(crate) body: SegmentBody,
}

impl Segment {
    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn is_program(&self) -> bool {
        matches!(self.body, SegmentBody::Program(_))
    }

    pub fn language_tag(&self) -> &str {
        &self.language_tag
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn start_column(&self) -> u32 {
        self.start_column
    }

    /// Ordinal of this segment within its executable.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("is_program", &self.is_program())
            .field("language_tag", &self.language_tag)
            .field("start_line", &self.start_line)
            .field("start_column", &self.start_column)
            .field("position", &self.position)
            .field("source_code", &self.source_code)
            .finish()
    }
}

/* ===================== Collapse passes ===================== */

/// Pass 1: merge adjacent segments of the same kind and language by
/// concatenating their source text. The earlier segment's start position is
/// kept. Pure text merge; no adapter calls.
pub(crate) fn collapse_adjacent(segments: Vec<RawSegment>) -> Vec<RawSegment> {
    let mut out: Vec<RawSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if let Some(previous) = out.last_mut() {
            if previous.is_program == segment.is_program
                && previous.language_tag == segment.language_tag
            {
                previous.source_code.push_str(&segment.source_code);
                continue;
            }
        }
        out.push(segment);
    }
    out
}

/// Pass 2: fold a literal segment into an immediately preceding program
/// segment of the same language, converting the literal via the adapter's
/// literal-output transform. A leading literal is never merged forward, so
/// the first segment stays literal if it started that way and can be
/// written directly without any adapter.
pub(crate) fn collapse_literals_into_programs(
    document_name: &str,
    segments: Vec<RawSegment>,
    registry: &LanguageRegistry,
) -> Result<Vec<RawSegment>, ParsingError> {
    let mut out: Vec<RawSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        if let Some(previous) = out.last_mut() {
            if previous.is_program && previous.language_tag == segment.language_tag {
                if segment.is_program {
                    previous.source_code.push_str(&segment.source_code);
                } else {
                    let entry = registry.adapter_by_tag(&segment.language_tag).ok_or_else(|| {
                        ParsingError::adapter_not_found(
                            &segment.language_tag,
                            StackFrame::at(document_name, segment.start_line, segment.start_column),
                        )
                    })?;
                    previous.source_code.push_str(
                        &entry
                            .adapter()
                            .source_code_for_literal_output(&segment.source_code),
                    );
                }
                continue;
            }
        }
        out.push(segment);
    }
    Ok(out)
}
