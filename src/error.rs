//! Error model
//!
//! Two top-level error kinds cross the engine boundary: [`ParsingError`] for
//! anything that fails while turning source text into an executable, and
//! [`ExecutionError`] for anything that fails while running one. Both carry
//! an accumulating stack of [`StackFrame`]s so that an error crossing an
//! include or in-flow boundary keeps the full document trace.

use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;

/// One frame of a document call stack: where in which document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub document_name: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl StackFrame {
    pub fn new(document_name: impl Into<String>) -> Self {
        Self {
            document_name: document_name.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(document_name: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            document_name: document_name.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{}:{}:{}", self.document_name, line, column)
            }
            (Some(line), None) => write!(f, "{}:{}", self.document_name, line),
            _ => write!(f, "{}", self.document_name),
        }
    }
}

fn write_stack(f: &mut fmt::Formatter<'_>, stack: &VecDeque<StackFrame>) -> fmt::Result {
    if stack.is_empty() {
        return Ok(());
    }
    write!(f, " [")?;
    for (i, frame) in stack.iter().enumerate() {
        if i > 0 {
            write!(f, " <- ")?;
        }
        write!(f, "{}", frame)?;
    }
    write!(f, "]")
}

/* ===================== Parsing ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsingErrorKind {
    #[error("scriptlet is missing its closing delimiter")]
    MissingEndDelimiter,

    #[error("adapter not found: {tag}")]
    AdapterNotFound { tag: String },

    #[error("program preparation failed: {message}")]
    Preparation { message: String },

    #[error("{message}")]
    Malformed { message: String },
}

/// A failure of a single compilation attempt. The executable is discarded
/// and never cached.
#[derive(Debug, Clone)]
pub struct ParsingError {
    kind: ParsingErrorKind,
    stack: VecDeque<StackFrame>,
}

impl ParsingError {
    pub fn new(kind: ParsingErrorKind) -> Self {
        Self {
            kind,
            stack: VecDeque::new(),
        }
    }

    pub fn with_frame(kind: ParsingErrorKind, frame: StackFrame) -> Self {
        let mut error = Self::new(kind);
        error.push_frame(frame);
        error
    }

    pub fn adapter_not_found(tag: impl Into<String>, frame: StackFrame) -> Self {
        Self::with_frame(ParsingErrorKind::AdapterNotFound { tag: tag.into() }, frame)
    }

    pub fn malformed(message: impl Into<String>, frame: StackFrame) -> Self {
        Self::with_frame(
            ParsingErrorKind::Malformed {
                message: message.into(),
            },
            frame,
        )
    }

    /// Appends an outer frame; the innermost frame stays first.
    pub fn push_frame(&mut self, frame: StackFrame) {
        self.stack.push_back(frame);
    }

    pub fn kind(&self) -> &ParsingErrorKind {
        &self.kind
    }

    pub fn stack(&self) -> impl Iterator<Item = &StackFrame> {
        self.stack.iter()
    }
}

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        write_stack(f, &self.stack)
    }
}

impl std::error::Error for ParsingError {}

/* ===================== Execution ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionErrorKind {
    /// The named entry point does not exist. Callers may retry with a
    /// different name; every other kind is fatal to the call.
    #[error("entry point not found: {name}")]
    EntryPointNotFound { name: String },

    #[error("document has no enterable context")]
    NotEnterable,

    #[error("{message}")]
    Adapter { message: String },

    #[error("write failed: {message}")]
    Io { message: String },
}

/// A failure during `execute` or `enter`, normalized into the stack-frame
/// model regardless of what the adapter reported.
#[derive(Debug, Clone)]
pub struct ExecutionError {
    kind: ExecutionErrorKind,
    stack: VecDeque<StackFrame>,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind) -> Self {
        Self {
            kind,
            stack: VecDeque::new(),
        }
    }

    pub fn with_frame(kind: ExecutionErrorKind, frame: StackFrame) -> Self {
        let mut error = Self::new(kind);
        error.push_frame(frame);
        error
    }

    pub fn adapter(message: impl Into<String>, frame: StackFrame) -> Self {
        Self::with_frame(
            ExecutionErrorKind::Adapter {
                message: message.into(),
            },
            frame,
        )
    }

    pub fn entry_point_not_found(name: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::EntryPointNotFound { name: name.into() })
    }

    pub fn not_enterable(document_name: impl Into<String>) -> Self {
        Self::with_frame(
            ExecutionErrorKind::NotEnterable,
            StackFrame::new(document_name),
        )
    }

    /// Appends an outer frame; the innermost frame stays first.
    pub fn push_frame(&mut self, frame: StackFrame) {
        self.stack.push_back(frame);
    }

    pub fn kind(&self) -> &ExecutionErrorKind {
        &self.kind
    }

    pub fn is_entry_point_not_found(&self) -> bool {
        matches!(self.kind, ExecutionErrorKind::EntryPointNotFound { .. })
    }

    pub fn stack(&self) -> impl Iterator<Item = &StackFrame> {
        self.stack.iter()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        write_stack(f, &self.stack)
    }
}

impl std::error::Error for ExecutionError {}

/* ===================== Documents ===================== */

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document not found: {name}")]
    NotFound { name: String },

    #[error("could not read document {name}: {message}")]
    Read { name: String, message: String },

    #[error("no document source configured")]
    NoSource,
}

/* ===================== Top level ===================== */

/// Any engine failure; what the caching and service layers return.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parsing(#[from] ParsingError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Normalization used by adapters when an include or nested execution fails:
/// whatever happened inside becomes an execution error, keeping any frames
/// the inner error had already accumulated.
impl From<Error> for ExecutionError {
    fn from(error: Error) -> Self {
        match error {
            Error::Execution(e) => e,
            Error::Parsing(e) => {
                let mut out = ExecutionError::new(ExecutionErrorKind::Adapter {
                    message: e.kind().to_string(),
                });
                for frame in e.stack() {
                    out.push_frame(frame.clone());
                }
                out
            }
            Error::Document(e) => ExecutionError::new(ExecutionErrorKind::Adapter {
                message: e.to_string(),
            }),
        }
    }
}
