//! Document sources and descriptors
//!
//! A [`DocumentSource`] turns document names into [`DocumentDescriptor`]s:
//! immutable snapshots of a document's text plus the mutable cache cell for
//! its compiled executable. Descriptors also carry the validity state that
//! drives recompilation: a descriptor can be invalidated explicitly, by a
//! newer file timestamp, or by any of its dependencies becoming invalid.

pub mod file;
pub mod memory;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::DocumentError;
use crate::executable::Executable;

pub use file::FileDocumentSource;
pub use memory::MemoryDocumentSource;

/// A provider of documents by name.
pub trait DocumentSource: Send + Sync {
    /// Stable identifier for this source, used as the partition of
    /// executables compiled from it.
    fn identifier(&self) -> &str;

    /// Returns a valid descriptor for the name, loading (or reloading) the
    /// underlying document if the cached descriptor is missing or invalid.
    fn get_document(&self, name: &str) -> Result<Arc<DocumentDescriptor>, DocumentError>;

    /// Registers an in-memory document under the name, replacing any cached
    /// descriptor. In-memory documents are always valid.
    fn set_document(
        &self,
        name: &str,
        source_code: &str,
        tag: &str,
        executable: Option<Arc<Executable>>,
    ) -> Result<Arc<DocumentDescriptor>, DocumentError>;

    /// Like [`set_document`](DocumentSource::set_document), but keeps and
    /// returns an already-cached descriptor if one exists.
    fn set_document_if_absent(
        &self,
        name: &str,
        source_code: &str,
        tag: &str,
        executable: Option<Arc<Executable>>,
    ) -> Result<Arc<DocumentDescriptor>, DocumentError>;

    /// All descriptors this source can currently provide.
    fn get_documents(&self) -> Result<Vec<Arc<DocumentDescriptor>>, DocumentError>;

    /// The cached descriptor for the name, without validation or loading.
    fn cached_document(&self, name: &str) -> Option<Arc<DocumentDescriptor>>;

    /// Minimum milliseconds between file-timestamp validity checks.
    /// Negative disables checking entirely (descriptors stay valid).
    fn minimum_time_between_validity_checks(&self) -> i64 {
        -1
    }
}

/* ===================== Descriptor ===================== */

const VALIDITY_UNKNOWN: u8 = 0;
const VALIDITY_VALID: u8 = 1;
const VALIDITY_INVALID: u8 = 2;

/// An immutable snapshot of one document plus the cache cell for its
/// compiled executable.
pub struct DocumentDescriptor {
    document_name: String,
    source_code: String,
    tag: String,
    timestamp: i64,
    file: Option<PathBuf>,
    validity: AtomicU8,
    last_validity_check: AtomicI64,
    dependencies: RwLock<HashSet<String>>,
    executable: RwLock<Option<Arc<Executable>>>,
    source: Weak<dyn DocumentSource>,
}

impl DocumentDescriptor {
    pub(crate) fn in_memory(
        document_name: impl Into<String>,
        source_code: impl Into<String>,
        tag: impl Into<String>,
        executable: Option<Arc<Executable>>,
        source: Weak<dyn DocumentSource>,
    ) -> Self {
        Self {
            document_name: document_name.into(),
            source_code: source_code.into(),
            tag: tag.into(),
            timestamp: Utc::now().timestamp_millis(),
            file: None,
            validity: AtomicU8::new(VALIDITY_UNKNOWN),
            last_validity_check: AtomicI64::new(0),
            dependencies: RwLock::new(HashSet::new()),
            executable: RwLock::new(executable),
            source,
        }
    }

    pub(crate) fn from_file(
        document_name: impl Into<String>,
        source_code: impl Into<String>,
        tag: impl Into<String>,
        timestamp: i64,
        file: PathBuf,
        source: Weak<dyn DocumentSource>,
    ) -> Self {
        Self {
            document_name: document_name.into(),
            source_code: source_code.into(),
            tag: tag.into(),
            timestamp,
            file: Some(file),
            validity: AtomicU8::new(VALIDITY_UNKNOWN),
            last_validity_check: AtomicI64::new(0),
            dependencies: RwLock::new(HashSet::new()),
            executable: RwLock::new(None),
            source,
        }
    }

    pub fn document_name(&self) -> &str {
        &self.document_name
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    /// For file-backed documents, the filename extension; for in-memory
    /// documents, whatever tag they were registered with.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Milliseconds since the epoch at which the document content was
    /// current (file modification time, or registration time).
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn executable(&self) -> Option<Arc<Executable>> {
        self.executable.read().clone()
    }

    /// Installs the executable unless one is already cached; returns the
    /// cached one either way, so racing compilers converge on one winner.
    pub fn set_executable_if_absent(&self, executable: Arc<Executable>) -> Arc<Executable> {
        let mut slot = self.executable.write();
        match &*slot {
            Some(existing) => existing.clone(),
            None => {
                *slot = Some(executable.clone());
                executable
            }
        }
    }

    /// Names of documents this document depends on; this descriptor becomes
    /// invalid when any of them does.
    pub fn dependencies(&self) -> Vec<String> {
        self.dependencies.read().iter().cloned().collect()
    }

    pub fn add_dependency(&self, name: impl Into<String>) {
        self.dependencies.write().insert(name.into());
    }

    pub fn invalidate(&self) {
        self.validity.store(VALIDITY_INVALID, Ordering::SeqCst);
    }

    /// Whether the cached content still reflects the underlying document.
    ///
    /// Invalidity is sticky. Validity is latched for in-memory documents;
    /// file-backed documents re-check the file timestamp, throttled by the
    /// source's minimum interval (a fresh check at most once per interval,
    /// a negative interval never checks).
    pub fn is_valid(&self) -> bool {
        if self.validity.load(Ordering::SeqCst) == VALIDITY_INVALID {
            return false;
        }

        if let Some(source) = self.source.upgrade() {
            for dependency in self.dependencies.read().iter() {
                if let Some(descriptor) = source.cached_document(dependency) {
                    if !descriptor.is_valid() {
                        debug!(
                            document = %self.document_name,
                            dependency = %dependency,
                            "invalidated by dependency"
                        );
                        self.invalidate();
                        return false;
                    }
                }
            }
        }

        if self.validity.load(Ordering::SeqCst) == VALIDITY_VALID {
            return true;
        }

        let Some(file) = &self.file else {
            self.validity.store(VALIDITY_VALID, Ordering::SeqCst);
            return true;
        };

        let minimum = self
            .source
            .upgrade()
            .map(|source| source.minimum_time_between_validity_checks())
            .unwrap_or(-1);
        if minimum < 0 {
            return true;
        }

        let now = Utc::now().timestamp_millis();
        let last = self.last_validity_check.load(Ordering::SeqCst);
        if now - last <= minimum {
            return true;
        }
        self.last_validity_check.store(now, Ordering::SeqCst);

        match std::fs::metadata(file).and_then(|m| m.modified()) {
            Ok(modified) => {
                let modified_millis = chrono::DateTime::<Utc>::from(modified).timestamp_millis();
                if modified_millis > self.timestamp {
                    debug!(document = %self.document_name, "file changed, invalidated");
                    self.invalidate();
                    false
                } else {
                    true
                }
            }
            Err(_) => {
                debug!(document = %self.document_name, "file unreadable, invalidated");
                self.invalidate();
                false
            }
        }
    }
}

impl std::fmt::Debug for DocumentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentDescriptor")
            .field("document_name", &self.document_name)
            .field("tag", &self.tag)
            .field("timestamp", &self.timestamp)
            .field("file", &self.file)
            .field("has_executable", &self.executable.read().is_some())
            .finish()
    }
}

/// Millisecond timestamp of a filesystem modification time.
pub(crate) fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .map(|m| chrono::DateTime::<Utc>::from(m).timestamp_millis())
        .unwrap_or_else(|_| Utc::now().timestamp_millis())
}
