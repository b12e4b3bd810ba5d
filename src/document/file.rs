//! File-backed document source
//!
//! Maps document names to files under a base directory and caches a
//! descriptor per document. Two maps are kept, one keyed by name and one by
//! resolved file path, so that different names resolving to the same file
//! share one descriptor. Insertion goes through the map's atomic entry API:
//! concurrent loaders may both read the file, but exactly one descriptor
//! wins and every caller gets that one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::document::{modified_millis, DocumentDescriptor, DocumentSource};
use crate::error::DocumentError;
use crate::executable::Executable;

pub struct FileDocumentSource {
    identifier: String,
    base_path: PathBuf,
    /// File stem looked up when a document name resolves to a directory.
    default_name: String,
    /// Extension preferred when several files share the wanted stem.
    preferred_extension: String,
    minimum_time_between_validity_checks: i64,
    by_name: DashMap<String, Arc<DocumentDescriptor>>,
    by_file: DashMap<PathBuf, Arc<DocumentDescriptor>>,
    self_ref: Weak<FileDocumentSource>,
}

impl FileDocumentSource {
    pub fn new(
        identifier: impl Into<String>,
        base_path: impl Into<PathBuf>,
        default_name: impl Into<String>,
        preferred_extension: impl Into<String>,
        minimum_time_between_validity_checks: i64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            identifier: identifier.into(),
            base_path: base_path.into(),
            default_name: default_name.into(),
            preferred_extension: preferred_extension.into(),
            minimum_time_between_validity_checks,
            by_name: DashMap::new(),
            by_file: DashMap::new(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn as_weak_source(&self) -> Weak<dyn DocumentSource> {
        self.self_ref.clone()
    }

    /* ===================== Name resolution ===================== */

    /// Resolves a document name to a file: the exact path if it is a file, a
    /// `default_name` file inside it if it is a directory, otherwise any file
    /// in the parent directory sharing the stem (preferring the preferred
    /// extension). Directory listings are scanned sorted, so resolution is
    /// deterministic.
    fn file_for_document_name(&self, name: &str) -> PathBuf {
        let path = self.base_path.join(name);
        if path.is_dir() {
            if let Some(found) = find_in_directory(&path, &self.default_name, &self.preferred_extension)
            {
                return found;
            }
            return path.join(&self.default_name);
        }
        if path.is_file() {
            return path;
        }
        if let (Some(parent), Some(stem)) = (
            path.parent(),
            path.file_name().and_then(|n| n.to_str()),
        ) {
            if let Some(found) = find_in_directory(parent, stem, &self.preferred_extension) {
                return found;
            }
        }
        path
    }

    fn load(&self, name: &str, file: &Path) -> Result<Arc<DocumentDescriptor>, DocumentError> {
        let metadata = std::fs::metadata(file).map_err(|error| read_error(name, error))?;
        let source_code =
            std::fs::read_to_string(file).map_err(|error| read_error(name, error))?;
        let tag = file
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        debug!(document = name, file = %file.display(), "loaded document");
        Ok(Arc::new(DocumentDescriptor::from_file(
            name,
            source_code,
            tag,
            modified_millis(&metadata),
            file.to_path_buf(),
            self.as_weak_source(),
        )))
    }

    fn evict(&self, name: &str, descriptor: &Arc<DocumentDescriptor>) {
        self.by_name
            .remove_if(name, |_, cached| Arc::ptr_eq(cached, descriptor));
        if let Some(file) = descriptor.file() {
            self.by_file
                .remove_if(file, |_, cached| Arc::ptr_eq(cached, descriptor));
        }
        debug!(document = name, "evicted invalid descriptor");
    }

    fn insert_if_absent(
        &self,
        name: &str,
        file: PathBuf,
        descriptor: Arc<DocumentDescriptor>,
    ) -> Arc<DocumentDescriptor> {
        let winner = match self.by_file.entry(file) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                entry.insert(descriptor.clone());
                descriptor
            }
        };
        self.by_name.insert(name.to_string(), winner.clone());
        winner
    }

    fn collect(
        &self,
        directory: &Path,
        descriptors: &mut Vec<Arc<DocumentDescriptor>>,
    ) -> Result<(), DocumentError> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(directory)
            .map_err(|error| read_error(&directory.display().to_string(), error))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        for path in entries {
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden {
                continue;
            }
            if path.is_dir() {
                self.collect(&path, descriptors)?;
            } else if path.is_file() {
                if let Some(descriptor) = self.by_file.get(&path).map(|e| e.value().clone()) {
                    descriptors.push(descriptor);
                    continue;
                }
                let name = path
                    .strip_prefix(&self.base_path)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let descriptor = self.load(&name, &path)?;
                descriptors.push(self.insert_if_absent(&name, path, descriptor));
            }
        }
        Ok(())
    }
}

impl DocumentSource for FileDocumentSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn get_document(&self, name: &str) -> Result<Arc<DocumentDescriptor>, DocumentError> {
        let file = self.file_for_document_name(name);

        // Guards from the maps are cloned out and dropped before any
        // eviction touches the same shard.
        let in_memory = self
            .by_name
            .get(name)
            .map(|e| e.value().clone())
            .filter(|d| d.file().is_none());
        if let Some(descriptor) = in_memory {
            // In-memory registrations shadow files of the same name.
            if descriptor.is_valid() {
                return Ok(descriptor);
            }
            self.evict(name, &descriptor);
        }

        let cached = self.by_file.get(&file).map(|e| e.value().clone());
        if let Some(descriptor) = cached {
            if descriptor.is_valid() {
                return Ok(descriptor);
            }
            self.evict(name, &descriptor);
        }

        let descriptor = self.load(name, &file)?;
        Ok(self.insert_if_absent(name, file, descriptor))
    }

    fn set_document(
        &self,
        name: &str,
        source_code: &str,
        tag: &str,
        executable: Option<Arc<Executable>>,
    ) -> Result<Arc<DocumentDescriptor>, DocumentError> {
        let descriptor = Arc::new(DocumentDescriptor::in_memory(
            name,
            source_code,
            tag,
            executable,
            self.as_weak_source(),
        ));
        self.by_name.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    fn set_document_if_absent(
        &self,
        name: &str,
        source_code: &str,
        tag: &str,
        executable: Option<Arc<Executable>>,
    ) -> Result<Arc<DocumentDescriptor>, DocumentError> {
        match self.by_name.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let descriptor = Arc::new(DocumentDescriptor::in_memory(
                    name,
                    source_code,
                    tag,
                    executable,
                    self.as_weak_source(),
                ));
                entry.insert(descriptor.clone());
                Ok(descriptor)
            }
        }
    }

    fn get_documents(&self) -> Result<Vec<Arc<DocumentDescriptor>>, DocumentError> {
        let mut descriptors = Vec::new();
        self.collect(&self.base_path.clone(), &mut descriptors)?;
        Ok(descriptors)
    }

    fn cached_document(&self, name: &str) -> Option<Arc<DocumentDescriptor>> {
        self.by_name.get(name).map(|e| e.value().clone())
    }

    fn minimum_time_between_validity_checks(&self) -> i64 {
        self.minimum_time_between_validity_checks
    }
}

fn find_in_directory(directory: &Path, stem: &str, preferred_extension: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(directory)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    let preferred = format!("{}.{}", stem, preferred_extension);
    let mut fallback = None;
    for entry in entries {
        let Some(file_name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name == preferred {
            return Some(entry);
        }
        if fallback.is_none()
            && (file_name == stem
                || file_name
                    .strip_prefix(stem)
                    .is_some_and(|rest| rest.starts_with('.')))
        {
            fallback = Some(entry);
        }
    }
    fallback
}

fn read_error(name: &str, error: std::io::Error) -> DocumentError {
    if error.kind() == std::io::ErrorKind::NotFound {
        DocumentError::NotFound { name: name.into() }
    } else {
        DocumentError::Read {
            name: name.into(),
            message: error.to_string(),
        }
    }
}
