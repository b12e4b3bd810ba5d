//! In-memory document source
//!
//! Holds documents registered programmatically: synthesized in-flow
//! sub-documents, tests, embedders without a filesystem. Documents never
//! become invalid on their own; replacing one via
//! [`set_document`](crate::document::DocumentSource::set_document)
//! invalidates the descriptor it displaces.

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::document::{DocumentDescriptor, DocumentSource};
use crate::error::DocumentError;
use crate::executable::Executable;

pub struct MemoryDocumentSource {
    identifier: String,
    by_name: DashMap<String, Arc<DocumentDescriptor>>,
    self_ref: Weak<MemoryDocumentSource>,
}

impl MemoryDocumentSource {
    pub fn new(identifier: impl Into<String>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            identifier: identifier.into(),
            by_name: DashMap::new(),
            self_ref: self_ref.clone(),
        })
    }

    fn as_weak_source(&self) -> Weak<dyn DocumentSource> {
        self.self_ref.clone()
    }
}

impl DocumentSource for MemoryDocumentSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn get_document(&self, name: &str) -> Result<Arc<DocumentDescriptor>, DocumentError> {
        self.by_name
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| DocumentError::NotFound { name: name.into() })
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
        if let Some(displaced) = self.by_name.insert(name.to_string(), descriptor.clone()) {
            displaced.invalidate();
        }
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
        Ok(self
            .by_name
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn cached_document(&self, name: &str) -> Option<Arc<DocumentDescriptor>> {
        self.by_name.get(name).map(|e| e.value().clone())
    }
}
