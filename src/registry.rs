//! Adapter registry
//!
//! An explicit, caller-constructed map from language tags and filename
//! extensions to adapters. Built once at process start by registering the
//! known adapters; there is no runtime discovery. Each registered adapter
//! owns the exclusion lock used when it is not thread-safe.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::adapter::LanguageAdapter;

/// An adapter plus its process-wide exclusion lock.
///
/// The lock is reentrant: a scriptlet in a non-thread-safe language can
/// include another document that runs the same language on the same thread.
#[derive(Clone)]
pub struct RegisteredAdapter {
    adapter: Arc<dyn LanguageAdapter>,
    lock: Arc<ReentrantMutex<()>>,
}

impl RegisteredAdapter {
    fn new(adapter: Arc<dyn LanguageAdapter>) -> Self {
        Self {
            adapter,
            lock: Arc::new(ReentrantMutex::new(())),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn LanguageAdapter> {
        &self.adapter
    }

    /// Acquires the exclusion lock if the adapter is not thread-safe.
    /// Thread-safe adapters skip locking entirely.
    pub(crate) fn acquire(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        if self.adapter.is_thread_safe() {
            None
        } else {
            Some(self.lock.lock())
        }
    }
}

impl std::fmt::Debug for RegisteredAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAdapter")
            .field("name", &self.adapter.name())
            .field("thread_safe", &self.adapter.is_thread_safe())
            .finish()
    }
}

/// Registry of all adapters known to the engine.
#[derive(Default)]
pub struct LanguageRegistry {
    adapters: Vec<RegisteredAdapter>,
    by_tag: HashMap<String, RegisteredAdapter>,
    by_extension: HashMap<String, RegisteredAdapter>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter under all of its tags and extensions. Later
    /// registrations win on conflicting tags.
    pub fn register(&mut self, adapter: Arc<dyn LanguageAdapter>) {
        let entry = RegisteredAdapter::new(adapter);
        for tag in entry.adapter.tags() {
            self.by_tag.insert(tag, entry.clone());
        }
        for extension in entry.adapter.extensions() {
            self.by_extension.insert(extension, entry.clone());
        }
        self.adapters.push(entry);
    }

    pub fn adapter_by_tag(&self, tag: &str) -> Option<RegisteredAdapter> {
        self.by_tag.get(tag).cloned()
    }

    pub fn adapter_by_extension(&self, extension: &str) -> Option<RegisteredAdapter> {
        self.by_extension.get(extension).cloned()
    }

    pub fn adapters(&self) -> &[RegisteredAdapter] {
        &self.adapters
    }

    /// Resolves the language tag for a document name by its filename
    /// extension, with an optional fallback extension (typically the
    /// descriptor tag) and a fallback tag. Returns the chosen adapter's
    /// default tag, or `None` when nothing matches.
    pub fn language_tag_by_extension(
        &self,
        document_name: &str,
        default_extension: Option<&str>,
        default_tag: &str,
    ) -> Option<String> {
        let file_name = document_name
            .rsplit('/')
            .next()
            .unwrap_or(document_name);
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, extension)| extension)
            .or_else(|| default_extension.filter(|e| !e.is_empty()));

        let entry = extension
            .and_then(|e| self.by_extension.get(e))
            .or_else(|| self.by_tag.get(default_tag))?;
        Some(entry.adapter.default_tag())
    }
}

impl std::fmt::Debug for LanguageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageRegistry")
            .field("adapters", &self.adapters)
            .finish()
    }
}
