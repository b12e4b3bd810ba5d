//! Engine configuration
//!
//! Defaults, then an optional TOML file named by `WEFT_CONFIG_PATH`, then
//! `WEFT_*` environment overrides (`WEFT_DOCUMENTS__BASE_PATH` and the
//! like). The library never loads configuration on its own; the binary
//! loads it and wires the pieces together.

use std::sync::Arc;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::document::FileDocumentSource;
use crate::parser::ParsingContext;
use crate::registry::LanguageRegistry;

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Language assumed for scriptlets before any explicit tag.
    pub default_language_tag: String,
    /// Eagerly prepare every program at compile time.
    pub prepare: bool,
    pub documents: DocumentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsConfig {
    pub base_path: String,
    /// File stem used when a document name resolves to a directory.
    pub default_name: String,
    pub preferred_extension: String,
    /// Milliseconds between file validity checks; negative disables them.
    pub minimum_time_between_validity_checks: i64,
}

impl EngineConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("default_language_tag", "js")?
            .set_default("prepare", false)?
            .set_default("documents.base_path", ".")?
            .set_default("documents.default_name", "index")?
            .set_default("documents.preferred_extension", "js")?
            .set_default("documents.minimum_time_between_validity_checks", 1000i64)?;

        if let Ok(path) = std::env::var("WEFT_CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&path));
        }

        builder
            .add_source(Environment::with_prefix("WEFT").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn document_source(&self) -> Arc<FileDocumentSource> {
        FileDocumentSource::new(
            self.documents.base_path.clone(),
            self.documents.base_path.clone(),
            self.documents.default_name.clone(),
            self.documents.preferred_extension.clone(),
            self.documents.minimum_time_between_validity_checks,
        )
    }

    /// A parsing context with this configuration's language and prepare
    /// settings; attach a document source before compiling anything that
    /// uses in-flow scriptlets.
    pub fn parsing_context(&self, registry: Arc<LanguageRegistry>) -> ParsingContext {
        ParsingContext::new(registry, self.default_language_tag.clone())
            .with_prepare(self.prepare)
    }
}
