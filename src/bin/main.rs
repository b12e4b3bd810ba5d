use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use weft_core::cli::{Cli, Commands};
use weft_core::config::EngineConfig;
use weft_core::context::ExecutionContext;
use weft_core::document::{DocumentSource, FileDocumentSource};
use weft_core::registry::LanguageRegistry;
use weft_core::service::DocumentService;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::load()?;

    match cli.command {
        Commands::Render {
            name,
            base_path,
            default_language,
            prepare,
        } => {
            if let Some(base_path) = base_path {
                config.documents.base_path = base_path.display().to_string();
            }
            if let Some(tag) = default_language {
                config.default_language_tag = tag;
            }
            if prepare {
                config.prepare = true;
            }

            // Language adapters are registered by embedders; the standalone
            // binary renders documents that collapse to literal text.
            let registry = Arc::new(LanguageRegistry::new());
            let parsing_context = config.parsing_context(registry);
            let service =
                DocumentService::new(config.document_source(), parsing_context, None);

            let mut context = ExecutionContext::with_writers(
                Box::new(io::stdout()),
                Box::new(io::stderr()),
            );
            service.include(&name, &mut context)?;
        }
        Commands::List { base_path } => {
            if let Some(base_path) = base_path {
                config.documents.base_path = base_path.display().to_string();
            }
            let source: Arc<FileDocumentSource> = config.document_source();
            for descriptor in source.get_documents()? {
                println!("{}", descriptor.document_name());
            }
        }
    }

    Ok(())
}
