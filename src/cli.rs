//! Command-line interface definitions for the `weft` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "weft", version, about = "Scriptlet document engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a document to standard output
    Render {
        /// Document name, relative to the documents base path
        name: String,

        /// Documents base path (overrides configuration)
        #[arg(long)]
        base_path: Option<PathBuf>,

        /// Default scriptlet language tag (overrides configuration)
        #[arg(long)]
        default_language: Option<String>,

        /// Eagerly prepare programs at compile time
        #[arg(long)]
        prepare: bool,
    },

    /// List documents available under the base path
    List {
        /// Documents base path (overrides configuration)
        #[arg(long)]
        base_path: Option<PathBuf>,
    },
}
