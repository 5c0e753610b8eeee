//! CLI argument parsing using clap

use std::path::PathBuf;

use agromitra_retrieval::EmbedderKind;
use clap::{Parser, Subcommand};

/// agromitra-rag - inspect and maintain the AgroMitra retrieval index
///
/// Loads the stored index when it still matches the knowledge file and
/// rebuilds it otherwise.
#[derive(Parser, Debug)]
#[command(name = "agromitra-rag")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Knowledge file, one document per line
    #[arg(long, global = true)]
    pub corpus: Option<PathBuf>,

    /// Directory holding the index snapshot
    #[arg(long, global = true)]
    pub index_dir: Option<PathBuf>,

    /// Embedding provider
    #[arg(long, global = true, value_enum)]
    pub provider: Option<ProviderArg>,

    /// Rebuild the index at startup even if the snapshot is current
    #[arg(long, global = true)]
    pub force_rebuild: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Embedding provider selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderArg {
    /// OpenAI-compatible embeddings API
    Openai,
    /// Local Ollama server
    Ollama,
    /// Offline feature hashing
    Hashing,
}

impl From<ProviderArg> for EmbedderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Openai => EmbedderKind::OpenAI,
            ProviderArg::Ollama => EmbedderKind::Ollama,
            ProviderArg::Hashing => EmbedderKind::Hashing,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the documents nearest to a question
    Query {
        /// Question or search text
        text: String,

        /// Number of documents (defaults to the configured value)
        #[arg(short)]
        k: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the index from the knowledge file
    Rebuild,

    /// Show what the served index was built from
    Status,
}
