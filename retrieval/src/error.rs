//! Error types for the retrieval service.

use std::path::PathBuf;

use agromitra_embeddings::{EmbeddingError, IndexError};
use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval service.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The corpus file does not exist.
    #[error("corpus source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// The corpus exists but has no non-blank lines.
    #[error("corpus {} contains no documents", .0.display())]
    EmptyCorpus(PathBuf),

    /// The embedding backend failed.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Embedder output and index disagree on vector length.
    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A query arrived before any index was built or loaded.
    #[error("retrieval index is empty; initialize the service first")]
    EmptyIndex,

    /// Persisted artifacts are incomplete or unreadable.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// A caller passed an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IndexError> for RetrievalError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            IndexError::EmptyIndex | IndexError::NoVectors => Self::EmptyIndex,
            IndexError::InvalidK(k) => Self::InvalidArgument(format!("k must be positive, got {k}")),
        }
    }
}
