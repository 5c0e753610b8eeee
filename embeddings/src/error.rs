//! Error types for embedders and the vector index.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur while turning text into vectors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The backend did not answer within the configured timeout.
    #[error("embedding request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Input text was empty after trimming.
    #[error("cannot embed empty text at position {position}")]
    EmptyText { position: usize },

    /// Vectors returned in one call disagree on their length.
    #[error("embedder returned inconsistent dimensions: expected {expected}, got {actual}")]
    InconsistentDimension { expected: usize, actual: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors raised by [`crate::FlatIndex`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// A vector's length disagrees with the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// `search` was called before any `build`.
    #[error("index has not been built")]
    EmptyIndex,

    /// `build` was given nothing to index.
    #[error("cannot build an index from zero vectors")]
    NoVectors,

    /// `k` must be at least one.
    #[error("k must be positive, got {0}")]
    InvalidK(usize),
}
