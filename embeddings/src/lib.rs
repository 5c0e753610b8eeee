//! # Embeddings
//!
//! This crate turns text into dense vectors and answers exact
//! nearest-neighbor queries over them.
//!
//! ## Features
//!
//! - **Embedders**: OpenAI-compatible and Ollama backends, plus a
//!   deterministic hashing embedder that needs no model
//! - **Flat Index**: brute-force k-NN by squared euclidean distance
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Embedder ──► Embedding ──► FlatIndex ──► Neighbor              │
//! │     │                          │                                │
//! │     ▼                          ▼                                │
//! │  OpenAI/Ollama/Hashing   squared_euclidean                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod hashing;
pub mod index;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, IndexError, Result};
pub use hashing::{DEFAULT_HASHING_DIMENSION, HashingEmbedder};
pub use index::{FlatIndex, Neighbor};
pub use provider::{Embedder, OllamaEmbedder, OpenAIEmbedder};
pub use similarity::squared_euclidean;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
