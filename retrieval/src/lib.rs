//! # Retrieval
//!
//! A persisted nearest-neighbor index over a line-oriented knowledge file,
//! used to add relevant passages to a chat request before it reaches a
//! generation backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Retrieval Service                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   Corpus ──► Fingerprint ──┐                                    │
//! │     │                      ▼                                    │
//! │     │               fingerprint match? ── yes ──► IndexStore::load
//! │     │                      │                                    │
//! │     │                      no                                   │
//! │     ▼                      ▼                                    │
//! │  Embedder ──► FlatIndex ──► IndexStore::save                    │
//! │                                                                 │
//! │   query(text, k) ──► Embedder ──► FlatIndex::search ──► docs    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agromitra_retrieval::RetrievalService;
//!
//! let (service, outcome) = RetrievalService::builder()
//!     .with_corpus("data/knowledge.txt")
//!     .with_index_dir("vectorstore")
//!     .open()
//!     .await?;
//!
//! let results = service.query("What color is the sky?", 3).await?;
//! ```

pub mod augment;
pub mod config;
pub mod corpus;
pub mod error;
pub mod fingerprint;
pub mod service;
pub mod store;

pub use config::{EmbedderKind, EmbeddingConfig, RetrievalConfig};
pub use corpus::Corpus;
pub use error::{Result, RetrievalError};
pub use fingerprint::Fingerprint;
pub use service::{
    IndexStatus, InitOutcome, RebuildReason, RetrievalService, RetrievalServiceBuilder,
    RetrievedDocument,
};
pub use store::{IndexStore, Snapshot};

// Re-export from dependencies for convenience
pub use agromitra_embeddings::{Embedder, EmbeddingError, FlatIndex, HashingEmbedder};
