//! Retrieval service: staleness-checked index lifecycle and k-NN queries.

use std::path::PathBuf;
use std::sync::Arc;

use agromitra_embeddings::{Embedder, EmbeddingError, FlatIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::corpus::Corpus;
use crate::error::{Result, RetrievalError};
use crate::fingerprint::Fingerprint;
use crate::store::{IndexStore, Snapshot};

/// A document returned by a query, with its squared euclidean distance to
/// the query. Lower scores are closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// Document text.
    pub document: String,

    /// Distance to the query.
    pub score: f32,
}

/// Why `initialize` or `force_rebuild` built a fresh index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// No snapshot was stored.
    MissingSnapshot,
    /// The stored snapshot was incomplete or unreadable.
    CorruptSnapshot,
    /// The corpus changed since the snapshot was built.
    StaleFingerprint,
    /// An operator asked for it.
    Forced,
}

/// What `initialize` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The stored snapshot matched the corpus and was adopted.
    Loaded,
    /// A fresh index was built and stored.
    Rebuilt(RebuildReason),
}

/// Summary of the index currently being served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    /// Number of indexed documents.
    pub documents: usize,

    /// Vector length.
    pub dimension: usize,

    /// Hex fingerprint of the corpus the index was built from.
    pub fingerprint: String,

    /// Model the vectors were produced with.
    pub model: String,

    /// When the index was built.
    pub built_at: DateTime<Utc>,
}

/// Serves nearest-neighbor queries over the knowledge corpus.
///
/// Construct it, call [`RetrievalService::initialize`] once at startup, then
/// share it (typically behind an `Arc`) with whatever handles requests.
/// Queries run concurrently; `initialize` and `force_rebuild` are serialized
/// with each other and swap the served index only once a rebuild has been
/// fully persisted.
pub struct RetrievalService {
    /// Configuration.
    config: RetrievalConfig,

    /// Text to vector mapping.
    embedder: Arc<dyn Embedder>,

    /// Snapshot persistence.
    store: IndexStore,

    /// The index being served, `None` until initialized.
    current: RwLock<Option<Arc<Snapshot>>>,

    /// Held for the whole of a load-or-rebuild.
    writer: Mutex<()>,
}

impl RetrievalService {
    /// Create a new service builder.
    pub fn builder() -> RetrievalServiceBuilder {
        RetrievalServiceBuilder::new()
    }

    /// Create an uninitialized service.
    pub fn new(config: RetrievalConfig, embedder: Arc<dyn Embedder>) -> Self {
        let store = IndexStore::new(&config.index_dir);
        Self {
            config,
            embedder,
            store,
            current: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Get the snapshot store.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Load the stored index if it matches the corpus, otherwise rebuild it.
    ///
    /// Missing or corrupt snapshots lead to a rebuild rather than an error.
    pub async fn initialize(&self) -> Result<InitOutcome> {
        let _writer = self.writer.lock().await;

        let current = Fingerprint::compute(&self.config.corpus_path).await?;

        let reason = match self.store.load().await {
            Ok(Some(snapshot)) if snapshot.fingerprint == current => {
                if snapshot.model != self.embedder.model() {
                    warn!(
                        "Stored index was built with model {} but the embedder is {}",
                        snapshot.model,
                        self.embedder.model()
                    );
                }
                info!(
                    "Loaded existing index with {} documents",
                    snapshot.documents.len()
                );
                *self.current.write().await = Some(Arc::new(snapshot));
                return Ok(InitOutcome::Loaded);
            }
            Ok(Some(_)) => RebuildReason::StaleFingerprint,
            Ok(None) => RebuildReason::MissingSnapshot,
            Err(RetrievalError::CorruptSnapshot(detail)) => {
                warn!("Discarding corrupt index snapshot: {detail}");
                RebuildReason::CorruptSnapshot
            }
            Err(e) => return Err(e),
        };

        self.rebuild(reason).await?;
        Ok(InitOutcome::Rebuilt(reason))
    }

    /// Rebuild the index from the corpus regardless of the stored fingerprint.
    pub async fn force_rebuild(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.rebuild(RebuildReason::Forced).await
    }

    /// Embed, index, and persist the corpus, then start serving it.
    ///
    /// Callers must hold `writer`.
    async fn rebuild(&self, reason: RebuildReason) -> Result<()> {
        info!("Rebuilding index ({reason:?})");
        let corpus_path = &self.config.corpus_path;

        let (corpus, fingerprint) = Corpus::load_fingerprinted(corpus_path).await?;
        if corpus.is_empty() {
            return Err(RetrievalError::EmptyCorpus(corpus_path.clone()));
        }
        let documents = corpus.into_documents();

        let vectors = self.embedder.embed_many(&documents).await?;
        if vectors.len() != documents.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                documents.len(),
                vectors.len()
            ))
            .into());
        }

        let index = FlatIndex::from_vectors(vectors)?;
        let snapshot = Snapshot {
            index,
            documents,
            fingerprint,
            model: self.embedder.model().to_string(),
            built_at: Utc::now(),
        };

        self.store.save(&snapshot).await?;

        info!(
            "Index built with {} documents (fingerprint {})",
            snapshot.documents.len(),
            snapshot.fingerprint
        );
        *self.current.write().await = Some(Arc::new(snapshot));
        Ok(())
    }

    async fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or(RetrievalError::EmptyIndex)
    }

    /// Return up to `k` documents nearest to `text`, closest first.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        let snapshot = self.snapshot().await?;
        if k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }

        let vector = self.embedder.embed_one(text).await?;
        let hits = snapshot.index.search(&vector, k)?;
        debug!("Query matched {} documents", hits.len());

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                snapshot
                    .documents
                    .get(hit.position)
                    .map(|document| RetrievedDocument {
                        document: document.clone(),
                        score: hit.distance,
                    })
            })
            .collect())
    }

    /// [`RetrievalService::query`] with the configured default `k`.
    pub async fn query_default(&self, text: &str) -> Result<Vec<RetrievedDocument>> {
        self.query(text, self.config.default_k).await
    }

    /// Like [`RetrievalService::query`], but any failure yields no context.
    pub async fn retrieve_context(&self, text: &str, k: usize) -> Vec<RetrievedDocument> {
        match self.query(text, k).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {e}");
                Vec::new()
            }
        }
    }

    /// Describe the index being served.
    pub async fn status(&self) -> Result<IndexStatus> {
        let snapshot = self.snapshot().await?;
        Ok(IndexStatus {
            documents: snapshot.documents.len(),
            dimension: snapshot.index.dimension().unwrap_or_default(),
            fingerprint: snapshot.fingerprint.to_hex(),
            model: snapshot.model.clone(),
            built_at: snapshot.built_at,
        })
    }
}

/// Builder for [`RetrievalService`].
pub struct RetrievalServiceBuilder {
    config: RetrievalConfig,
    embedder: Option<Arc<dyn Embedder>>,
}

impl RetrievalServiceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: RetrievalConfig::default(),
            embedder: None,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the corpus file.
    pub fn with_corpus(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.corpus_path = path.into();
        self
    }

    /// Set the snapshot directory.
    pub fn with_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.index_dir = dir.into();
        self
    }

    /// Use this embedder instead of the one the configuration describes.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Build an uninitialized service.
    pub fn build(self) -> Result<RetrievalService> {
        self.config.validate()?;
        let embedder = self
            .embedder
            .unwrap_or_else(|| self.config.embedding.build_embedder());
        Ok(RetrievalService::new(self.config, embedder))
    }

    /// Build the service and initialize it.
    pub async fn open(self) -> Result<(RetrievalService, InitOutcome)> {
        let service = self.build()?;
        let outcome = service.initialize().await?;
        Ok((service, outcome))
    }
}

impl Default for RetrievalServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
