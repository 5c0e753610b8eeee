//! Configuration for the retrieval service.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agromitra_embeddings::provider::{DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT};
use agromitra_embeddings::{
    DEFAULT_HASHING_DIMENSION, Embedder, HashingEmbedder, OllamaEmbedder, OpenAIEmbedder,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Configuration for the retrieval service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Line-oriented knowledge file.
    pub corpus_path: PathBuf,

    /// Directory holding the persisted snapshot.
    pub index_dir: PathBuf,

    /// Number of documents returned when a caller does not choose.
    pub default_k: usize,

    /// Embedder configuration.
    pub embedding: EmbeddingConfig,
}

impl RetrievalConfig {
    /// Create a new configuration with default values.
    pub fn new(corpus_path: impl Into<PathBuf>, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            corpus_path: corpus_path.into(),
            index_dir: index_dir.into(),
            default_k: 5,
            embedding: EmbeddingConfig::default(),
        }
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the default number of results.
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    /// Read a TOML configuration file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse a TOML configuration document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RetrievalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    ///
    /// Recognized variables: `AGROMITRA_CORPUS`, `AGROMITRA_INDEX_DIR`,
    /// `EMBEDDING_PROVIDER`, `EMBEDDING_MODEL`, `OLLAMA_HOST`,
    /// `OPENAI_BASE_URL`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(corpus) = lookup("AGROMITRA_CORPUS") {
            self.corpus_path = corpus.into();
        }
        if let Some(dir) = lookup("AGROMITRA_INDEX_DIR") {
            self.index_dir = dir.into();
        }
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = Some(model);
        }
        let base_url = match self.embedding.provider {
            EmbedderKind::Ollama => lookup("OLLAMA_HOST"),
            EmbedderKind::OpenAI => lookup("OPENAI_BASE_URL"),
            EmbedderKind::Hashing => None,
        };
        if base_url.is_some() {
            self.embedding.base_url = base_url;
        }
        self.validate()
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.default_k == 0 {
            return Err(RetrievalError::Config(
                "default_k must be at least 1".to_string(),
            ));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(RetrievalError::Config(
                "embedding.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::new("data/knowledge.txt", "vectorstore")
    }
}

/// Configuration for the embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which embedder to use.
    pub provider: EmbedderKind,

    /// Model override; each provider has its own default.
    pub model: Option<String>,

    /// Endpoint override for remote providers.
    pub base_url: Option<String>,

    /// Per-request timeout for remote providers.
    pub timeout_secs: u64,

    /// Texts per remote request.
    pub batch_size: usize,

    /// Vector length for the hashing embedder.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbedderKind::Ollama,
            model: None,
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            batch_size: DEFAULT_BATCH_SIZE,
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl EmbeddingConfig {
    /// Configuration for the offline hashing embedder.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            provider: EmbedderKind::Hashing,
            dimension,
            ..Self::default()
        }
    }

    /// Construct the configured embedder.
    pub fn build_embedder(&self) -> Arc<dyn Embedder> {
        let timeout = Duration::from_secs(self.timeout_secs);
        match self.provider {
            EmbedderKind::OpenAI => {
                let mut embedder = OpenAIEmbedder::new()
                    .with_timeout(timeout)
                    .with_batch_size(self.batch_size);
                if let Some(model) = &self.model {
                    embedder = embedder.with_model(model);
                }
                if let Some(url) = &self.base_url {
                    embedder = embedder.with_base_url(url);
                }
                Arc::new(embedder)
            }
            EmbedderKind::Ollama => {
                let mut embedder = OllamaEmbedder::new()
                    .with_timeout(timeout)
                    .with_batch_size(self.batch_size);
                if let Some(model) = &self.model {
                    embedder = embedder.with_model(model);
                }
                if let Some(host) = &self.base_url {
                    embedder = embedder.with_host(host);
                }
                Arc::new(embedder)
            }
            EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(self.dimension)),
        }
    }
}

/// Type of embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    /// OpenAI-compatible embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Local Ollama server.
    Ollama,
    /// Deterministic feature hashing, no model required.
    Hashing,
}

impl std::str::FromStr for EmbedderKind {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "hashing" => Ok(Self::Hashing),
            other => Err(RetrievalError::Config(format!(
                "unknown embedding provider: {other}"
            ))),
        }
    }
}
