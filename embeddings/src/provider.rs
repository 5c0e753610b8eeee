//! Embedders.
//!
//! Remote embedders talk to an OpenAI-compatible `/embeddings` endpoint or to
//! a local Ollama server. Both send whole batches per request and restore the
//! input order before returning.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Default timeout applied to each remote embedding request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of texts sent per remote request.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Maps text to fixed-dimension vectors.
///
/// Output order matches input order and every vector returned by one instance
/// has the same length. Implementations never retry on their own.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Get the name of this embedder.
    fn name(&self) -> &str;

    /// Get the model identifier vectors are produced with.
    fn model(&self) -> &str;

    /// Embed every text, preserving order.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// Reject texts that are empty after trimming.
pub(crate) fn ensure_non_empty(texts: &[String]) -> Result<()> {
    match texts.iter().position(|t| t.trim().is_empty()) {
        Some(position) => Err(EmbeddingError::EmptyText { position }),
        None => Ok(()),
    }
}

/// Check that a backend answered with one vector per input, all of one length.
pub(crate) fn ensure_consistent(vectors: &[Embedding], expected_count: usize) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected_count} embeddings, got {}",
            vectors.len()
        )));
    }

    if let Some(first) = vectors.first() {
        let expected = first.len();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::InconsistentDimension {
                expected,
                actual: bad.len(),
            });
        }
    }

    Ok(())
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> EmbeddingError {
    if err.is_timeout() {
        EmbeddingError::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    } else {
        EmbeddingError::Http(err)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        return Err(EmbeddingError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::ApiRequest(format!(
            "{status}: {error_text}"
        )));
    }

    Ok(response)
}

/// OpenAI-compatible embedding provider.
pub struct OpenAIEmbedder {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name sent with each request.
    model: String,

    /// Per-request timeout.
    timeout: Duration,

    /// Maximum texts per request.
    batch_size: usize,
}

impl OpenAIEmbedder {
    /// Create a new provider, reading `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many texts go into one request. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_batch(&self, api_key: &str, texts: &[String]) -> Result<Vec<Embedding>> {
        let body = serde_json::json!({
            "input": texts,
            "model": self.model,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let response = check_status(response).await?;
        let mut result: OpenAIEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        // The API does not promise to answer in input order.
        result.data.sort_by_key(|item| item.index);
        if let Some((expected, item)) = result
            .data
            .iter()
            .enumerate()
            .find(|(expected, item)| item.index != *expected)
        {
            return Err(EmbeddingError::InvalidResponse(format!(
                "embedding indices must cover 0..{}, found {} at position {expected}",
                result.data.len(),
                item.index
            )));
        }

        Ok(result.data.into_iter().map(|item| item.embedding).collect())
    }
}

impl Default for OpenAIEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        ensure_non_empty(texts)?;

        let api_key = self.api_key.as_deref().ok_or_else(|| {
            EmbeddingError::ProviderNotConfigured("OPENAI_API_KEY is not set".to_string())
        })?;

        debug!(
            "Embedding {} texts with model {} in batches of {}",
            texts.len(),
            self.model,
            self.batch_size
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self.embed_batch(api_key, chunk).await?;
            ensure_consistent(&batch, chunk.len())?;
            vectors.extend(batch);
        }
        ensure_consistent(&vectors, texts.len())?;

        info!("Generated {} embeddings", vectors.len());
        Ok(vectors)
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embedder backed by a local Ollama server.
pub struct OllamaEmbedder {
    host: String,
    client: reqwest::Client,
    model: String,
    timeout: Duration,
    batch_size: usize,
}

impl OllamaEmbedder {
    /// Create a new provider, reading `OLLAMA_HOST`.
    pub fn new() -> Self {
        Self {
            host: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            client: reqwest::Client::new(),
            model: "all-minilm".to_string(),
            timeout: DEFAULT_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the server address.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many texts go into one request. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Default for OllamaEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        ensure_non_empty(texts)?;

        debug!("Embedding {} texts via Ollama at {}", texts.len(), self.host);

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": chunk,
            });

            let response = self
                .client
                .post(format!("{}/api/embed", self.host))
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(e, self.timeout))?;

            let response = check_status(response).await?;
            let result: OllamaEmbedResponse = response
                .json()
                .await
                .map_err(|e| transport_error(e, self.timeout))?;

            ensure_consistent(&result.embeddings, chunk.len())?;
            vectors.extend(result.embeddings);
        }
        ensure_consistent(&vectors, texts.len())?;

        info!("Generated {} embeddings", vectors.len());
        Ok(vectors)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}
