//! Deterministic bag-of-words embedder.
//!
//! Each lowercase alphanumeric token is hashed into one of `dimension`
//! buckets and counted; the count vector is then scaled to unit length.
//! Texts sharing more words end up closer under euclidean distance. No model
//! download or network access is involved, so the same input yields the same
//! vector on every machine.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::Embedding;
use crate::error::Result;
use crate::provider::{Embedder, ensure_non_empty};
use crate::similarity::normalize;

/// Default bucket count.
pub const DEFAULT_HASHING_DIMENSION: usize = 512;

/// Feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model: String,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of `dimension` buckets.
    /// Zero is treated as one.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model: format!("hashing-{dimension}"),
        }
    }

    /// Output dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        // Reducing a u64 modulo a usize dimension always fits in usize.
        (u64::from_le_bytes(prefix) % self.dimension as u64) as usize
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

/// Split text into lowercase alphanumeric tokens.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        ensure_non_empty(texts)?;
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
