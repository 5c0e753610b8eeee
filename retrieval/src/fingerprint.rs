//! Content fingerprints for staleness detection.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::{Result, RetrievalError};

/// SHA-256 digest of a corpus file's raw bytes.
///
/// Any byte change produces a different fingerprint, including edits that
/// only touch whitespace the corpus loader trims away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint an in-memory byte slice.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Fingerprint the full contents of the file at `path`.
    pub async fn compute(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => RetrievalError::SourceNotFound(path.to_path_buf()),
            _ => RetrievalError::Io(e),
        })?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, as written to disk.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| RetrievalError::CorruptSnapshot(format!("invalid fingerprint: {e}")))?;
        let digest: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            RetrievalError::CorruptSnapshot(format!(
                "fingerprint has {} bytes, expected 32",
                bytes.len()
            ))
        })?;
        Ok(Self(digest))
    }
}
