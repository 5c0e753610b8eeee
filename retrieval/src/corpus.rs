//! Loading the line-oriented knowledge corpus.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{Result, RetrievalError};
use crate::fingerprint::Fingerprint;

/// An ordered sequence of documents read from one source file.
///
/// A document's identity is its position: two identical lines are two
/// documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    source: PathBuf,
    documents: Vec<String>,
}

impl Corpus {
    /// Read `path` as UTF-8 and keep every non-blank line, trimmed, in order.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::load_fingerprinted(path).await?.0)
    }

    /// Like [`Corpus::load`], also returning the fingerprint of the exact
    /// bytes the documents were parsed from.
    pub async fn load_fingerprinted(path: impl AsRef<Path>) -> Result<(Self, Fingerprint)> {
        let path = path.as_ref();
        let bytes = fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => RetrievalError::SourceNotFound(path.to_path_buf()),
            _ => RetrievalError::Io(e),
        })?;

        let fingerprint = Fingerprint::of_bytes(&bytes);
        let content = String::from_utf8(bytes)
            .map_err(|e| RetrievalError::Io(io::Error::new(ErrorKind::InvalidData, e)))?;

        let documents = parse_documents(&content);
        debug!(
            "Loaded {} documents from {}",
            documents.len(),
            path.display()
        );

        let corpus = Self {
            source: path.to_path_buf(),
            documents,
        };
        Ok((corpus, fingerprint))
    }

    /// Path the corpus was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Documents in corpus order.
    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if no line survived trimming.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Take ownership of the documents.
    pub fn into_documents(self) -> Vec<String> {
        self.documents
    }
}

/// Split text into trimmed, non-empty lines.
///
/// `\n`, `\r\n` and a lone `\r` all end a line.
pub fn parse_documents(content: &str) -> Vec<String> {
    content
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToString::to_string)
        .collect()
}
