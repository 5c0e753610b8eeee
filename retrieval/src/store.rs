//! Persistent storage for the retrieval index.
//!
//! A snapshot is three files in one directory:
//!
//! - `vectors.json`: header plus the raw vector rows
//! - `documents.json`: document strings in corpus order
//! - `fingerprint`: hex digest of the corpus the snapshot was built from
//!
//! Writes go to uniquely named temporary siblings first. Only once all three
//! are on disk is the old fingerprint removed and the data files renamed into
//! place. The new fingerprint is renamed last, after the directory has been
//! synced. A reader that finds a
//! fingerprint therefore always finds the vectors and documents it belongs to.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use agromitra_embeddings::{Embedding, FlatIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, RetrievalError};
use crate::fingerprint::Fingerprint;

/// File holding the vector matrix.
pub const VECTORS_FILE: &str = "vectors.json";

/// File holding the document strings.
pub const DOCUMENTS_FILE: &str = "documents.json";

/// File holding the corpus fingerprint.
pub const FINGERPRINT_FILE: &str = "fingerprint";

const TEMP_MARKER: &str = ".tmp-";

/// On-disk layout of `vectors.json`.
#[derive(Debug, Serialize, Deserialize)]
struct VectorsFile {
    version: u32,
    dimension: usize,
    count: usize,
    built_at: DateTime<Utc>,
    model: String,
    vectors: Vec<Embedding>,
}

impl VectorsFile {
    const CURRENT_VERSION: u32 = 1;
}

/// Everything a built index consists of.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The vector index, position-aligned with `documents`.
    pub index: FlatIndex,

    /// Documents in corpus order.
    pub documents: Vec<String>,

    /// Fingerprint of the corpus the index was built from.
    pub fingerprint: Fingerprint,

    /// Model identifier of the embedder that produced the vectors.
    pub model: String,

    /// When the index was built.
    pub built_at: DateTime<Utc>,
}

/// A staged rename: temporary file, final location.
type Rename = (PathBuf, PathBuf);

/// Temporary files written by `stage`, waiting to be renamed into place.
#[derive(Debug)]
struct StagedSnapshot {
    /// Vectors then documents.
    data: Vec<Rename>,

    /// Renamed only once the data files are durable.
    fingerprint: Rename,
}

/// Reads and writes [`Snapshot`]s in a directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    /// Directory holding the snapshot files.
    dir: PathBuf,
}

impl IndexStore {
    /// Create a store rooted at `dir`. Nothing is touched until `save`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Persist `snapshot`, replacing any previous one.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let staged = self.stage(snapshot).await?;
        self.finalize(&staged).await?;

        info!(
            "Saved index snapshot with {} documents to {}",
            snapshot.documents.len(),
            self.dir.display()
        );
        Ok(())
    }

    /// Write all three artifacts to temporary files.
    async fn stage(&self, snapshot: &Snapshot) -> Result<StagedSnapshot> {
        if snapshot.index.len() != snapshot.documents.len() {
            return Err(RetrievalError::InvalidArgument(format!(
                "snapshot has {} vectors but {} documents",
                snapshot.index.len(),
                snapshot.documents.len()
            )));
        }
        let dimension = snapshot.index.dimension().ok_or(RetrievalError::EmptyIndex)?;

        fs::create_dir_all(&self.dir).await?;
        self.remove_stale_temps().await;

        let vectors = VectorsFile {
            version: VectorsFile::CURRENT_VERSION,
            dimension,
            count: snapshot.index.len(),
            built_at: snapshot.built_at,
            model: snapshot.model.clone(),
            vectors: snapshot.index.vectors().map(<[f32]>::to_vec).collect(),
        };

        let payloads = [
            (VECTORS_FILE, serde_json::to_vec(&vectors)?),
            (DOCUMENTS_FILE, serde_json::to_vec(&snapshot.documents)?),
            (FINGERPRINT_FILE, snapshot.fingerprint.to_hex().into_bytes()),
        ];

        let tag = uuid::Uuid::new_v4().simple().to_string();
        let mut staged: Vec<Rename> = Vec::with_capacity(payloads.len());
        for (name, bytes) in payloads {
            let temp = self.artifact(&format!("{name}{TEMP_MARKER}{tag}"));
            if let Err(e) = write_synced(&temp, &bytes).await {
                for (written, _) in &staged {
                    let _ = fs::remove_file(written).await;
                }
                let _ = fs::remove_file(&temp).await;
                return Err(e.into());
            }
            staged.push((temp, self.artifact(name)));
        }

        debug!("Staged snapshot files with tag {tag}");
        let fingerprint = staged
            .pop()
            .ok_or_else(|| RetrievalError::InvalidArgument("nothing staged".to_string()))?;
        Ok(StagedSnapshot {
            data: staged,
            fingerprint,
        })
    }

    /// Commit a staged snapshot: data files first, fingerprint last.
    async fn finalize(&self, staged: &StagedSnapshot) -> Result<()> {
        self.install_data(&staged.data).await?;

        let (from, to) = &staged.fingerprint;
        fs::rename(from, to).await?;
        self.sync_dir().await;
        Ok(())
    }

    /// Invalidate the current snapshot, move the data files into place, and
    /// make those renames durable.
    async fn install_data(&self, data: &[Rename]) -> Result<()> {
        match fs::remove_file(self.artifact(FINGERPRINT_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        for (from, to) in data {
            fs::rename(from, to).await?;
        }

        self.sync_dir().await;
        Ok(())
    }

    /// Flush directory entries where the platform allows opening a directory.
    async fn sync_dir(&self) {
        match fs::File::open(&self.dir).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!("Directory sync of {} failed: {e}", self.dir.display());
                }
            }
            Err(e) => debug!("Cannot open {} for sync: {e}", self.dir.display()),
        }
    }

    /// Remove temporary files left behind by an interrupted save.
    ///
    /// Only this store's own staging names are touched; other files in the
    /// directory are left alone.
    async fn remove_stale_temps(&self) {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if is_staging_name(&entry.file_name().to_string_lossy()) {
                debug!("Removing stale temp file {}", entry.path().display());
                let _ = fs::remove_file(entry.path()).await;
            }
        }
    }

    /// Load the stored snapshot.
    ///
    /// Returns `Ok(None)` when none of the artifacts exist and
    /// [`RetrievalError::CorruptSnapshot`] when only some exist or any of
    /// them cannot be read.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let names = [VECTORS_FILE, DOCUMENTS_FILE, FINGERPRINT_FILE];
        let mut missing = Vec::new();
        for name in names {
            if !fs::try_exists(self.artifact(name)).await.unwrap_or(false) {
                missing.push(name);
            }
        }

        if missing.len() == names.len() {
            debug!("No index snapshot in {}", self.dir.display());
            return Ok(None);
        }
        if !missing.is_empty() {
            warn!(
                "Index snapshot in {} is incomplete, missing {missing:?}",
                self.dir.display()
            );
            return Err(RetrievalError::CorruptSnapshot(format!(
                "missing {}",
                missing.join(", ")
            )));
        }

        let fingerprint: Fingerprint = self.read_artifact(FINGERPRINT_FILE).await?.parse()?;
        let documents: Vec<String> = self.parse_artifact(DOCUMENTS_FILE).await?;
        let vectors: VectorsFile = self.parse_artifact(VECTORS_FILE).await?;

        if vectors.version != VectorsFile::CURRENT_VERSION {
            return Err(RetrievalError::CorruptSnapshot(format!(
                "unsupported snapshot version {}",
                vectors.version
            )));
        }
        if vectors.count != vectors.vectors.len() || vectors.count != documents.len() {
            return Err(RetrievalError::CorruptSnapshot(format!(
                "header says {} vectors, found {} vectors and {} documents",
                vectors.count,
                vectors.vectors.len(),
                documents.len()
            )));
        }
        if let Some(bad) = vectors.vectors.iter().find(|v| v.len() != vectors.dimension) {
            return Err(RetrievalError::CorruptSnapshot(format!(
                "vector of length {} in an index of dimension {}",
                bad.len(),
                vectors.dimension
            )));
        }

        let index = FlatIndex::from_vectors(vectors.vectors)
            .map_err(|e| RetrievalError::CorruptSnapshot(e.to_string()))?;

        info!(
            "Loaded index snapshot with {} documents from {}",
            documents.len(),
            self.dir.display()
        );

        Ok(Some(Snapshot {
            index,
            documents,
            fingerprint,
            model: vectors.model,
            built_at: vectors.built_at,
        }))
    }

    async fn read_artifact(&self, name: &str) -> Result<String> {
        fs::read_to_string(self.artifact(name))
            .await
            .map_err(|e| RetrievalError::CorruptSnapshot(format!("cannot read {name}: {e}")))
    }

    async fn parse_artifact<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let content = self.read_artifact(name).await?;
        serde_json::from_str(&content)
            .map_err(|e| RetrievalError::CorruptSnapshot(format!("cannot parse {name}: {e}")))
    }
}

/// Whether `name` is a staging file for one of the snapshot artifacts.
fn is_staging_name(name: &str) -> bool {
    [VECTORS_FILE, DOCUMENTS_FILE, FINGERPRINT_FILE]
        .iter()
        .any(|artifact| {
            name.strip_prefix(artifact)
                .and_then(|rest| rest.strip_prefix(TEMP_MARKER))
                .is_some_and(|tag| !tag.is_empty())
        })
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}
