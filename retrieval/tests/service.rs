//! Integration tests for the retrieval service lifecycle.
//!
//! Every test runs against a temporary corpus file and snapshot directory,
//! with the deterministic hashing embedder wrapped in a call counter.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use agromitra_retrieval::store::{DOCUMENTS_FILE, FINGERPRINT_FILE, VECTORS_FILE};
use agromitra_retrieval::{
    Embedder, EmbeddingError, Fingerprint, HashingEmbedder, InitOutcome, RebuildReason,
    RetrievalConfig, RetrievalError, RetrievalService,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::Notify;

const KNOWLEDGE: &str = "The sky is blue.\nWater boils at 100C.\nParis is in France.\n";

/// Hashing embedder that counts `embed_many` calls, can be told to fail,
/// and can park corpus-sized batches until released.
struct CountingEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
    failing: AtomicBool,
    holding: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl CountingEmbedder {
    fn new(dimension: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(dimension),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            holding: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next multi-text batch wait for [`CountingEmbedder::resume`].
    fn hold_batches(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed_many(&self, texts: &[String]) -> agromitra_embeddings::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::ApiRequest("backend down".to_string()));
        }
        if texts.len() > 1 && self.holding.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.embed_many(texts).await
    }
}

struct Fixture {
    _dir: TempDir,
    corpus: PathBuf,
    index_dir: PathBuf,
}

impl Fixture {
    fn new(content: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("data").join("knowledge.txt");
        std::fs::create_dir_all(corpus.parent().unwrap()).unwrap();
        std::fs::write(&corpus, content).unwrap();
        let index_dir = dir.path().join("vectorstore");
        Self {
            _dir: dir,
            corpus,
            index_dir,
        }
    }

    fn write_corpus(&self, content: &str) {
        std::fs::write(&self.corpus, content).unwrap();
    }

    fn service(&self, embedder: Arc<CountingEmbedder>) -> RetrievalService {
        RetrievalService::builder()
            .with_config(RetrievalConfig::new(&self.corpus, &self.index_dir).with_default_k(2))
            .with_embedder(embedder)
            .build()
            .unwrap()
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.index_dir.join(name)
    }
}

fn documents(results: &[agromitra_retrieval::RetrievedDocument]) -> Vec<&str> {
    results.iter().map(|r| r.document.as_str()).collect()
}

fn assert_snapshot_complete(dir: &Path) {
    for name in [VECTORS_FILE, DOCUMENTS_FILE, FINGERPRINT_FILE] {
        assert!(dir.join(name).exists(), "{name} should exist");
    }
}

#[tokio::test]
async fn end_to_end_query_finds_sky_document() {
    let fx = Fixture::new(KNOWLEDGE);
    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());

    let outcome = service.initialize().await.unwrap();
    assert_eq!(outcome, InitOutcome::Rebuilt(RebuildReason::MissingSnapshot));
    assert_snapshot_complete(&fx.index_dir);

    let results = service.query("What color is the sky?", 1).await.unwrap();
    assert_eq!(documents(&results), vec!["The sky is blue."]);
    assert!(results[0].score >= 0.0);
}

#[tokio::test]
async fn unchanged_source_loads_without_embedding() {
    let fx = Fixture::new(KNOWLEDGE);
    fx.service(CountingEmbedder::new(512))
        .initialize()
        .await
        .unwrap();

    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());
    assert_eq!(service.initialize().await.unwrap(), InitOutcome::Loaded);
    assert_eq!(embedder.calls(), 0);

    let results = service.query_default("Where is Paris?").await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document, "Paris is in France.");
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test]
async fn changed_source_triggers_rebuild() {
    let fx = Fixture::new(KNOWLEDGE);
    fx.service(CountingEmbedder::new(512))
        .initialize()
        .await
        .unwrap();

    fx.write_corpus("Rice grows in paddies.\nWheat is a winter crop.\n");

    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());
    assert_eq!(
        service.initialize().await.unwrap(),
        InitOutcome::Rebuilt(RebuildReason::StaleFingerprint)
    );
    assert_eq!(embedder.calls(), 1);

    let status = service.status().await.unwrap();
    assert_eq!(status.documents, 2);
    assert_eq!(
        status.fingerprint,
        Fingerprint::compute(&fx.corpus).await.unwrap().to_hex()
    );

    let results = service.query("When is wheat sown?", 5).await.unwrap();
    assert_eq!(
        documents(&results),
        vec!["Wheat is a winter crop.", "Rice grows in paddies."]
    );
}

#[tokio::test]
async fn whitespace_only_edit_still_rebuilds() {
    let fx = Fixture::new(KNOWLEDGE);
    fx.service(CountingEmbedder::new(512))
        .initialize()
        .await
        .unwrap();

    fx.write_corpus(&KNOWLEDGE.replace("blue.", "blue.   "));

    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());
    assert_eq!(
        service.initialize().await.unwrap(),
        InitOutcome::Rebuilt(RebuildReason::StaleFingerprint)
    );
    assert_eq!(embedder.calls(), 1);
    assert_eq!(service.status().await.unwrap().documents, 3);
}

#[tokio::test]
async fn force_rebuild_embeds_even_when_fresh() {
    let fx = Fixture::new(KNOWLEDGE);
    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());
    service.initialize().await.unwrap();
    assert_eq!(embedder.calls(), 1);

    let reopened = fx.service(embedder.clone());
    assert_eq!(reopened.initialize().await.unwrap(), InitOutcome::Loaded);
    assert_eq!(embedder.calls(), 1);

    reopened.force_rebuild().await.unwrap();
    assert_eq!(embedder.calls(), 2);
    assert_snapshot_complete(&fx.index_dir);

    // The forced rebuild left a valid snapshot behind.
    let third = fx.service(embedder.clone());
    assert_eq!(third.initialize().await.unwrap(), InitOutcome::Loaded);
    assert_eq!(embedder.calls(), 2);
}

#[tokio::test]
async fn vectors_stay_aligned_with_documents() {
    let fx = Fixture::new("alpha beta\n\n  gamma  \nalpha beta\ndelta\n");
    let embedder = CountingEmbedder::new(64);
    let service = fx.service(embedder.clone());
    service.initialize().await.unwrap();

    let snapshot = service.store().load().await.unwrap().unwrap();
    assert_eq!(
        snapshot.documents,
        vec!["alpha beta", "gamma", "alpha beta", "delta"]
    );
    assert_eq!(snapshot.index.len(), snapshot.documents.len());

    for (position, document) in snapshot.documents.iter().enumerate() {
        let expected = embedder.embed_one(document).await.unwrap();
        assert_eq!(snapshot.index.vector(position).unwrap(), expected.as_slice());
    }
}

#[tokio::test]
async fn duplicate_lines_are_distinct_results() {
    let fx = Fixture::new("Paris is in France.\nThe sky is blue.\nParis is in France.\n");
    let service = fx.service(CountingEmbedder::new(512));
    service.initialize().await.unwrap();

    let results = service.query("Paris is in France.", 2).await.unwrap();
    assert_eq!(
        documents(&results),
        vec!["Paris is in France.", "Paris is in France."]
    );
    assert_eq!(results[0].score, results[1].score);
}

#[tokio::test]
async fn k_larger_than_corpus_returns_everything() {
    let fx = Fixture::new(KNOWLEDGE);
    let service = fx.service(CountingEmbedder::new(512));
    service.initialize().await.unwrap();

    let results = service.query("boiling water", 10).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].document, "Water boils at 100C.");
    assert!(results.windows(2).all(|w| w[0].score <= w[1].score));
}

#[tokio::test]
async fn zero_k_is_rejected() {
    let fx = Fixture::new(KNOWLEDGE);
    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());
    service.initialize().await.unwrap();

    let err = service.query("sky", 0).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidArgument(_)));
    assert_eq!(embedder.calls(), 1);
}

#[tokio::test]
async fn corrupt_snapshot_is_rebuilt() {
    let fx = Fixture::new(KNOWLEDGE);
    fx.service(CountingEmbedder::new(512))
        .initialize()
        .await
        .unwrap();
    std::fs::remove_file(fx.artifact(DOCUMENTS_FILE)).unwrap();

    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());
    assert_eq!(
        service.initialize().await.unwrap(),
        InitOutcome::Rebuilt(RebuildReason::CorruptSnapshot)
    );
    assert_eq!(embedder.calls(), 1);
    assert_snapshot_complete(&fx.index_dir);
}

#[tokio::test]
async fn missing_fingerprint_is_rebuilt() {
    let fx = Fixture::new(KNOWLEDGE);
    fx.service(CountingEmbedder::new(512))
        .initialize()
        .await
        .unwrap();
    std::fs::remove_file(fx.artifact(FINGERPRINT_FILE)).unwrap();

    let service = fx.service(CountingEmbedder::new(512));
    assert_eq!(
        service.initialize().await.unwrap(),
        InitOutcome::Rebuilt(RebuildReason::CorruptSnapshot)
    );
}

#[tokio::test]
async fn missing_source_is_fatal() {
    let fx = Fixture::new(KNOWLEDGE);
    std::fs::remove_file(&fx.corpus).unwrap();

    let service = fx.service(CountingEmbedder::new(512));
    let err = service.initialize().await.unwrap_err();
    assert!(matches!(err, RetrievalError::SourceNotFound(ref p) if *p == fx.corpus));
}

#[tokio::test]
async fn blank_corpus_is_fatal_and_writes_nothing() {
    let fx = Fixture::new("\n   \n\t\n");
    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());

    let err = service.initialize().await.unwrap_err();
    assert!(matches!(err, RetrievalError::EmptyCorpus(_)));
    assert_eq!(embedder.calls(), 0);
    assert!(!fx.artifact(FINGERPRINT_FILE).exists());
}

#[tokio::test]
async fn query_before_initialize_is_empty_index() {
    let fx = Fixture::new(KNOWLEDGE);
    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());

    assert!(matches!(
        service.query("sky", 1).await,
        Err(RetrievalError::EmptyIndex)
    ));
    assert!(matches!(
        service.status().await,
        Err(RetrievalError::EmptyIndex)
    ));
    assert!(service.retrieve_context("sky", 1).await.is_empty());
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn embedder_dimension_drift_is_reported() {
    let fx = Fixture::new(KNOWLEDGE);
    fx.service(CountingEmbedder::new(16))
        .initialize()
        .await
        .unwrap();

    let service = fx.service(CountingEmbedder::new(32));
    assert_eq!(service.initialize().await.unwrap(), InitOutcome::Loaded);

    let err = service.query("sky", 1).await.unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::DimensionMismatch {
            expected: 16,
            actual: 32
        }
    ));
}

#[tokio::test]
async fn failed_rebuild_keeps_serving_previous_index() {
    let fx = Fixture::new(KNOWLEDGE);
    let embedder = CountingEmbedder::new(512);
    let service = fx.service(embedder.clone());
    service.initialize().await.unwrap();
    let before = service.status().await.unwrap();

    fx.write_corpus("Rice grows in paddies.\n");
    embedder.fail(true);

    let err = service.force_rebuild().await.unwrap_err();
    assert!(matches!(err, RetrievalError::Embedding(_)));
    assert_eq!(service.status().await.unwrap(), before);

    // Queries need the embedder too; they degrade to no context.
    assert!(service.retrieve_context("sky", 2).await.is_empty());

    embedder.fail(false);
    let results = service.retrieve_context("What color is the sky?", 1).await;
    assert_eq!(documents(&results), vec!["The sky is blue."]);

    // The stored snapshot still belongs to the old corpus, so a restart rebuilds.
    let restarted = fx.service(CountingEmbedder::new(512));
    assert_eq!(
        restarted.initialize().await.unwrap(),
        InitOutcome::Rebuilt(RebuildReason::StaleFingerprint)
    );
}

#[tokio::test]
async fn concurrent_queries_share_the_index() {
    let fx = Fixture::new(KNOWLEDGE);
    let service = Arc::new(fx.service(CountingEmbedder::new(512)));
    service.initialize().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service.query("What color is the sky?", 1).await
        }));
    }

    for handle in handles {
        let results = handle.await.unwrap().unwrap();
        assert_eq!(documents(&results), vec!["The sky is blue."]);
    }
}

#[tokio::test]
async fn queries_use_previous_index_while_rebuilding() {
    let fx = Fixture::new(KNOWLEDGE);
    let embedder = CountingEmbedder::new(512);
    let service = Arc::new(fx.service(embedder.clone()));
    service.initialize().await.unwrap();

    fx.write_corpus("Rice grows in paddies.\nWheat is a winter crop.\n");
    embedder.hold_batches();
    let rebuild = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.force_rebuild().await }
    });
    embedder.entered.notified().await;

    let results = tokio::time::timeout(
        Duration::from_secs(5),
        service.query("What color is the sky?", 1),
    )
    .await
    .expect("query blocked behind the rebuild")
    .unwrap();
    assert_eq!(documents(&results), vec!["The sky is blue."]);
    assert_eq!(service.status().await.unwrap().documents, 3);

    embedder.resume();
    rebuild.await.unwrap().unwrap();

    assert_eq!(service.status().await.unwrap().documents, 2);
    let results = service.query("When is wheat sown?", 1).await.unwrap();
    assert_eq!(documents(&results), vec!["Wheat is a winter crop."]);
}
