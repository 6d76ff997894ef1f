//! Embed Engine: chunk the synthesized guide, embed each chunk, and upsert
//! the resulting points into the vector store in bounded batches (§4.7).

mod chunk;

pub use chunk::{chunk_text, sanitize_chunk};

use std::path::Path;
use std::sync::Arc;

use llmsforge_governor::{CancellationCheck, StageLock, retry};
use llmsforge_shared::adapters::{EmbeddingProvider, VectorStoreProvider};
use llmsforge_shared::types::{PointPayload, VectorPoint, point_id};
use llmsforge_shared::{PipelineError, ProgressSink, Result};
use tracing::{instrument, warn};

/// Default chunking parameters (§4.7 step 4).
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

pub struct EmbedOutcome {
    pub point_count: usize,
    pub collection: String,
}

/// Ensure `collection` exists with the right vector dimension, creating or
/// recreating it as needed (§4.7.1).
#[instrument(skip(store))]
async fn ensure_collection(
    store: &dyn VectorStoreProvider,
    collection: &str,
    dimension: usize,
) -> Result<()> {
    let info = store.collection_info(collection).await?;
    if !info.exists {
        store.create_collection(collection, dimension).await?;
        return Ok(());
    }
    if info.dimension != Some(dimension) {
        store.delete_collection(collection).await?;
        store.create_collection(collection, dimension).await?;
    }
    Ok(())
}

/// Run the Embed Engine (§4.7): acquire the stage lock, ensure the
/// collection, chunk and embed the summary file, and upsert the resulting
/// points in batches of `batch_size`.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(task_id, category))]
pub async fn embed_summary(
    task_id: &str,
    summary_path: &Path,
    category: &str,
    collection: &str,
    embedding_model: &str,
    batch_size: usize,
    embed_lock: &StageLock,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStoreProvider>,
    progress: &dyn ProgressSink,
    cancellation: &dyn CancellationCheck,
) -> Result<EmbedOutcome> {
    let description = format!("embed stage lock for task {task_id}");
    let guard = retry(
        || async {
            embed_lock
                .try_acquire()
                .ok_or_else(|| PipelineError::transient("embed lock busy"))
        },
        llmsforge_governor::DEFAULT_MAX_ATTEMPTS,
        llmsforge_governor::DEFAULT_INITIAL_DELAY,
        &description,
        Some(task_id),
        Some(cancellation),
    )
    .await?;

    let dimension = embedder.dimension(embedding_model);
    ensure_collection(store.as_ref(), collection, dimension).await?;

    let text = tokio::fs::read_to_string(summary_path)
        .await
        .map_err(|e| PipelineError::io(summary_path, e))?;

    let source = summary_path.to_string_lossy().into_owned();
    let chunks = chunk_text(&text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP);

    let mut points: Vec<VectorPoint> = Vec::with_capacity(chunks.len());
    for (index, raw_chunk) in chunks.iter().enumerate() {
        let sanitized = sanitize_chunk(raw_chunk);
        if sanitized.is_empty() {
            continue;
        }
        match embedder.embed(embedding_model, &sanitized).await {
            Ok(vector) => {
                points.push(VectorPoint {
                    id: point_id(&source, index),
                    vector,
                    payload: PointPayload {
                        text: sanitized,
                        source: source.clone(),
                        chunk_index: index,
                        category: category.to_string(),
                    },
                });
            }
            Err(err) => {
                warn!(chunk_index = index, %err, "embed: chunk embedding failed, skipping");
            }
        }
    }

    let total_points = points.len();
    let effective_batch_size = batch_size.max(1);
    for batch in points.chunks(effective_batch_size) {
        if cancellation.is_cancelled() {
            return Err(PipelineError::cancelled(task_id.to_string()));
        }
        store.upsert(collection, batch.to_vec()).await?;
    }

    drop(guard);
    progress
        .report(
            task_id,
            &format!("Embed Stage: Upsert complete for {total_points} points."),
        )
        .await;

    Ok(EmbedOutcome {
        point_count: total_points,
        collection: collection.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmsforge_shared::SilentProgress;
    use llmsforge_shared::adapters::CollectionInfo;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEmbedder {
        dim: usize,
    }
    #[async_trait::async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32; self.dim])
        }
        fn dimension(&self, _model: &str) -> usize {
            self.dim
        }
    }

    struct FailingEmbedder;
    #[async_trait::async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _model: &str, _text: &str) -> Result<Vec<f32>> {
            Err(PipelineError::external_fatal("embedding provider down"))
        }
        fn dimension(&self, _model: &str) -> usize {
            768
        }
    }

    #[derive(Default)]
    struct FakeStore {
        dimension: Mutex<Option<usize>>,
        created: AtomicUsize,
        recreated: AtomicUsize,
        upserted: Mutex<Vec<VectorPoint>>,
        batch_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VectorStoreProvider for FakeStore {
        async fn collection_info(&self, _name: &str) -> Result<CollectionInfo> {
            let dim = *self.dimension.lock().unwrap();
            Ok(CollectionInfo {
                exists: dim.is_some(),
                dimension: dim,
            })
        }

        async fn create_collection(&self, _name: &str, dimension: usize) -> Result<()> {
            *self.dimension.lock().unwrap() = Some(dimension);
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete_collection(&self, _name: &str) -> Result<()> {
            *self.dimension.lock().unwrap() = None;
            self.recreated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn upsert(&self, _name: &str, points: Vec<VectorPoint>) -> Result<()> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.upserted.lock().unwrap().extend(points);
            Ok(())
        }
    }

    struct NeverCancelled;
    impl CancellationCheck for NeverCancelled {
        fn is_cancelled(&self) -> bool {
            false
        }
    }

    struct AlwaysCancelled;
    impl CancellationCheck for AlwaysCancelled {
        fn is_cancelled(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn embed_summary_creates_collection_and_upserts_points() {
        let dir = tempfile::tempdir().unwrap();
        let summary_path = dir.path().join("t-1-summary.md");
        tokio::fs::write(&summary_path, "a".repeat(2500)).await.unwrap();

        let lock = StageLock::new();
        let store = Arc::new(FakeStore::default());
        let outcome = embed_summary(
            "t-1",
            &summary_path,
            "notes",
            "llmsforge_docs",
            "text-embedding-3-small",
            100,
            &lock,
            Arc::new(FakeEmbedder { dim: 1536 }),
            store.clone(),
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap();

        assert!(outcome.point_count > 0);
        assert_eq!(store.created.load(Ordering::SeqCst), 1);
        assert_eq!(store.upserted.lock().unwrap().len(), outcome.point_count);
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn embed_summary_recreates_collection_on_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let summary_path = dir.path().join("t-1-summary.md");
        tokio::fs::write(&summary_path, "hello world").await.unwrap();

        let store = Arc::new(FakeStore::default());
        *store.dimension.lock().unwrap() = Some(768);
        let lock = StageLock::new();

        embed_summary(
            "t-1",
            &summary_path,
            "notes",
            "llmsforge_docs",
            "text-embedding-3-small",
            100,
            &lock,
            Arc::new(FakeEmbedder { dim: 1536 }),
            store.clone(),
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap();

        assert_eq!(store.recreated.load(Ordering::SeqCst), 1);
        assert_eq!(store.created.load(Ordering::SeqCst), 1);
        assert_eq!(*store.dimension.lock().unwrap(), Some(1536));
    }

    #[tokio::test]
    async fn embed_summary_skips_per_chunk_failures_without_failing_stage() {
        let dir = tempfile::tempdir().unwrap();
        let summary_path = dir.path().join("t-1-summary.md");
        tokio::fs::write(&summary_path, "some content").await.unwrap();

        let lock = StageLock::new();
        let store = Arc::new(FakeStore::default());
        let outcome = embed_summary(
            "t-1",
            &summary_path,
            "notes",
            "llmsforge_docs",
            "text-embedding-3-small",
            100,
            &lock,
            Arc::new(FailingEmbedder),
            store.clone(),
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap();

        assert_eq!(outcome.point_count, 0);
        assert!(store.upserted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn embed_summary_batches_upsert_and_checks_cancellation_between_batches() {
        let dir = tempfile::tempdir().unwrap();
        let summary_path = dir.path().join("t-1-summary.md");
        tokio::fs::write(&summary_path, "x".repeat(3500)).await.unwrap();

        let lock = StageLock::new();
        let store = Arc::new(FakeStore::default());
        let outcome = embed_summary(
            "t-1",
            &summary_path,
            "notes",
            "llmsforge_docs",
            "text-embedding-3-small",
            1,
            &lock,
            Arc::new(FakeEmbedder { dim: 8 }),
            store.clone(),
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap();

        assert_eq!(store.batch_calls.load(Ordering::SeqCst), outcome.point_count);
    }

    #[tokio::test]
    async fn embed_summary_aborts_when_cancelled_before_upsert_batches() {
        let dir = tempfile::tempdir().unwrap();
        let summary_path = dir.path().join("t-1-summary.md");
        tokio::fs::write(&summary_path, "x".repeat(3500)).await.unwrap();

        let lock = StageLock::new();
        let store = Arc::new(FakeStore::default());
        let err = embed_summary(
            "t-1",
            &summary_path,
            "notes",
            "llmsforge_docs",
            "text-embedding-3-small",
            1,
            &lock,
            Arc::new(FakeEmbedder { dim: 8 }),
            store.clone(),
            &SilentProgress,
            &AlwaysCancelled,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn embed_summary_produces_stable_point_ids_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let summary_path = dir.path().join("t-1-summary.md");
        tokio::fs::write(&summary_path, "stable content for point ids").await.unwrap();

        let lock_a = StageLock::new();
        let store_a = Arc::new(FakeStore::default());
        let outcome_a = embed_summary(
            "t-1",
            &summary_path,
            "notes",
            "llmsforge_docs",
            "text-embedding-3-small",
            100,
            &lock_a,
            Arc::new(FakeEmbedder { dim: 8 }),
            store_a.clone(),
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap();

        let lock_b = StageLock::new();
        let store_b = Arc::new(FakeStore::default());
        let outcome_b = embed_summary(
            "t-1",
            &summary_path,
            "notes",
            "llmsforge_docs",
            "text-embedding-3-small",
            100,
            &lock_b,
            Arc::new(FakeEmbedder { dim: 8 }),
            store_b.clone(),
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap();

        assert_eq!(outcome_a.point_count, outcome_b.point_count);
        let ids_a: Vec<_> = store_a.upserted.lock().unwrap().iter().map(|p| p.id).collect();
        let ids_b: Vec<_> = store_b.upserted.lock().unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids_a, ids_b);
    }
}
