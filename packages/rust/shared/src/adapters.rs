//! External collaborator interfaces (§6.4).
//!
//! These traits are the entire contract the core depends on for web search,
//! browser automation, LLM completion, embedding generation, and the vector
//! store. No concrete production adapter ships in this crate — callers wire
//! up a real implementation (or, in tests, an in-memory fake) and hand the
//! orchestrator a `Arc<dyn Trait>`. Mirrors the teacher's "hide behind a
//! small capability set" re-architecture note (§9).

use async_trait::async_trait;

use crate::error::Result;

/// A single web-search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub url: String,
}

/// `search(query, max_results) -> [{url}]`.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// The result of loading one page through the browser automation adapter.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub html: String,
    pub final_url: String,
}

/// `withPage(fn)` — opens a page under the page limiter, navigates, and
/// always closes the page. The page limiter itself lives in the governor
/// crate; this trait models only the navigate-and-read operation.
#[async_trait]
pub trait BrowserPageProvider: Send + Sync {
    async fn load(&self, url: &str, timeout: std::time::Duration) -> Result<PageContent>;
}

/// `complete(provider, model, prompt) -> text`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String>;
}

/// `embed(provider, model, text) -> float[]`; advertises vector size.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self, model: &str) -> usize;
}

/// Minimal collection description used by collection init (§4.7.1).
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub exists: bool,
    pub dimension: Option<usize>,
}

/// `collections.list`, `collection.create/.delete/.info`,
/// `upsert(name, [point], wait=true)`, `scroll`, `search(...)`.
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    async fn collection_info(&self, name: &str) -> Result<CollectionInfo>;
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;
    async fn delete_collection(&self, name: &str) -> Result<()>;
    async fn upsert(&self, name: &str, points: Vec<crate::types::VectorPoint>) -> Result<()>;
}

/// A free-form progress line emitted by a stage, persisted onto the task
/// record's progress fields (§4.1 `updateDetails`). Stages depend only on
/// this trait, never on the registry directly — mirrors the teacher's
/// `core::pipeline::ProgressReporter` callback, made async since stage work
/// here runs inside the same executor as the registry's own I/O.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, task_id: &str, message: &str);
}

/// No-op sink for headless/test usage.
pub struct SilentProgress;

#[async_trait]
impl ProgressSink for SilentProgress {
    async fn report(&self, _task_id: &str, _message: &str) {}
}
