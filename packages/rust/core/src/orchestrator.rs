//! Pipeline Orchestrator (§4.9): the sequential per-task state machine.
//!
//! A [`PipelineHandle`] owns the registry, the resource governor, the
//! provider adapters, and a FIFO queue — the "singletons become fields"
//! re-architecture the teacher notes for itself (§9), so tests can build a
//! fresh handle per case instead of reaching for module-level statics.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use llmsforge_governor::{CancellationCheck, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, ResourceGovernor, retry};
use llmsforge_registry::TaskRegistry;
use llmsforge_shared::adapters::{BrowserPageProvider, EmbeddingProvider, LlmProvider, VectorStoreProvider, WebSearchProvider};
use llmsforge_shared::config::PipelineConfig;
use llmsforge_shared::{
    DiscoveryStageResult, EmbedStageResult, FetchStageResult, PipelineError, ProgressSink, Request,
    Result, Stage, StartInput, StopAfterStage, SynthesizeStageResult, TaskDetails, TaskId,
    TaskRecord, TaskStatus, now_ms,
};

/// Default `max_llm_calls` when a [`Request`] does not specify one.
const DEFAULT_MAX_LLM_CALLS: usize = 10;
/// Default `max_urls` when a [`Request`] does not specify one.
const DEFAULT_MAX_URLS: usize = 50;
/// Default `crawl_depth` when a [`Request`] does not specify one.
const DEFAULT_CRAWL_DEPTH: u32 = 2;

struct AtomicCancellation(Arc<AtomicBool>);

impl CancellationCheck for AtomicCancellation {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Owns every piece of process state the pipeline needs: the task registry,
/// the resource governor, provider adapters, and the FIFO submission queue.
pub struct PipelineHandle {
    registry: TaskRegistry,
    governor: Arc<ResourceGovernor>,
    config: PipelineConfig,
    web_search: Arc<dyn WebSearchProvider>,
    browser: Arc<dyn BrowserPageProvider>,
    llm: Arc<dyn LlmProvider>,
    llm_provider_name: String,
    llm_model: String,
    embedder: Arc<dyn EmbeddingProvider>,
    embedding_model: String,
    store: Arc<dyn VectorStoreProvider>,
    vector_collection: String,
    progress: Arc<dyn ProgressSink>,
    queue: tokio::sync::Mutex<VecDeque<(TaskId, Request)>>,
    cancel_flags: StdMutex<HashMap<String, Arc<AtomicBool>>>,
    is_processing: AtomicBool,
}

impl PipelineHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: TaskRegistry,
        governor: Arc<ResourceGovernor>,
        config: PipelineConfig,
        web_search: Arc<dyn WebSearchProvider>,
        browser: Arc<dyn BrowserPageProvider>,
        llm: Arc<dyn LlmProvider>,
        llm_provider_name: impl Into<String>,
        llm_model: impl Into<String>,
        embedder: Arc<dyn EmbeddingProvider>,
        embedding_model: impl Into<String>,
        store: Arc<dyn VectorStoreProvider>,
        vector_collection: impl Into<String>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            registry,
            governor,
            config,
            web_search,
            browser,
            llm,
            llm_provider_name: llm_provider_name.into(),
            llm_model: llm_model.into(),
            embedder,
            embedding_model: embedding_model.into(),
            store,
            vector_collection: vector_collection.into(),
            progress,
            queue: tokio::sync::Mutex::new(VecDeque::new()),
            cancel_flags: StdMutex::new(HashMap::new()),
            is_processing: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Enqueue a new task for `request`, returning its id immediately
    /// (status `queued`); the caller drives execution via [`Self::drain`].
    pub async fn submit(&self, request: Request) -> Result<TaskId> {
        request.validate()?;
        let task_id = TaskId::new("get-llms-full");
        let record = TaskRecord::new(task_id.clone(), now_ms());
        self.registry.register(record).await?;
        self.cancel_flags
            .lock()
            .unwrap()
            .insert(task_id.0.clone(), Arc::new(AtomicBool::new(false)));
        self.queue.lock().await.push_back((task_id.clone(), request));
        Ok(task_id)
    }

    /// Request cooperative cancellation of one task (queued or running).
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        if let Some(flag) = self.cancel_flags.lock().unwrap().get(&task_id.0) {
            flag.store(true, Ordering::Release);
        }
        self.registry.request_cancel(task_id).await
    }

    /// Cancel every non-terminal task, returning how many were flagged.
    pub async fn cancel_all(&self) -> Result<usize> {
        let mut count = 0;
        for task in self.registry.list().await {
            if !task.status.is_terminal() {
                self.cancel_task(&task.task_id).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Drop terminal tasks older than `max_age_ms`.
    pub async fn cleanup_terminal(&self, max_age_ms: i64) -> Result<usize> {
        self.registry.cleanup(now_ms(), max_age_ms).await
    }

    /// Run the dispatcher loop (§4.9) to completion: pop tasks FIFO, skip
    /// ones cancelled while still queued, run the rest end to end. Guarded
    /// by `is_processing` so two concurrent calls never interleave pipelines.
    pub async fn drain(&self) -> Result<Vec<TaskId>> {
        if self.is_processing.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::transient("dispatcher is already draining"));
        }
        let result = self.drain_inner().await;
        self.is_processing.store(false, Ordering::Release);
        result
    }

    async fn drain_inner(&self) -> Result<Vec<TaskId>> {
        let mut finished = Vec::new();
        loop {
            let next = self.queue.lock().await.pop_front();
            let Some((task_id, request)) = next else {
                break;
            };

            if self.registry.is_cancelled(&task_id).await {
                self.registry
                    .set_status(&task_id, TaskStatus::Cancelled, now_ms())
                    .await?;
                self.cancel_flags.lock().unwrap().remove(&task_id.0);
                finished.push(task_id);
                continue;
            }

            self.run_pipeline(&task_id, &request).await;
            self.cancel_flags.lock().unwrap().remove(&task_id.0);
            finished.push(task_id);
        }
        Ok(finished)
    }

    fn cancellation_for(&self, task_id: &TaskId) -> AtomicCancellation {
        let flag = self
            .cancel_flags
            .lock()
            .unwrap()
            .get(&task_id.0)
            .cloned()
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        AtomicCancellation(flag)
    }

    /// Run one task end to end, writing its terminal status. Errors are
    /// absorbed here (logged, reflected onto the registry) so the dispatcher
    /// always proceeds to the next queued task (§4.9 step 5).
    async fn run_pipeline(&self, task_id: &TaskId, request: &Request) {
        if let Err(err) = self.registry.set_status(task_id, TaskStatus::Running, now_ms()).await {
            tracing::warn!(%task_id, %err, "failed to mark task running");
            return;
        }

        let outcome = self.execute_stages(task_id, request).await;

        let result = match outcome {
            Ok(()) => {
                if request.stop_after_stage.is_none() {
                    self.run_cleanup(task_id).await;
                }
                self.registry.set_status(task_id, TaskStatus::Completed, now_ms()).await
            }
            Err(err) if err.is_cancellation() => {
                tracing::info!(%task_id, "task cancelled mid-pipeline");
                self.registry.set_status(task_id, TaskStatus::Cancelled, now_ms()).await
            }
            Err(err) => {
                tracing::warn!(%task_id, error = %err, "pipeline stage failed");
                self.registry.set_status(task_id, TaskStatus::Failed, now_ms()).await
            }
        };

        if let Err(err) = result {
            tracing::warn!(%task_id, %err, "failed to persist terminal task status");
        }
    }

    async fn execute_stages(&self, task_id: &TaskId, request: &Request) -> Result<()> {
        match &request.start {
            StartInput::TopicOrUrl(topic) => self.run_from_discovery(task_id, request, topic).await,
            StartInput::DiscoveryOutputFilePath(path) => {
                let discovery = DiscoveryStageResult {
                    sources_file_path: path.clone(),
                    category: request.category.clone(),
                    is_source_local: false,
                    original_input: path.clone(),
                };
                self.run_from_fetch(task_id, request, &discovery).await
            }
            StartInput::FetchOutputDirPath(path) => {
                let fetch = FetchStageResult {
                    fetch_output_dir_path: path.clone(),
                    category: request.category.clone(),
                    original_input: path.clone(),
                    source_count: 0,
                };
                self.run_from_synthesize(task_id, request, &fetch).await
            }
            StartInput::SynthesizedContentFilePath(path) => {
                let synth = SynthesizeStageResult {
                    summary_file_path: path.clone(),
                    category: request.category.clone(),
                    original_input: path.clone(),
                };
                self.run_embed(task_id, request, &synth).await
            }
        }
    }

    async fn run_from_discovery(&self, task_id: &TaskId, request: &Request, topic_or_url: &str) -> Result<()> {
        let discovery = self.run_discovery(task_id, request, topic_or_url).await?;
        if request.stop_after_stage == Some(StopAfterStage::Discovery) {
            return Ok(());
        }
        self.run_from_fetch(task_id, request, &discovery).await
    }

    async fn run_from_fetch(&self, task_id: &TaskId, request: &Request, discovery: &DiscoveryStageResult) -> Result<()> {
        let fetch = self.run_fetch(task_id, request, discovery).await?;
        if request.stop_after_stage == Some(StopAfterStage::Fetch) {
            return Ok(());
        }
        self.run_from_synthesize(task_id, request, &fetch).await
    }

    async fn run_from_synthesize(&self, task_id: &TaskId, request: &Request, fetch: &FetchStageResult) -> Result<()> {
        let synth = self.run_synthesize(task_id, request, fetch).await?;
        if request.stop_after_stage == Some(StopAfterStage::Synthesize) {
            return Ok(());
        }
        self.run_embed(task_id, request, &synth).await
    }

    async fn run_discovery(
        &self,
        task_id: &TaskId,
        request: &Request,
        topic_or_url: &str,
    ) -> Result<DiscoveryStageResult> {
        self.registry.set_stage(task_id, Stage::Discovery).await?;
        let cancel = self.cancellation_for(task_id);
        let crawl_depth = request.crawl_depth.unwrap_or(DEFAULT_CRAWL_DEPTH);
        let max_urls = request.max_urls.unwrap_or(DEFAULT_MAX_URLS).max(1);

        let outcome = retry(
            || async {
                let _guard = self
                    .governor
                    .browser_activity
                    .try_acquire()
                    .ok_or_else(|| PipelineError::transient("browser activity lock busy"))?;
                llmsforge_discovery::discover(
                    &task_id.0,
                    topic_or_url,
                    crawl_depth,
                    max_urls,
                    self.web_search.as_ref(),
                    self.browser.clone(),
                    &self.governor.browser_pages,
                    self.progress.as_ref(),
                    &cancel,
                )
                .await
            },
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_INITIAL_DELAY,
            "discovery stage",
            Some(&task_id.0),
            Some(&cancel),
        )
        .await?;

        let sources_path =
            llmsforge_discovery::write_discovery_artifact(&self.config.data_root, &task_id.0, &outcome.sources)
                .await?;
        let result = DiscoveryStageResult {
            sources_file_path: sources_path.to_string_lossy().into_owned(),
            category: request.category.clone(),
            is_source_local: outcome.is_source_local,
            original_input: topic_or_url.to_string(),
        };
        self.registry
            .set_details(task_id, &TaskDetails::Discovery(result.clone()))
            .await?;
        Ok(result)
    }

    async fn run_fetch(
        &self,
        task_id: &TaskId,
        request: &Request,
        discovery: &DiscoveryStageResult,
    ) -> Result<FetchStageResult> {
        self.registry.set_stage(task_id, Stage::Fetch).await?;
        let cancel = self.cancellation_for(task_id);

        let mut sources =
            llmsforge_discovery::read_discovery_artifact(Path::new(&discovery.sources_file_path)).await?;
        let max_urls = request.max_urls.unwrap_or(sources.len().max(1)).max(1);
        sources.truncate(max_urls);

        let outcome = retry(
            || async {
                let _guard = self
                    .governor
                    .browser_activity
                    .try_acquire()
                    .ok_or_else(|| PipelineError::transient("browser activity lock busy"))?;
                llmsforge_fetch::fetch_sources(
                    &self.config.data_root,
                    &task_id.0,
                    &sources,
                    self.browser.clone(),
                    &self.governor.browser_pages,
                    self.progress.as_ref(),
                    &cancel,
                )
                .await
            },
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_INITIAL_DELAY,
            "fetch stage",
            Some(&task_id.0),
            Some(&cancel),
        )
        .await?;

        let result = FetchStageResult {
            fetch_output_dir_path: outcome.fetch_output_dir.to_string_lossy().into_owned(),
            category: request.category.clone(),
            original_input: discovery.original_input.clone(),
            source_count: outcome.source_count,
        };
        self.registry
            .set_details(task_id, &TaskDetails::Fetch(result.clone()))
            .await?;
        Ok(result)
    }

    async fn run_synthesize(
        &self,
        task_id: &TaskId,
        request: &Request,
        fetch: &FetchStageResult,
    ) -> Result<SynthesizeStageResult> {
        let max_llm_calls = request.max_llm_calls.unwrap_or(DEFAULT_MAX_LLM_CALLS);
        if max_llm_calls == 0 {
            return Err(PipelineError::invalid_request(
                "max_llm_calls must be at least 1",
            ));
        }

        self.registry.set_stage(task_id, Stage::Synthesize).await?;
        let cancel = self.cancellation_for(task_id);
        let fetch_output_dir = PathBuf::from(&fetch.fetch_output_dir_path);

        let outcome = retry(
            || async {
                let _guard = self
                    .governor
                    .synthesize
                    .try_acquire()
                    .ok_or_else(|| PipelineError::transient("synthesize lock busy"))?;
                llmsforge_synthesize::synthesize(
                    &self.config.data_root,
                    &task_id.0,
                    &fetch_output_dir,
                    &fetch.original_input,
                    &request.category,
                    max_llm_calls,
                    &self.llm_provider_name,
                    &self.llm_model,
                    self.llm.clone(),
                    &self.governor.llm_calls,
                    self.progress.as_ref(),
                    &cancel,
                )
                .await
            },
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_INITIAL_DELAY,
            "synthesize stage",
            Some(&task_id.0),
            Some(&cancel),
        )
        .await?;

        let result = SynthesizeStageResult {
            summary_file_path: outcome.summary_path.to_string_lossy().into_owned(),
            category: request.category.clone(),
            original_input: fetch.original_input.clone(),
        };
        self.registry
            .set_details(task_id, &TaskDetails::Synthesize(result.clone()))
            .await?;
        Ok(result)
    }

    /// The Embed Engine manages its own stage-lock acquisition internally
    /// (§4.7 step 1), so unlike the other three stages this is a direct call
    /// rather than an orchestrator-level retry-wrapped one.
    async fn run_embed(&self, task_id: &TaskId, request: &Request, synth: &SynthesizeStageResult) -> Result<()> {
        self.registry.set_stage(task_id, Stage::Embed).await?;
        let cancel = self.cancellation_for(task_id);

        let outcome = llmsforge_embed::embed_summary(
            &task_id.0,
            Path::new(&synth.summary_file_path),
            &request.category,
            &self.vector_collection,
            &self.embedding_model,
            self.governor.qdrant_batch_size,
            &self.governor.embed,
            self.embedder.clone(),
            self.store.clone(),
            self.progress.as_ref(),
            &cancel,
        )
        .await?;

        let result = EmbedStageResult {
            collection: outcome.collection,
            point_count: outcome.point_count,
            category: request.category.clone(),
            original_input: synth.original_input.clone(),
        };
        self.registry
            .set_details(task_id, &TaskDetails::Embed(result))
            .await?;
        Ok(())
    }

    /// §4.8: only reached when `stop_after_stage` is unset, so Embed was
    /// the terminal stage. Each deletion is independent and best-effort.
    async fn run_cleanup(&self, task_id: &TaskId) {
        self.registry.set_stage(task_id, Stage::Cleanup).await.ok();

        let discovery_path = self
            .config
            .data_root
            .join("discovery_output")
            .join(format!("{}-sources.json", task_id.0));
        let synth_path = self
            .config
            .data_root
            .join("synthesize_output")
            .join(format!("{}-summary.md", task_id.0));
        let fetch_dir = self.config.data_root.join("fetch_output").join(&task_id.0);

        remove_file_tolerant(task_id, "discovery artifact", &discovery_path).await;
        remove_file_tolerant(task_id, "synthesize artifact", &synth_path).await;

        if let Err(err) = tokio::fs::remove_dir_all(&fetch_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(%task_id, %err, "cleanup: failed to remove fetch output dir");
            }
        }
    }
}

async fn remove_file_tolerant(task_id: &TaskId, label: &str, path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(%task_id, %label, %err, "cleanup: failed to remove artifact");
        }
    }
}
