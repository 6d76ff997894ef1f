//! Task registry: the in-memory task map plus its on-disk mirror (§3.1, §4.1).
//!
//! Every mutation updates the in-memory map first, then persists the whole
//! map to `task_store_path` atomically (write to a temp file, then rename),
//! mirroring the teacher's `assemble_artifacts` write idiom.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use llmsforge_shared::{PipelineError, Result, Stage, TaskDetails, TaskId, TaskRecord, TaskStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Shared, async-safe task registry backed by a JSON file.
#[derive(Clone)]
pub struct TaskRegistry {
    store_path: PathBuf,
    tasks: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl TaskRegistry {
    /// Load the registry from `store_path`, or start empty if the file does
    /// not exist yet. A corrupt file is reported as a `PipelineError::Parse`
    /// rather than silently discarded.
    #[instrument(skip_all, fields(store_path = %store_path.display()))]
    pub async fn load(store_path: impl Into<PathBuf>) -> Result<Self> {
        let store_path = store_path.into();
        let tasks = match tokio::fs::read_to_string(&store_path).await {
            Ok(contents) => serde_json::from_str::<HashMap<String, TaskRecord>>(&contents)
                .map_err(|e| PipelineError::parse(format!("task store is not valid JSON: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(PipelineError::io(&store_path, e)),
        };
        info!(count = tasks.len(), "loaded task registry");
        Ok(Self {
            store_path,
            tasks: Arc::new(Mutex::new(tasks)),
        })
    }

    async fn persist(&self, tasks: &HashMap<String, TaskRecord>) -> Result<()> {
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(tasks)
            .map_err(|e| PipelineError::parse(format!("failed to serialize task store: {e}")))?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &json)
            .await
            .map_err(|e| PipelineError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.store_path)
            .await
            .map_err(|e| PipelineError::io(&self.store_path, e))?;
        debug!(count = tasks.len(), "persisted task registry");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .store_path
            .file_name()
            .map(|n| format!(".{}.tmp", n.to_string_lossy()))
            .unwrap_or_else(|| ".tasks.json.tmp".to_string());
        self.store_path
            .parent()
            .map(|p| p.join(&file_name))
            .unwrap_or_else(|| PathBuf::from(file_name))
    }

    /// Insert a brand-new task record (status `queued`).
    #[instrument(skip(self))]
    pub async fn register(&self, record: TaskRecord) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        tasks.insert(record.task_id.0.clone(), record);
        self.persist(&tasks).await
    }

    /// Fetch a clone of one task record.
    pub async fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.tasks.lock().await.get(&task_id.0).cloned()
    }

    /// All task records, in no particular order (callers sort as needed).
    pub async fn list(&self) -> Vec<TaskRecord> {
        self.tasks.lock().await.values().cloned().collect()
    }

    async fn mutate<F>(&self, task_id: &TaskId, f: F) -> Result<()>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let mut tasks = self.tasks.lock().await;
        let record = tasks
            .get_mut(&task_id.0)
            .ok_or_else(|| PipelineError::invalid_request(format!("unknown task {task_id}")))?;
        f(record);
        self.persist(&tasks).await
    }

    /// Transition status; sets `end_time` on the first transition into a
    /// terminal state (§3.1 invariant: `endTime` null iff queued/running).
    /// A task already in a terminal state never transitions again — the
    /// state machine forbids terminal → non-terminal and terminal →
    /// terminal moves alike (§3.1, §4.1).
    pub async fn set_status(&self, task_id: &TaskId, status: TaskStatus, now_ms: i64) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        let record = tasks
            .get_mut(&task_id.0)
            .ok_or_else(|| PipelineError::invalid_request(format!("unknown task {task_id}")))?;

        if record.status.is_terminal() {
            return Ok(());
        }

        record.status = status;
        if status.is_terminal() {
            record.end_time = Some(now_ms);
        }
        self.persist(&tasks).await
    }

    pub async fn set_stage(&self, task_id: &TaskId, stage: Stage) -> Result<()> {
        self.mutate(task_id, |record| record.stage = stage).await
    }

    /// Overwrite `details` with the JSON form of a [`TaskDetails`] payload.
    pub async fn set_details(&self, task_id: &TaskId, details: &TaskDetails) -> Result<()> {
        let json = details.to_json();
        self.mutate(task_id, |record| record.details = json).await
    }

    /// Update the free-form progress string and the numeric hint parsed out
    /// of it, if any (§4.1 `updateDetails`).
    pub async fn update_progress(&self, task_id: &TaskId, progress_text: &str) -> Result<()> {
        let hint = llmsforge_shared::parse_progress_hint(progress_text);
        self.mutate(task_id, |record| {
            if let Some((current, total)) = hint {
                record.progress_current = Some(current);
                record.progress_total = Some(total);
            }
        })
        .await
    }

    /// Mark a task for cooperative cancellation. Observed by stages between
    /// units of work; does not itself change `status`.
    pub async fn request_cancel(&self, task_id: &TaskId) -> Result<()> {
        self.mutate(task_id, |record| record.cancelled = true).await
    }

    pub async fn is_cancelled(&self, task_id: &TaskId) -> bool {
        self.tasks
            .lock()
            .await
            .get(&task_id.0)
            .map(|r| r.cancelled)
            .unwrap_or(false)
    }

    /// Remove terminal tasks whose `end_time` is older than `now_ms - max_age_ms`.
    /// Returns the number of tasks removed.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, now_ms: i64, max_age_ms: i64) -> Result<usize> {
        let mut tasks = self.tasks.lock().await;
        let cutoff = now_ms - max_age_ms;
        let before = tasks.len();
        tasks.retain(|_, record| match record.end_time {
            Some(end_time) => !record.status.is_terminal() || end_time > cutoff,
            None => true,
        });
        let removed = before - tasks.len();
        if removed > 0 {
            self.persist(&tasks).await?;
            info!(removed, "cleaned up stale terminal tasks");
        }
        Ok(removed)
    }
}

/// Convenience constructor mirroring [`TaskRegistry::load`] but taking any
/// path-like value, used by the CLI and orchestrator at startup.
pub async fn open(store_path: impl AsRef<Path>) -> Result<TaskRegistry> {
    TaskRegistry::load(store_path.as_ref().to_path_buf()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(prefix: &str) -> TaskRecord {
        TaskRecord::new(TaskId::new(prefix), 1_000)
    }

    #[tokio::test]
    async fn register_and_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let record = new_record("t");
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();
        let fetched = registry.get(&id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn reload_reproduces_in_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        let registry = TaskRegistry::load(&path).await.unwrap();
        let record = new_record("t");
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();
        registry.set_status(&id, TaskStatus::Running, 1_500).await.unwrap();

        let reloaded = TaskRegistry::load(&path).await.unwrap();
        let fetched = reloaded.get(&id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Running);
        assert_eq!(fetched.end_time, None);
    }

    #[tokio::test]
    async fn set_status_sets_end_time_only_when_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let record = new_record("t");
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();

        registry.set_status(&id, TaskStatus::Running, 2_000).await.unwrap();
        assert_eq!(registry.get(&id).await.unwrap().end_time, None);

        registry.set_status(&id, TaskStatus::Completed, 3_000).await.unwrap();
        assert_eq!(registry.get(&id).await.unwrap().end_time, Some(3_000));
    }

    #[tokio::test]
    async fn set_status_is_a_no_op_once_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let record = new_record("t");
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();

        registry.set_status(&id, TaskStatus::Completed, 1_000).await.unwrap();
        registry.set_status(&id, TaskStatus::Running, 2_000).await.unwrap();

        let after = registry.get(&id).await.unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
        assert_eq!(after.end_time, Some(1_000));
    }

    #[tokio::test]
    async fn cancellation_is_observable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let record = new_record("t");
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();

        assert!(!registry.is_cancelled(&id).await);
        registry.request_cancel(&id).await.unwrap();
        assert!(registry.is_cancelled(&id).await);
    }

    #[tokio::test]
    async fn update_progress_parses_fraction_hint() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let record = new_record("t");
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();

        registry
            .update_progress(&id, "Crawling: Processed ~4 pages, Found 4/10")
            .await
            .unwrap();
        let fetched = registry.get(&id).await.unwrap();
        assert_eq!(fetched.progress_current, Some(4));
        assert_eq!(fetched.progress_total, Some(10));
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_terminal_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();

        let stale = new_record("t");
        let stale_id = stale.task_id.clone();
        registry.register(stale).await.unwrap();
        registry.set_status(&stale_id, TaskStatus::Completed, 1_000).await.unwrap();

        let fresh = new_record("t");
        let fresh_id = fresh.task_id.clone();
        registry.register(fresh).await.unwrap();
        registry.set_status(&fresh_id, TaskStatus::Completed, 9_000).await.unwrap();

        let running = new_record("t");
        let running_id = running.task_id.clone();
        registry.register(running).await.unwrap();
        registry.set_status(&running_id, TaskStatus::Running, 9_000).await.unwrap();

        let removed = registry.cleanup(10_000, 5_000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(registry.get(&stale_id).await.is_none());
        assert!(registry.get(&fresh_id).await.is_some());
        assert!(registry.get(&running_id).await.is_some());
    }

    #[tokio::test]
    async fn mutate_unknown_task_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let err = registry
            .set_status(&TaskId::new("missing"), TaskStatus::Completed, 1)
            .await
            .unwrap_err();
        assert!(err.is_invalid_request());
    }
}
