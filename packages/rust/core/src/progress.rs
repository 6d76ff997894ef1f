//! Progress Reporter (§4.11): aggregate task state into summary and
//! per-task views for the CLI's `progress` and `tasks get` commands.

use std::collections::HashMap;

use llmsforge_registry::TaskRegistry;
use llmsforge_shared::{PipelineError, Result, TaskDetails, TaskId, TaskStatus};

/// How much of a task's `details` to surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLevel {
    /// A short "stage: original_input" line.
    Simple,
    /// The raw, structured `details` JSON.
    Detailed,
}

/// One running task, as shown in a progress summary.
#[derive(Debug, Clone)]
pub struct RunningTaskView {
    pub task_id: String,
    pub stage: String,
    pub progress_current: Option<u64>,
    pub progress_total: Option<u64>,
    pub details: String,
    pub elapsed_ms: i64,
}

/// Totals by status plus a view of every currently-running task.
#[derive(Debug, Clone)]
pub struct ProgressSummary {
    pub by_status: HashMap<String, usize>,
    pub running: Vec<RunningTaskView>,
}

/// Aggregate every task in the registry (§4.11 "overall progress").
pub async fn summarize(registry: &TaskRegistry, now_ms: i64) -> ProgressSummary {
    let tasks = registry.list().await;
    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut running = Vec::new();

    for task in &tasks {
        *by_status.entry(status_label(task.status).to_string()).or_insert(0) += 1;
        if task.status == TaskStatus::Running {
            running.push(RunningTaskView {
                task_id: task.task_id.0.clone(),
                stage: task.stage.to_string(),
                progress_current: task.progress_current,
                progress_total: task.progress_total,
                details: simplify_details(&task.details),
                elapsed_ms: now_ms - task.start_time,
            });
        }
    }

    ProgressSummary { by_status, running }
}

/// One task's detail view, at the requested [`DetailLevel`].
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task_id: String,
    pub status: String,
    pub stage: String,
    pub progress_current: Option<u64>,
    pub progress_total: Option<u64>,
    pub eta_timestamp: Option<i64>,
    pub details: String,
}

/// Per-task query (§4.11 "task detail"): `Simple` collapses `details` to a
/// short human line, `Detailed` returns it verbatim.
pub async fn task_detail(
    registry: &TaskRegistry,
    task_id: &TaskId,
    detail_level: DetailLevel,
    now_ms: i64,
) -> Result<TaskView> {
    let record = registry
        .get(task_id)
        .await
        .ok_or_else(|| PipelineError::invalid_request(format!("unknown task {task_id}")))?;

    let details = match detail_level {
        DetailLevel::Simple => simplify_details(&record.details),
        DetailLevel::Detailed => record.details.clone(),
    };

    Ok(TaskView {
        task_id: record.task_id.0.clone(),
        status: status_label(record.status).to_string(),
        stage: record.stage.to_string(),
        progress_current: record.progress_current,
        progress_total: record.progress_total,
        eta_timestamp: record.eta_timestamp(now_ms),
        details,
    })
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

/// Collapse a JSON-structured `details` string to `"stage: original_input"`,
/// falling back to the raw string when it isn't a [`TaskDetails`] payload
/// (an in-progress or failed-before-first-stage task).
fn simplify_details(details: &str) -> String {
    match TaskDetails::from_details(details) {
        Some(parsed) => format!("{}: {}", parsed.stage_name(), parsed.original_input()),
        None => details.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmsforge_shared::{DiscoveryStageResult, Stage, TaskRecord};

    #[tokio::test]
    async fn summarize_counts_by_status_and_lists_running() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();

        registry.register(TaskRecord::new(TaskId::new("t"), 0)).await.unwrap();

        let mut running = TaskRecord::new(TaskId::new("t"), 1_000);
        running.status = TaskStatus::Running;
        running.stage = Stage::Fetch;
        running.progress_current = Some(2);
        running.progress_total = Some(10);
        registry.register(running).await.unwrap();

        let summary = summarize(&registry, 5_000).await;
        assert_eq!(summary.by_status.get("queued"), Some(&1));
        assert_eq!(summary.by_status.get("running"), Some(&1));
        assert_eq!(summary.running.len(), 1);
        assert_eq!(summary.running[0].stage, "fetch");
        assert_eq!(summary.running[0].elapsed_ms, 4_000);
    }

    #[tokio::test]
    async fn task_detail_simple_collapses_structured_details() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let record = TaskRecord::new(TaskId::new("t"), 0);
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();

        let details = TaskDetails::Discovery(DiscoveryStageResult {
            sources_file_path: "data/discovery_output/t-1-sources.json".into(),
            category: "notes".into(),
            is_source_local: true,
            original_input: "/tmp/docs".into(),
        });
        registry.set_details(&id, &details).await.unwrap();

        let simple = task_detail(&registry, &id, DetailLevel::Simple, 1_000).await.unwrap();
        assert_eq!(simple.details, "discovery: /tmp/docs");

        let detailed = task_detail(&registry, &id, DetailLevel::Detailed, 1_000).await.unwrap();
        assert!(detailed.details.contains("sources_file_path"));
    }

    #[tokio::test]
    async fn task_detail_unknown_task_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let err = task_detail(&registry, &TaskId::new("missing"), DetailLevel::Simple, 0)
            .await
            .unwrap_err();
        assert!(err.is_invalid_request());
    }
}
