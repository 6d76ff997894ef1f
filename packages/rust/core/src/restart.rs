//! Restart Planner (§4.10): resume a terminal task at a chosen stage.

use std::sync::LazyLock;

use llmsforge_registry::TaskRegistry;
use llmsforge_shared::{PipelineError, Request, Result, StartInput, TaskDetails, TaskId};
use regex::Regex;

/// Which stage a restart should begin at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStage {
    Discovery,
    Fetch,
    Synthesize,
    Embed,
}

/// Fallback recovery of `original_input` out of an unparseable `details`
/// string — covers a task that failed before any `set_details` call ever
/// ran, leaving `details` either empty or holding free text.
static ORIGINAL_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)original_?input["\s:=]+([^\s",}]+)"#).expect("valid regex"));

fn recover_original_input(details: &str) -> Option<String> {
    ORIGINAL_INPUT_RE
        .captures(details)
        .map(|caps| caps[1].to_string())
}

fn category_of(details: &TaskDetails) -> String {
    match details {
        TaskDetails::Discovery(d) => d.category.clone(),
        TaskDetails::Fetch(f) => f.category.clone(),
        TaskDetails::Synthesize(s) => s.category.clone(),
        TaskDetails::Embed(e) => e.category.clone(),
    }
}

/// Build the [`Request`] that resumes `failed_task_id` at `restart_stage`
/// (§4.10). Fails with an invalid-request error naming the earlier stage
/// that must be restarted instead when the prior artifact isn't available.
pub async fn plan_restart(
    registry: &TaskRegistry,
    failed_task_id: &TaskId,
    restart_stage: RestartStage,
) -> Result<Request> {
    let record = registry
        .get(failed_task_id)
        .await
        .ok_or_else(|| PipelineError::invalid_request(format!("unknown task {failed_task_id}")))?;
    let parsed = TaskDetails::from_details(&record.details);

    match restart_stage {
        RestartStage::Discovery => {
            let original_input = parsed
                .as_ref()
                .map(|d| d.original_input().to_string())
                .or_else(|| recover_original_input(&record.details))
                .ok_or_else(|| {
                    PipelineError::invalid_request(
                        "cannot recover original_input to restart at discovery; resubmit manually",
                    )
                })?;
            let category = parsed.as_ref().map(category_of).unwrap_or_default();
            Ok(Request {
                category,
                start: StartInput::TopicOrUrl(original_input),
                crawl_depth: None,
                max_urls: None,
                max_llm_calls: None,
                stop_after_stage: None,
            })
        }
        RestartStage::Fetch => match parsed {
            Some(TaskDetails::Discovery(d)) => Ok(Request {
                category: d.category,
                start: StartInput::DiscoveryOutputFilePath(d.sources_file_path),
                crawl_depth: None,
                max_urls: None,
                max_llm_calls: None,
                stop_after_stage: None,
            }),
            _ => Err(PipelineError::invalid_request(
                "restarting at fetch requires a completed discovery stage; restart at discovery instead",
            )),
        },
        RestartStage::Synthesize => match parsed {
            Some(TaskDetails::Fetch(f)) => Ok(Request {
                category: f.category,
                start: StartInput::FetchOutputDirPath(f.fetch_output_dir_path),
                crawl_depth: None,
                max_urls: None,
                max_llm_calls: None,
                stop_after_stage: None,
            }),
            _ => Err(PipelineError::invalid_request(
                "restarting at synthesize requires a completed fetch stage; restart at fetch instead",
            )),
        },
        RestartStage::Embed => match parsed {
            Some(TaskDetails::Synthesize(s)) => Ok(Request {
                category: s.category,
                start: StartInput::SynthesizedContentFilePath(s.summary_file_path),
                crawl_depth: None,
                max_urls: None,
                max_llm_calls: None,
                stop_after_stage: None,
            }),
            _ => Err(PipelineError::invalid_request(
                "restarting at embed requires a completed synthesize stage; restart at synthesize instead",
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmsforge_shared::{DiscoveryStageResult, FetchStageResult, SynthesizeStageResult, TaskRecord};

    async fn registry_with(details: Option<TaskDetails>) -> (TaskRegistry, TaskId) {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let record = TaskRecord::new(TaskId::new("t"), 0);
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();
        if let Some(details) = details {
            registry.set_details(&id, &details).await.unwrap();
        }
        (registry, id)
    }

    #[tokio::test]
    async fn restart_at_embed_uses_synthesize_result() {
        let (registry, id) = registry_with(Some(TaskDetails::Synthesize(SynthesizeStageResult {
            summary_file_path: "data/synthesize_output/t-1-summary.md".into(),
            category: "notes".into(),
            original_input: "rust async".into(),
        })))
        .await;

        let plan = plan_restart(&registry, &id, RestartStage::Embed).await.unwrap();
        assert_eq!(plan.category, "notes");
        match plan.start {
            StartInput::SynthesizedContentFilePath(p) => assert_eq!(p, "data/synthesize_output/t-1-summary.md"),
            other => panic!("wrong start input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_at_fetch_without_discovery_result_fails() {
        let (registry, id) = registry_with(Some(TaskDetails::Synthesize(SynthesizeStageResult {
            summary_file_path: "x".into(),
            category: "notes".into(),
            original_input: "x".into(),
        })))
        .await;

        let err = plan_restart(&registry, &id, RestartStage::Fetch).await.unwrap_err();
        assert!(err.is_invalid_request());
    }

    #[tokio::test]
    async fn restart_at_discovery_recovers_original_input_via_regex_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let mut record = TaskRecord::new(TaskId::new("t"), 0);
        record.details = "external fatal: original_input=\"https://example.com/docs\" fetch timed out".into();
        let id = record.task_id.clone();
        registry.register(record).await.unwrap();

        let plan = plan_restart(&registry, &id, RestartStage::Discovery).await.unwrap();
        match plan.start {
            StartInput::TopicOrUrl(input) => assert_eq!(input, "https://example.com/docs"),
            other => panic!("wrong start input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_at_discovery_with_no_recoverable_input_fails() {
        let (registry, id) = registry_with(None).await;
        let err = plan_restart(&registry, &id, RestartStage::Discovery).await.unwrap_err();
        assert!(err.is_invalid_request());
    }

    #[tokio::test]
    async fn restart_at_synthesize_uses_fetch_result() {
        let (registry, id) = registry_with(Some(TaskDetails::Fetch(FetchStageResult {
            fetch_output_dir_path: "data/fetch_output/t-1".into(),
            category: "notes".into(),
            original_input: "rust async".into(),
            source_count: 3,
        })))
        .await;

        let plan = plan_restart(&registry, &id, RestartStage::Synthesize).await.unwrap();
        match plan.start {
            StartInput::FetchOutputDirPath(p) => assert_eq!(p, "data/fetch_output/t-1"),
            other => panic!("wrong start input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_at_fetch_uses_discovery_result() {
        let (registry, id) = registry_with(Some(TaskDetails::Discovery(DiscoveryStageResult {
            sources_file_path: "data/discovery_output/t-1-sources.json".into(),
            category: "notes".into(),
            is_source_local: true,
            original_input: "/tmp/docs".into(),
        })))
        .await;

        let plan = plan_restart(&registry, &id, RestartStage::Fetch).await.unwrap();
        match plan.start {
            StartInput::DiscoveryOutputFilePath(p) => assert_eq!(p, "data/discovery_output/t-1-sources.json"),
            other => panic!("wrong start input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_unknown_task_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TaskRegistry::load(dir.path().join("tasks.json")).await.unwrap();
        let err = plan_restart(&registry, &TaskId::new("missing"), RestartStage::Embed)
            .await
            .unwrap_err();
        assert!(err.is_invalid_request());
    }
}
