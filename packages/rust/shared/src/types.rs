//! Domain types: task records, requests, stage artifacts, vector points.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier, `"<prefix>-<uuid>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Uuid::new_v4()))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a [`TaskRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `endTime` is null iff status is `queued` or `running` (§3.1 invariant).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

/// Current pipeline stage label on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Fetch,
    Synthesize,
    Embed,
    Cleanup,
    None,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovery => "discovery",
            Self::Fetch => "fetch",
            Self::Synthesize => "synthesize",
            Self::Embed => "embed",
            Self::Cleanup => "cleanup",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

/// The persisted state of one pipeline invocation (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Free-form string; usually JSON-serialized [`TaskDetails`] (§3.3).
    pub details: String,
    pub stage: Stage,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub progress_current: Option<u64>,
    pub progress_total: Option<u64>,
    /// Set once a cancellation has been requested; observed cooperatively.
    #[serde(default)]
    pub cancelled: bool,
}

impl TaskRecord {
    pub fn new(task_id: TaskId, now_ms: i64) -> Self {
        Self {
            task_id,
            status: TaskStatus::Queued,
            details: String::new(),
            stage: Stage::None,
            start_time: now_ms,
            end_time: None,
            progress_current: None,
            progress_total: None,
            cancelled: false,
        }
    }

    /// Derived ETA per §4.1: only meaningful for a running task with both
    /// progress numerator and denominator known and some elapsed time.
    pub fn eta_timestamp(&self, now_ms: i64) -> Option<i64> {
        if self.status != TaskStatus::Running {
            return None;
        }
        let current = self.progress_current?;
        let total = self.progress_total?;
        if current == 0 || total == 0 {
            return None;
        }
        let elapsed = now_ms - self.start_time;
        if elapsed <= 0 {
            return None;
        }
        let remaining = total.saturating_sub(current);
        let eta_delta = (elapsed as f64 / current as f64) * remaining as f64;
        Some(now_ms + eta_delta.round() as i64)
    }
}

/// Regex used by `updateDetails` to recover a `"X/Y"` progress hint from a
/// free-form progress string (e.g. `"Crawling: ... Found 4/10"`).
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)/(\d+)").expect("valid regex"));

/// Parse the first `\d+/\d+` substring out of a progress string.
pub fn parse_progress_hint(text: &str) -> Option<(u64, u64)> {
    let caps = PROGRESS_RE.captures(text)?;
    let current: u64 = caps[1].parse().ok()?;
    let total: u64 = caps[2].parse().ok()?;
    Some((current, total))
}

/// `stop_after_stage` values recognized on a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAfterStage {
    Discovery,
    Fetch,
    Synthesize,
}

/// The single starting input a [`Request`] must carry exactly one of.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartInput {
    TopicOrUrl(String),
    DiscoveryOutputFilePath(String),
    FetchOutputDirPath(String),
    SynthesizedContentFilePath(String),
}

/// A pipeline submission (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub category: String,
    pub start: StartInput,
    #[serde(default)]
    pub crawl_depth: Option<u32>,
    #[serde(default)]
    pub max_urls: Option<usize>,
    #[serde(default)]
    pub max_llm_calls: Option<usize>,
    #[serde(default)]
    pub stop_after_stage: Option<StopAfterStage>,
}

impl Request {
    pub fn validate(&self) -> crate::Result<()> {
        if self.category.trim().is_empty() {
            return Err(crate::PipelineError::invalid_request(
                "category must be non-empty",
            ));
        }
        Ok(())
    }
}

/// Result payload recorded after the Discovery stage (§3.3/§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryStageResult {
    pub sources_file_path: String,
    pub category: String,
    pub is_source_local: bool,
    pub original_input: String,
}

/// Result payload recorded after the Fetch stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchStageResult {
    pub fetch_output_dir_path: String,
    pub category: String,
    pub original_input: String,
    pub source_count: usize,
}

/// Result payload recorded after the Synthesize stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizeStageResult {
    pub summary_file_path: String,
    pub category: String,
    pub original_input: String,
}

/// Result payload recorded after the Embed stage. Terminal: the Restart
/// Planner never restarts *from* Embed, but this is still what a finished
/// task's `details` holds for progress/detail queries once Cleanup runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedStageResult {
    pub collection: String,
    pub point_count: usize,
    pub category: String,
    pub original_input: String,
}

/// The tagged union written into `TaskRecord.details` after each stage
/// (§3.3, §9 "dynamic JSON payload" re-architecture note). The on-disk form
/// is JSON for human/ops inspection; this type is the in-memory shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "stage", content = "result", rename_all = "lowercase")]
pub enum TaskDetails {
    Discovery(DiscoveryStageResult),
    Fetch(FetchStageResult),
    Synthesize(SynthesizeStageResult),
    Embed(EmbedStageResult),
}

impl TaskDetails {
    /// The `originalInput` recovered for the Restart Planner (§4.10), valid
    /// for every stage variant since each result payload carries it forward.
    pub fn original_input(&self) -> &str {
        match self {
            Self::Discovery(r) => &r.original_input,
            Self::Fetch(r) => &r.original_input,
            Self::Synthesize(r) => &r.original_input,
            Self::Embed(r) => &r.original_input,
        }
    }

    /// The stage name this payload was recorded for, used by simple-detail
    /// progress views (§4.11).
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery",
            Self::Fetch(_) => "fetch",
            Self::Synthesize(_) => "synthesize",
            Self::Embed(_) => "embed",
        }
    }
}

impl TaskDetails {
    /// Serialize to the exact JSON form persisted in `TaskRecord.details`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a `TaskRecord.details` string back into a typed payload.
    /// Parse failures degrade to `None` — per §9, "restart impossible,
    /// report missing prior stage" rather than panicking.
    pub fn from_details(details: &str) -> Option<Self> {
        serde_json::from_str(details).ok()
    }
}

/// Namespace UUID for deterministic vector-store point ids (§3.4, §8 inv. 7).
/// Fixed so that ids are stable across process restarts.
pub const POINT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x14, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// Compute the deterministic point id for a chunk: `uuidv5(ns, source#i)`.
pub fn point_id(source: &str, chunk_index: usize) -> Uuid {
    let name = format!("{source}#{chunk_index}");
    Uuid::new_v5(&POINT_ID_NAMESPACE, name.as_bytes())
}

/// Payload stored alongside a vector-store point (§3.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
    pub category: String,
}

/// A full record consumed by the embed stage upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_terminal_classification() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn parse_progress_hint_extracts_fraction() {
        assert_eq!(
            parse_progress_hint("Crawling: Processed ~4 pages, Found 4/10"),
            Some((4, 10))
        );
        assert_eq!(parse_progress_hint("no numbers here"), None);
    }

    #[test]
    fn eta_requires_running_and_progress() {
        let mut rec = TaskRecord::new(TaskId::new("t"), 1_000);
        assert_eq!(rec.eta_timestamp(2_000), None);

        rec.status = TaskStatus::Running;
        assert_eq!(rec.eta_timestamp(2_000), None);

        rec.progress_current = Some(2);
        rec.progress_total = Some(10);
        // elapsed = 1000ms, rate = 500ms/item, remaining = 8 items -> +4000ms
        assert_eq!(rec.eta_timestamp(2_000), Some(6_000));
    }

    #[test]
    fn point_id_is_deterministic() {
        let a = point_id("https://example.com/page", 3);
        let b = point_id("https://example.com/page", 3);
        let c = point_id("https://example.com/page", 4);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn task_details_round_trips_through_json() {
        let details = TaskDetails::Fetch(FetchStageResult {
            fetch_output_dir_path: "data/fetch_output/t-1".into(),
            category: "notes".into(),
            original_input: "/tmp/docs".into(),
            source_count: 2,
        });
        let json = details.to_json();
        let parsed = TaskDetails::from_details(&json).expect("parses");
        match parsed {
            TaskDetails::Fetch(r) => assert_eq!(r.source_count, 2),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn task_details_from_garbage_is_none() {
        assert!(TaskDetails::from_details("not json").is_none());
    }

    #[test]
    fn request_requires_nonempty_category() {
        let req = Request {
            category: "  ".into(),
            start: StartInput::TopicOrUrl("rust".into()),
            crawl_depth: None,
            max_urls: None,
            max_llm_calls: None,
            stop_after_stage: None,
        };
        assert!(req.validate().is_err());
    }
}
