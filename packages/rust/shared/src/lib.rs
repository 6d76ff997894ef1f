//! Shared types, error model, configuration, and adapter traits.
//!
//! This crate is the foundation depended on by every other pipeline crate.
//! It provides:
//! - [`PipelineError`] — the unified error type
//! - Domain types ([`TaskRecord`], [`Request`], [`TaskDetails`], [`VectorPoint`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)
//! - External adapter traits (§6.4): [`adapters::WebSearchProvider`],
//!   [`adapters::BrowserPageProvider`], [`adapters::LlmProvider`],
//!   [`adapters::EmbeddingProvider`], [`adapters::VectorStoreProvider`]

pub mod adapters;
pub mod config;
pub mod error;
pub mod types;

pub use adapters::{ProgressSink, SilentProgress};
pub use config::{
    AppConfig, EmbeddingProviderKind, PipelineConfig, PipelineLlmProvider, ResolvedTunables,
    config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_required_settings,
};
pub use error::{PipelineError, Result};
pub use types::{
    DiscoveryStageResult, EmbedStageResult, FetchStageResult, PointPayload, Request, Stage,
    StartInput, StopAfterStage, SynthesizeStageResult, TaskDetails, TaskId, TaskRecord,
    TaskStatus, VectorPoint, parse_progress_hint, point_id,
};

/// Current epoch milliseconds, used wherever the spec says `now`.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
