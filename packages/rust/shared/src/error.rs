//! Error types for the pipeline.
//!
//! Library crates use [`PipelineError`] via `thiserror`. The CLI app wraps
//! this with `color-eyre` for rich diagnostics. The five kinds below map
//! onto the error handling design: invalid request, external transient,
//! external fatal, content empty, cancellation.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed input, missing credential, unknown provider, or a restart
    /// request missing its prior-stage artifact. Never retried.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// Network timeout, provider 5xx, navigation failure, or a failed
    /// try-acquire on a stage lock/limiter. Safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// Authentication failure or a vector-store operation that cannot
    /// succeed no matter how many times it is retried.
    #[error("external fatal error: {0}")]
    ExternalFatal(String),

    /// Zero bytes extracted from a source. Counted at the per-item level;
    /// only becomes a stage failure when every item in the stage fails.
    #[error("content empty: {source}")]
    ContentEmpty { source: String },

    /// The task's cancellation flag was observed.
    #[error("task cancelled: {task_id}")]
    Cancelled { task_id: String },

    /// Structured-data parse failure (JSON details, llms-style artifacts).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn external_fatal(msg: impl Into<String>) -> Self {
        Self::ExternalFatal(msg.into())
    }

    pub fn content_empty(source: impl Into<String>) -> Self {
        Self::ContentEmpty {
            source: source.into(),
        }
    }

    pub fn cancelled(task_id: impl Into<String>) -> Self {
        Self::Cancelled {
            task_id: task_id.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the Retry Helper should attempt this operation again.
    ///
    /// Only `Transient` is retried. Invalid-request and cancellation errors
    /// propagate unchanged; external-fatal and content-empty are classified
    /// but not retried — the former converts the task to `failed`, the
    /// latter is handled at the per-item level by the calling stage.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PipelineError::invalid_request("missing category");
        assert_eq!(err.to_string(), "invalid request: missing category");

        let err = PipelineError::content_empty("https://example.com/page");
        assert!(err.to_string().contains("https://example.com/page"));
    }

    #[test]
    fn retriable_classification() {
        assert!(!PipelineError::invalid_request("bad").is_retriable());
        assert!(!PipelineError::cancelled("t-1").is_retriable());
        assert!(PipelineError::transient("timeout").is_retriable());
        assert!(!PipelineError::external_fatal("auth failed").is_retriable());
    }
}
