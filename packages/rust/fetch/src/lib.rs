//! Fetch Engine: turn a Discovery source list into plain-text files (§4.5).

mod extract;

pub use extract::{FETCH_NAVIGATION_TIMEOUT, extract_text};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llmsforge_governor::{CancellationCheck, Limiter};
use llmsforge_shared::adapters::BrowserPageProvider;
use llmsforge_shared::{PipelineError, ProgressSink, Result};
use sha2::{Digest, Sha256};
use tracing::{instrument, warn};

const PROGRESS_EVERY: usize = 5;

/// Outcome of one Fetch stage run.
pub struct FetchOutcome {
    pub fetch_output_dir: PathBuf,
    pub source_count: usize,
}

/// Deterministically turn a source identifier into a filename-safe form.
/// A short content hash suffix guards against two different sources
/// sanitizing to the same stem (§4.5 "filename sanitization").
pub fn sanitize_filename(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let short_hash = &hash[..8];

    let mut stem: String = source
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    while stem.contains("--") {
        stem = stem.replace("--", "-");
    }
    let stem = stem.trim_matches('-');
    let stem = if stem.is_empty() { "source" } else { stem };
    let mut stem = stem.to_string();
    stem.truncate(80);
    format!("{stem}-{short_hash}.md")
}

/// Run the Fetch Engine over `sources` (already truncated to `max_urls` by
/// the caller), writing one text file per successfully extracted source
/// under `<data_root>/fetch_output/<task_id>/` (§4.5).
#[instrument(skip_all, fields(task_id, source_count = sources.len()))]
pub async fn fetch_sources(
    data_root: &Path,
    task_id: &str,
    sources: &[String],
    browser: Arc<dyn BrowserPageProvider>,
    page_limiter: &Limiter,
    progress: &dyn ProgressSink,
    cancellation: &dyn CancellationCheck,
) -> Result<FetchOutcome> {
    let output_dir = data_root.join("fetch_output").join(task_id);
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|e| PipelineError::io(&output_dir, e))?;

    let mut successes = 0usize;
    let total = sources.len();

    for (index, source) in sources.iter().enumerate() {
        if cancellation.is_cancelled() {
            return Err(PipelineError::cancelled(task_id.to_string()));
        }

        let permit = page_limiter.acquire().await;
        let result = extract_text(source, browser.as_ref()).await;
        drop(permit);

        match result {
            Ok(text) => {
                let filename = sanitize_filename(source);
                let path = output_dir.join(&filename);
                tokio::fs::write(&path, &text)
                    .await
                    .map_err(|e| PipelineError::io(&path, e))?;
                successes += 1;
            }
            Err(err) => {
                warn!(source, %err, "fetch: source extraction failed, skipping");
            }
        }

        if (index + 1) % PROGRESS_EVERY == 0 || index + 1 == total {
            progress
                .report(
                    task_id,
                    &format!("Fetch Stage: Processing {}/{}: {}", index + 1, total, source),
                )
                .await;
        }
    }

    if total > 0 && successes == 0 {
        return Err(PipelineError::external_fatal(
            "fetch stage: every source failed extraction",
        ));
    }

    Ok(FetchOutcome {
        fetch_output_dir: output_dir,
        source_count: successes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmsforge_shared::SilentProgress;
    use llmsforge_shared::adapters::PageContent;
    use std::time::Duration;

    struct NoBrowser;
    #[async_trait]
    impl BrowserPageProvider for NoBrowser {
        async fn load(&self, _url: &str, _timeout: Duration) -> Result<PageContent> {
            unreachable!("no web sources in these tests")
        }
    }

    struct NeverCancelled;
    impl CancellationCheck for NeverCancelled {
        fn is_cancelled(&self) -> bool {
            false
        }
    }

    #[test]
    fn sanitize_filename_is_deterministic_and_safe() {
        let a = sanitize_filename("https://example.com/guide/intro?x=1");
        let b = sanitize_filename("https://example.com/guide/intro?x=1");
        assert_eq!(a, b);
        assert!(a.ends_with(".md"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'));
    }

    #[test]
    fn sanitize_filename_differs_for_different_sources() {
        let a = sanitize_filename("https://example.com/a");
        let b = sanitize_filename("https://example.com/b");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn fetch_sources_writes_one_file_per_success() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("src");
        tokio::fs::create_dir_all(&src_dir).await.unwrap();
        let file_a = src_dir.join("a.txt");
        let file_b = src_dir.join("b.txt");
        tokio::fs::write(&file_a, "hello a").await.unwrap();
        tokio::fs::write(&file_b, "hello b").await.unwrap();

        let sources = vec![
            file_a.to_string_lossy().into_owned(),
            file_b.to_string_lossy().into_owned(),
        ];

        let limiter = Limiter::new(2);
        let outcome = fetch_sources(
            dir.path(),
            "t-1",
            &sources,
            Arc::new(NoBrowser),
            &limiter,
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap();

        assert_eq!(outcome.source_count, 2);
        let entries: Vec<_> = std::fs::read_dir(&outcome.fetch_output_dir)
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn fetch_sources_fails_when_all_sources_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        let sources = vec![missing.to_string_lossy().into_owned()];

        let limiter = Limiter::new(1);
        let err = fetch_sources(
            dir.path(),
            "t-1",
            &sources,
            Arc::new(NoBrowser),
            &limiter,
            &SilentProgress,
            &NeverCancelled,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::ExternalFatal(_)));
    }

    #[tokio::test]
    async fn fetch_sources_observes_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec!["x".to_string()];
        let limiter = Limiter::new(1);

        struct AlwaysCancelled;
        impl CancellationCheck for AlwaysCancelled {
            fn is_cancelled(&self) -> bool {
                true
            }
        }

        let err = fetch_sources(
            dir.path(),
            "t-1",
            &sources,
            Arc::new(NoBrowser),
            &limiter,
            &SilentProgress,
            &AlwaysCancelled,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancellation());
    }
}
