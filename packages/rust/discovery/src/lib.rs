//! Discovery Engine: normalize an input to a start point, then crawl or
//! enumerate it into a source list (§4.4).

mod crawler;
mod local;
mod ssrf;

pub use crawler::{CrawlerConfig, crawl_same_origin};
pub use local::{NormalizedStart, enumerate_local, normalize};
pub use ssrf::is_ssrf_target;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llmsforge_governor::{CancellationCheck, Limiter};
use llmsforge_shared::adapters::{BrowserPageProvider, WebSearchProvider};
use llmsforge_shared::{PipelineError, ProgressSink, Result};

/// What the Discovery stage produced, before it is folded into a
/// [`llmsforge_shared::types::DiscoveryStageResult`] by the orchestrator.
pub struct DiscoveryOutcome {
    pub sources: Vec<String>,
    pub is_source_local: bool,
}

/// Run the full Discovery Engine algorithm (§4.4): normalize, then crawl or
/// enumerate depending on what the input resolved to.
#[allow(clippy::too_many_arguments)]
pub async fn discover(
    task_id: &str,
    topic_or_url: &str,
    crawl_depth: u32,
    max_urls: usize,
    web_search: &dyn WebSearchProvider,
    browser: Arc<dyn BrowserPageProvider>,
    page_limiter: &Limiter,
    progress: &dyn ProgressSink,
    cancellation: &dyn CancellationCheck,
) -> Result<DiscoveryOutcome> {
    match normalize(topic_or_url, web_search).await? {
        NormalizedStart::Local(path) => {
            let sources = enumerate_local(&path, max_urls.max(1))?;
            Ok(DiscoveryOutcome {
                sources,
                is_source_local: true,
            })
        }
        NormalizedStart::Web(url) => {
            let config = CrawlerConfig {
                max_depth: crawl_depth.max(1),
                max_urls: max_urls.max(1),
                ..CrawlerConfig::default()
            };
            let sources = crawl_same_origin(
                url,
                &config,
                browser,
                page_limiter,
                progress,
                task_id,
                cancellation,
            )
            .await?;
            Ok(DiscoveryOutcome {
                sources,
                is_source_local: false,
            })
        }
    }
}

/// Write the Discovery artifact (`data/discovery_output/<taskId>-sources.json`)
/// atomically, returning its path.
pub async fn write_discovery_artifact(
    data_root: &Path,
    task_id: &str,
    sources: &[String],
) -> Result<PathBuf> {
    let dir = data_root.join("discovery_output");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| PipelineError::io(&dir, e))?;

    let path = dir.join(format!("{task_id}-sources.json"));
    let temp = dir.join(format!(".{task_id}-sources.json.tmp"));
    let json = serde_json::to_string_pretty(sources)
        .map_err(|e| PipelineError::parse(format!("failed to serialize sources: {e}")))?;
    tokio::fs::write(&temp, &json)
        .await
        .map_err(|e| PipelineError::io(&temp, e))?;
    tokio::fs::rename(&temp, &path)
        .await
        .map_err(|e| PipelineError::io(&path, e))?;
    Ok(path)
}

/// Read a Discovery artifact back into its source list, used by the Fetch
/// Engine and by restarts that start from `discovery_output_file_path`.
pub async fn read_discovery_artifact(path: &Path) -> Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_str(&contents)
        .map_err(|e| PipelineError::parse(format!("discovery artifact is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_artifact_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec!["https://example.com/a".to_string(), "https://example.com/b".to_string()];
        let path = write_discovery_artifact(dir.path(), "t-1", &sources).await.unwrap();
        let read_back = read_discovery_artifact(&path).await.unwrap();
        assert_eq!(read_back, sources);
    }

    #[tokio::test]
    async fn read_discovery_artifact_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        let err = read_discovery_artifact(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }
}
