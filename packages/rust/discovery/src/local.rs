//! Local filesystem source enumeration and input normalization (§4.4 step 1-2).

use std::path::{Path, PathBuf};

use llmsforge_shared::adapters::WebSearchProvider;
use llmsforge_shared::{PipelineError, Result};
use url::Url;

const LOCAL_EXTENSIONS: [&str; 3] = ["md", "txt", "docx"];

/// The normalized form of a discovery input, before any crawling happens.
pub enum NormalizedStart {
    Web(Url),
    Local(PathBuf),
}

/// Normalize `topic_or_url` per §4.4 step 1-2: URL, then filesystem path,
/// then a web-search fallback over `"<topic> documentation main page"`.
pub async fn normalize(
    topic_or_url: &str,
    web_search: &dyn WebSearchProvider,
) -> Result<NormalizedStart> {
    if let Ok(url) = Url::parse(topic_or_url) {
        if !url.scheme().is_empty() {
            return Ok(NormalizedStart::Web(url));
        }
    }

    let path = Path::new(topic_or_url);
    if path.exists() {
        return Ok(NormalizedStart::Local(path.to_path_buf()));
    }

    let query = format!("{topic_or_url} documentation main page");
    let hits = web_search.search(&query, 3).await?;
    let chosen = pick_best_hit(&hits).ok_or_else(|| {
        PipelineError::invalid_request(format!(
            "no web-search result found for topic '{topic_or_url}'"
        ))
    })?;
    let url = Url::parse(chosen).map_err(|e| {
        PipelineError::invalid_request(format!("web-search result is not a valid URL: {e}"))
    })?;
    Ok(NormalizedStart::Web(url))
}

/// Pick the `/docs`-matching shortest URL, else the shortest URL overall.
fn pick_best_hit(hits: &[llmsforge_shared::adapters::SearchHit]) -> Option<&str> {
    let docs_matches: Vec<&str> = hits
        .iter()
        .map(|h| h.url.as_str())
        .filter(|url| url.contains("/docs"))
        .collect();
    if !docs_matches.is_empty() {
        return docs_matches.into_iter().min_by_key(|u| u.len());
    }
    hits.iter().map(|h| h.url.as_str()).min_by_key(|u| u.len())
}

/// Enumerate local sources per §4.4: a directory is walked recursively for
/// `{.md, .txt, .docx}` files (truncated to `max_urls`); a file yields just
/// itself.
pub fn enumerate_local(path: &Path, max_urls: usize) -> Result<Vec<String>> {
    if path.is_file() {
        return Ok(vec![path.to_string_lossy().into_owned()]);
    }
    if !path.is_dir() {
        return Err(PipelineError::invalid_request(format!(
            "local source path does not exist: {}",
            path.display()
        )));
    }

    let mut out = Vec::new();
    walk_dir(path, &mut out)?;
    out.sort();
    out.truncate(max_urls);
    Ok(out)
}

fn walk_dir(dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, out)?;
            continue;
        }
        let has_match = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| LOCAL_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);
        if has_match {
            out.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(())
}
