//! Same-origin BFS crawler (§4.4.1).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use llmsforge_governor::{CancellationCheck, Limiter};
use llmsforge_shared::adapters::BrowserPageProvider;
use llmsforge_shared::{PipelineError, ProgressSink, Result};
use regex::Regex;
use scraper::{Html, Selector};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::ssrf::is_ssrf_target;

pub const CRAWL_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one BFS crawl run.
pub struct CrawlerConfig {
    pub max_depth: u32,
    pub max_urls: usize,
    /// Test knob permitting loopback/private targets (§4.4.1 SSRF hardening).
    pub allow_localhost: bool,
    pub ignore_keywords: Vec<String>,
    pub ignore_extensions: Vec<String>,
    pub doc_keywords: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_urls: 100,
            allow_localhost: false,
            ignore_keywords: default_ignore_keywords(),
            ignore_extensions: default_ignore_extensions(),
            doc_keywords: default_doc_keywords(),
        }
    }
}

fn default_ignore_keywords() -> Vec<String> {
    [
        "marketing", "legal", "blog", "login", "signup", "pricing", "careers", "privacy",
        "terms", "cookie",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_ignore_extensions() -> Vec<String> {
    [
        "zip", "tar", "gz", "rar", "7z", "exe", "dmg", "msi", "png", "jpg", "jpeg", "gif", "svg",
        "ico", "mp4", "mp3", "wav", "pdf", "rs", "py", "js", "css", "woff", "woff2", "ttf",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_doc_keywords() -> Vec<String> {
    ["/docs/", "/doc/", "/guide/", "/guides/", "/reference/", "/api/", "/documentation/"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Matches a non-English, non-`en-XX` two-letter locale prefix segment.
static LOCALE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/(?:(?!en(?:-[a-z]{2})?/)[a-z]{2}(?:-[a-z]{2})?)/").expect("valid regex"));

fn is_non_english_locale(path_lower: &str) -> bool {
    LOCALE_RE.is_match(path_lower)
}

fn should_skip(url: &Url, config: &CrawlerConfig) -> bool {
    let path_lower = url.path().to_lowercase();
    if config.ignore_keywords.iter().any(|k| path_lower.contains(k.as_str())) {
        return true;
    }
    if config
        .ignore_extensions
        .iter()
        .any(|ext| path_lower.ends_with(&format!(".{ext}")))
    {
        return true;
    }
    if is_non_english_locale(&path_lower) {
        return true;
    }
    false
}

fn is_accepted_at_depth(url: &Url, depth: u32, config: &CrawlerConfig) -> bool {
    let path_lower = url.path().to_lowercase();
    if config.doc_keywords.iter().any(|k| path_lower.contains(k.as_str())) {
        return true;
    }
    depth < config.max_depth
}

/// Resolve `href` against `base`, keeping only same-origin `http(s)` links
/// with fragments stripped; drops fragment-only and non-navigable links.
fn normalize_link(base: &Url, href: &str) -> Option<Url> {
    let trimmed = href.trim();
    if trimmed.is_empty() || trimmed == "#" || trimmed.starts_with('#') {
        return None;
    }
    if trimmed.starts_with("javascript:") || trimmed.starts_with("mailto:") || trimmed.starts_with("tel:") {
        return None;
    }
    let mut resolved = base.join(trimmed).ok()?;
    resolved.set_fragment(None);
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    if resolved.host_str() != base.host_str() {
        return None;
    }
    Some(resolved)
}

fn extract_links(doc: &Html, base: &Url) -> Vec<Url> {
    let selector = Selector::parse("a[href]").expect("valid selector");
    doc.select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| normalize_link(base, href))
        .collect()
}

/// Run the BFS crawl from `start`, returning a sorted, deduplicated list of
/// discovered same-origin URLs (never more than `config.max_urls`).
#[instrument(skip_all, fields(start = %start, max_depth = config.max_depth, max_urls = config.max_urls))]
pub async fn crawl_same_origin(
    start: Url,
    config: &CrawlerConfig,
    browser: Arc<dyn BrowserPageProvider>,
    page_limiter: &Limiter,
    progress: &dyn ProgressSink,
    task_id: &str,
    cancellation: &dyn CancellationCheck,
) -> Result<Vec<String>> {
    let mut found: HashSet<String> = HashSet::new();
    found.insert(start.to_string());
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());
    let mut current_level: Vec<(Url, u32)> = vec![(start, 0)];
    let mut processed: usize = 0;

    while !current_level.is_empty() && found.len() < config.max_urls {
        if cancellation.is_cancelled() {
            return Err(PipelineError::cancelled(task_id.to_string()));
        }

        let mut joinset: JoinSet<(Url, Option<Vec<Url>>)> = JoinSet::new();
        for (url, _depth) in current_level.drain(..) {
            if is_ssrf_target(&url, config.allow_localhost) {
                warn!(%url, "SSRF guard blocked candidate URL");
                continue;
            }
            let browser = browser.clone();
            let limiter = page_limiter.clone();
            joinset.spawn(async move {
                let _permit = limiter.acquire().await;
                match browser.load(url.as_str(), CRAWL_NAVIGATION_TIMEOUT).await {
                    Ok(content) => {
                        let doc = Html::parse_document(&content.html);
                        let final_url =
                            Url::parse(&content.final_url).unwrap_or_else(|_| url.clone());
                        (url, Some(extract_links(&doc, &final_url)))
                    }
                    Err(err) => {
                        debug!(%url, %err, "page fetch failed, skipping");
                        (url, None)
                    }
                }
            });
        }

        let mut next_level: Vec<(Url, u32)> = Vec::new();
        let depth_by_url: std::collections::HashMap<String, u32> = current_level
            .iter()
            .map(|(u, d)| (u.to_string(), *d))
            .collect();

        while let Some(joined) = joinset.join_next().await {
            let (url, links) = match joined {
                Ok(v) => v,
                Err(join_err) => {
                    warn!(%join_err, "crawl task panicked");
                    continue;
                }
            };
            processed += 1;
            let depth = depth_by_url.get(&url.to_string()).copied().unwrap_or(0);
            let Some(links) = links else { continue };

            for link in links {
                if found.len() >= config.max_urls {
                    break;
                }
                let key = link.to_string();
                if visited.contains(&key) {
                    continue;
                }
                visited.insert(key.clone());
                if should_skip(&link, config) {
                    continue;
                }
                let next_depth = depth + 1;
                if !is_accepted_at_depth(&link, next_depth, config) {
                    continue;
                }
                found.insert(key);
                next_level.push((link, next_depth));
            }
        }

        progress
            .report(
                task_id,
                &format!(
                    "Crawling: Processed ~{processed} pages, Found {}/{}",
                    found.len(),
                    config.max_urls
                ),
            )
            .await;

        current_level = next_level;
    }

    let mut urls: Vec<String> = found.into_iter().collect();
    urls.sort();
    urls.truncate(config.max_urls);
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_link_drops_fragment_only() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        assert!(normalize_link(&base, "#section").is_none());
        assert!(normalize_link(&base, "#").is_none());
    }

    #[test]
    fn normalize_link_strips_fragment_and_resolves_relative() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let resolved = normalize_link(&base, "../reference#anchor").unwrap();
        assert_eq!(resolved.fragment(), None);
        assert_eq!(resolved.host_str(), Some("docs.example.com"));
    }

    #[test]
    fn normalize_link_rejects_cross_origin() {
        let base = Url::parse("https://docs.example.com/").unwrap();
        assert!(normalize_link(&base, "https://other.example.com/page").is_none());
    }

    #[test]
    fn normalize_link_rejects_non_navigable_schemes() {
        let base = Url::parse("https://docs.example.com/").unwrap();
        assert!(normalize_link(&base, "javascript:void(0)").is_none());
        assert!(normalize_link(&base, "mailto:a@b.com").is_none());
    }

    #[test]
    fn should_skip_matches_ignore_keyword() {
        let config = CrawlerConfig::default();
        let url = Url::parse("https://docs.example.com/blog/2024/post").unwrap();
        assert!(should_skip(&url, &config));
    }

    #[test]
    fn should_skip_matches_ignore_extension() {
        let config = CrawlerConfig::default();
        let url = Url::parse("https://docs.example.com/assets/logo.png").unwrap();
        assert!(should_skip(&url, &config));
    }

    #[test]
    fn should_skip_matches_non_english_locale() {
        let config = CrawlerConfig::default();
        let fr = Url::parse("https://docs.example.com/fr/guide").unwrap();
        assert!(should_skip(&fr, &config));
        let en = Url::parse("https://docs.example.com/en/guide").unwrap();
        assert!(!should_skip(&en, &config));
        let en_us = Url::parse("https://docs.example.com/en-us/guide").unwrap();
        assert!(!should_skip(&en_us, &config));
    }

    #[test]
    fn accepted_at_depth_when_doc_keyword_matches_regardless_of_depth() {
        let config = CrawlerConfig::default();
        let url = Url::parse("https://docs.example.com/docs/deep/page").unwrap();
        assert!(is_accepted_at_depth(&url, 99, &config));
    }

    #[test]
    fn accepted_at_depth_falls_back_to_depth_budget() {
        let config = CrawlerConfig {
            max_depth: 2,
            ..Default::default()
        };
        let url = Url::parse("https://docs.example.com/misc/page").unwrap();
        assert!(is_accepted_at_depth(&url, 1, &config));
        assert!(!is_accepted_at_depth(&url, 2, &config));
    }
}
