//! Per-source plain-text extraction (§4.5 step 3).

use std::path::{Path, PathBuf};
use std::time::Duration;

use llmsforge_discovery::is_ssrf_target;
use llmsforge_shared::adapters::BrowserPageProvider;
use llmsforge_shared::{PipelineError, Result};
use scraper::{Html, Selector};
use url::Url;

pub const FETCH_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// What a source string resolved to before extraction.
enum SourceKind {
    LocalFile(PathBuf),
    Web(Url),
}

fn classify_source(source: &str) -> SourceKind {
    if let Ok(url) = Url::parse(source) {
        if url.scheme() == "http" || url.scheme() == "https" {
            return SourceKind::Web(url);
        }
    }
    SourceKind::LocalFile(PathBuf::from(source))
}

/// Extract plain text from one source (§4.5 step 3). Empty results are
/// reported as [`PipelineError::ContentEmpty`], never written.
pub async fn extract_text(source: &str, browser: &dyn BrowserPageProvider) -> Result<String> {
    let text = match classify_source(source) {
        SourceKind::Web(url) => extract_web(&url, browser).await?,
        SourceKind::LocalFile(path) => extract_local(&path).await?,
    };
    if text.trim().is_empty() {
        return Err(PipelineError::content_empty(source.to_string()));
    }
    Ok(text)
}

async fn extract_web(url: &Url, browser: &dyn BrowserPageProvider) -> Result<String> {
    if is_ssrf_target(url, false) {
        return Err(PipelineError::invalid_request(format!(
            "refusing to fetch unsafe URL: {url}"
        )));
    }
    let page = browser.load(url.as_str(), FETCH_NAVIGATION_TIMEOUT).await?;
    Ok(html_to_collapsed_text(&page.html))
}

async fn extract_local(path: &Path) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "md" => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| PipelineError::io(path, e))?;
            Ok(markdown_to_text(&raw))
        }
        "docx" => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| PipelineError::io(path, e))?;
            extract_docx_text(&bytes)
        }
        _ => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e)),
    }
}

/// Render Markdown to HTML, then strip to text, per §4.5's local `.md` rule.
fn markdown_to_text(markdown: &str) -> String {
    use pulldown_cmark::{Options, Parser, html};

    let parser = Parser::new_ext(markdown, Options::all());
    let mut rendered = String::new();
    html::push_html(&mut rendered, parser);
    html_to_collapsed_text(&rendered)
}

/// Strip a parsed HTML document to its body text, collapsing consecutive
/// whitespace to a single space and trimming (§4.5 step 3, web branch).
fn html_to_collapsed_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let body_selector = Selector::parse("body").expect("valid selector");
    let text: String = match doc.select(&body_selector).next() {
        Some(body) => body.text().collect::<Vec<_>>().join(" "),
        None => doc.root_element().text().collect::<Vec<_>>().join(" "),
    };
    collapse_whitespace(&text)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the concatenated paragraph text out of a `.docx` file.
fn extract_docx_text(bytes: &[u8]) -> Result<String> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild, read_docx};

    let docx = read_docx(bytes)
        .map_err(|e| PipelineError::parse(format!("failed to parse docx: {e:?}")))?;

    let mut out = String::new();
    for child in &docx.document.children {
        if let DocumentChild::Paragraph(paragraph) = child {
            for pc in &paragraph.children {
                if let ParagraphChild::Run(run) = pc {
                    for rc in &run.children {
                        if let RunChild::Text(t) = rc {
                            out.push_str(&t.text);
                        }
                    }
                }
            }
            out.push('\n');
        }
    }
    Ok(out)
}
