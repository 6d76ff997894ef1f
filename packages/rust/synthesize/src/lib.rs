//! Synthesize Engine: per-file LLM summarization and guide assembly (§4.6).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llmsforge_governor::{CancellationCheck, Limiter};
use llmsforge_shared::adapters::LlmProvider;
use llmsforge_shared::{PipelineError, ProgressSink, Result};
use tokio::task::JoinSet;
use tracing::{instrument, warn};

/// Content passed to the model is capped at this many characters (§4.6 step 2).
const CONTENT_CEILING_CHARS: usize = 100_000;

pub struct SynthesizeOutcome {
    pub summary_path: PathBuf,
}

fn build_prompt(filename: &str, category: &str, content: &str) -> String {
    let truncated: String = content.chars().take(CONTENT_CEILING_CHARS).collect();
    format!(
        "You are writing a reference guide section for the \"{category}\" category.\n\
Summarize the source file \"{filename}\" as a Markdown section: use clear headings, \
preserve any code blocks verbatim, and add a short FAQ subsection only if the content \
supports one. Exclude navigation chrome, footers, and other boilerplate unrelated to \
the documented subject.\n\n\
--- BEGIN SOURCE ---\n{truncated}\n--- END SOURCE ---\n"
    )
}

fn list_markdown_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("md"))
        .collect();
    files.sort();
    Ok(files)
}

/// Run the Synthesize Engine (§4.6): summarize each Fetch output file under
/// the LLM call limiter, then concatenate the successes into one guide.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(task_id, category))]
pub async fn synthesize(
    data_root: &Path,
    task_id: &str,
    fetch_output_dir: &Path,
    original_input: &str,
    category: &str,
    max_llm_calls: usize,
    provider_name: &str,
    model_name: &str,
    llm: Arc<dyn LlmProvider>,
    llm_limiter: &Limiter,
    progress: &dyn ProgressSink,
    cancellation: &dyn CancellationCheck,
) -> Result<SynthesizeOutcome> {
    let mut files = list_markdown_files(fetch_output_dir)?;
    files.truncate(max_llm_calls.max(1));
    let total = files.len();

    let mut joinset: JoinSet<(String, std::result::Result<String, String>)> = JoinSet::new();
    for path in &files {
        if cancellation.is_cancelled() {
            return Err(PipelineError::cancelled(task_id.to_string()));
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::io(path, e))?;
        let prompt = build_prompt(&filename, category, &content);
        let llm = llm.clone();
        let limiter = llm_limiter.clone();
        let model = model_name.to_string();
        joinset.spawn(async move {
            let _permit = limiter.acquire().await;
            match llm.complete(&model, &prompt).await {
                Ok(summary) => (filename, Ok(summary)),
                Err(err) => (filename, Err(err.to_string())),
            }
        });
    }

    let mut results: Vec<(String, std::result::Result<String, String>)> = Vec::new();
    let mut completed = 0usize;
    while let Some(joined) = joinset.join_next().await {
        match joined {
            Ok(pair) => results.push(pair),
            Err(join_err) => warn!(%join_err, "synthesize task panicked"),
        }
        completed += 1;
        progress
            .report(
                task_id,
                &format!("Synthesize Stage: completed {completed}/{total} files"),
            )
            .await;
    }

    let mut successes: Vec<(String, String)> = results
        .iter()
        .filter_map(|(filename, outcome)| {
            outcome.as_ref().ok().map(|summary| (filename.clone(), summary.clone()))
        })
        .collect();

    if total >= 1 && successes.is_empty() {
        let first_error = results
            .iter()
            .find_map(|(_, outcome)| outcome.as_ref().err().cloned())
            .unwrap_or_else(|| "unknown synthesize error".to_string());
        return Err(PipelineError::external_fatal(first_error));
    }

    successes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut document = format!(
        "# LLMS Full Content for {original_input} (Provider: {provider_name}, Model: {model_name})\n\n"
    );
    for (filename, summary) in &successes {
        document.push_str(&format!("--- Source File: {filename} ---\n\n{summary}\n\n"));
    }

    let summary_path = write_synthesize_artifact(data_root, task_id, &document).await?;
    Ok(SynthesizeOutcome { summary_path })
}

async fn write_synthesize_artifact(data_root: &Path, task_id: &str, document: &str) -> Result<PathBuf> {
    let dir = data_root.join("synthesize_output");
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| PipelineError::io(&dir, e))?;
    let path = dir.join(format!("{task_id}-summary.md"));
    let temp = dir.join(format!(".{task_id}-summary.md.tmp"));
    tokio::fs::write(&temp, document)
        .await
        .map_err(|e| PipelineError::io(&temp, e))?;
    tokio::fs::rename(&temp, &path)
        .await
        .map_err(|e| PipelineError::io(&path, e))?;
    Ok(path)
}
