//! Application configuration for the pipeline.
//!
//! User config lives at `~/.llmsforge/llmsforge.toml`. Environment variables
//! (§6.1) override config-file values, which override built-in defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

const CONFIG_FILE_NAME: &str = "llmsforge.toml";
const CONFIG_DIR_NAME: &str = ".llmsforge";

// ---------------------------------------------------------------------------
// Provider selectors
// ---------------------------------------------------------------------------

/// `PIPELINE_LLM_PROVIDER` (§6.1) — the Synthesize stage's summarization
/// provider. An unrecognized value is an invalid-request failure, never
/// silently defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineLlmProvider {
    Gemini,
    Ollama,
    Openrouter,
    Chutes,
}

impl FromStr for PipelineLlmProvider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "openrouter" => Ok(Self::Openrouter),
            "chutes" => Ok(Self::Chutes),
            other => Err(PipelineError::invalid_request(format!(
                "unknown PIPELINE_LLM_PROVIDER '{other}': expected gemini, ollama, openrouter, or chutes"
            ))),
        }
    }
}

/// `EMBEDDING_PROVIDER` (§6.1, §4.7.1) — also determines the provider's
/// fixed embedding dimension used for collection initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Openai,
    Ollama,
    Google,
}

impl FromStr for EmbeddingProviderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "ollama" => Ok(Self::Ollama),
            "google" => Ok(Self::Google),
            other => Err(PipelineError::invalid_request(format!(
                "unknown EMBEDDING_PROVIDER '{other}': expected openai, ollama, or google"
            ))),
        }
    }
}

impl EmbeddingProviderKind {
    /// Provider-specific dimension lookup (§4.7.1). `model` distinguishes
    /// OpenAI's small/large embedding models; other providers have one
    /// fixed dimension regardless of model name.
    pub fn dimension(self, model: &str) -> usize {
        match self {
            Self::Openai => {
                if model.contains("large") {
                    3072
                } else {
                    1536
                }
            }
            Self::Ollama => 768,
            Self::Google => 768,
        }
    }
}

// ---------------------------------------------------------------------------
// Config structs (matching llmsforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tunables: TunablesConfig,
    #[serde(default)]
    pub pipeline_llm: PipelineLlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub providers: ProviderCredentials,
}

/// `[paths]` section — ambient filesystem layout (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_root")]
    pub data_root: String,
    #[serde(default = "default_task_store_path")]
    pub task_store_path: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            task_store_path: default_task_store_path(),
        }
    }
}

fn default_data_root() -> String {
    "data".into()
}
fn default_task_store_path() -> String {
    ".task_store.json".into()
}

/// `[tunables]` section (§6.1): browser pool size, LLM concurrency, Qdrant
/// batch size. Raw values are clamped by [`TunablesConfig::resolve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunablesConfig {
    #[serde(default = "default_browser_pool_size")]
    pub browser_pool_size: i64,
    #[serde(default = "default_llm_concurrency")]
    pub llm_concurrency: i64,
    #[serde(default = "default_qdrant_batch_size")]
    pub qdrant_batch_size: i64,
}

impl Default for TunablesConfig {
    fn default() -> Self {
        Self {
            browser_pool_size: default_browser_pool_size(),
            llm_concurrency: default_llm_concurrency(),
            qdrant_batch_size: default_qdrant_batch_size(),
        }
    }
}

fn default_browser_pool_size() -> i64 {
    5
}
fn default_llm_concurrency() -> i64 {
    3
}
fn default_qdrant_batch_size() -> i64 {
    100
}

impl TunablesConfig {
    /// Coerce into `[1, 50]`, `[1, ∞)`, `[1, ∞)` respectively (§4.2).
    pub fn resolve(&self) -> ResolvedTunables {
        ResolvedTunables {
            browser_pool_size: self.browser_pool_size.clamp(1, 50) as usize,
            llm_concurrency: self.llm_concurrency.max(1) as usize,
            qdrant_batch_size: self.qdrant_batch_size.max(1) as usize,
        }
    }
}

/// Clamped, runtime-ready tunables.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTunables {
    pub browser_pool_size: usize,
    pub llm_concurrency: usize,
    pub qdrant_batch_size: usize,
}

/// `[pipeline_llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLlmConfig {
    #[serde(default = "default_pipeline_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for PipelineLlmConfig {
    fn default() -> Self {
        Self {
            provider: default_pipeline_llm_provider(),
            model: None,
        }
    }
}

fn default_pipeline_llm_provider() -> String {
    "gemini".into()
}

/// `[embedding]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// `[vector_store]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// `[providers]` section — per-provider credentials (§6.1). Values here are
/// names of environment variables to read, never secrets embedded in the
/// config file itself, matching the teacher's `api_key_env` indirection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default = "default_openai_key_env")]
    pub openai_api_key_env: String,
    pub openai_base_url: Option<String>,
    pub ollama_base_url: Option<String>,
    pub ollama_model: Option<String>,
    #[serde(default = "default_google_key_env")]
    pub google_api_key_env: String,
    pub google_fallback_model: Option<String>,
    #[serde(default = "default_web_search_key_env")]
    pub web_search_api_key_env: String,
}

impl Default for ProviderCredentials {
    fn default() -> Self {
        Self {
            openai_api_key_env: default_openai_key_env(),
            openai_base_url: None,
            ollama_base_url: None,
            ollama_model: None,
            google_api_key_env: default_google_key_env(),
            google_fallback_model: None,
            web_search_api_key_env: default_web_search_key_env(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_google_key_env() -> String {
    "GOOGLE_API_KEY".into()
}
fn default_web_search_key_env() -> String {
    "WEB_SEARCH_API_KEY".into()
}

// ---------------------------------------------------------------------------
// Runtime pipeline config (merged from AppConfig + environment)
// ---------------------------------------------------------------------------

/// Runtime configuration consumed by the orchestrator — merged from the
/// config file and environment overrides, the way the teacher's
/// `CrawlConfig` is derived from `AppConfig` via `From`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    pub task_store_path: PathBuf,
    pub tunables: ResolvedTunables,
    pub pipeline_llm_provider: PipelineLlmProvider,
    pub pipeline_llm_model: Option<String>,
}

impl TryFrom<&AppConfig> for PipelineConfig {
    type Error = PipelineError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let provider_str = std::env::var("PIPELINE_LLM_PROVIDER")
            .unwrap_or_else(|_| config.pipeline_llm.provider.clone());
        let pipeline_llm_provider = PipelineLlmProvider::from_str(&provider_str)?;

        Ok(Self {
            data_root: PathBuf::from(&config.paths.data_root),
            task_store_path: PathBuf::from(&config.paths.task_store_path),
            tunables: config.tunables.resolve(),
            pipeline_llm_provider,
            pipeline_llm_model: std::env::var("PIPELINE_LLM_MODEL")
                .ok()
                .or_else(|| config.pipeline_llm.model.clone()),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| PipelineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if absent.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    toml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PipelineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PipelineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Validate that the vector store and embedding provider are configured,
/// and that the selected embedding provider's credential is present.
/// Missing credentials are an invalid-request failure (§7), surfaced
/// immediately rather than discovered mid-pipeline.
pub fn validate_required_settings(config: &AppConfig) -> Result<()> {
    if config.vector_store.url.is_none() && std::env::var("VECTOR_STORE_URL").is_err() {
        return Err(PipelineError::invalid_request(
            "VECTOR_STORE_URL is required (env var or [vector_store].url)",
        ));
    }

    let embedding_provider = config
        .embedding
        .provider
        .clone()
        .or_else(|| std::env::var("EMBEDDING_PROVIDER").ok())
        .ok_or_else(|| PipelineError::invalid_request("EMBEDDING_PROVIDER is required"))?;
    let provider = EmbeddingProviderKind::from_str(&embedding_provider)?;

    let missing_cred = match provider {
        EmbeddingProviderKind::Openai => std::env::var(&config.providers.openai_api_key_env).is_err(),
        EmbeddingProviderKind::Google => std::env::var(&config.providers.google_api_key_env).is_err(),
        EmbeddingProviderKind::Ollama => false,
    };
    if missing_cred {
        return Err(PipelineError::invalid_request(format!(
            "missing credential for embedding provider {embedding_provider:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes_round_trip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.paths.data_root, "data");
        assert_eq!(parsed.tunables.browser_pool_size, 5);
    }

    #[test]
    fn tunables_clamp_into_range() {
        let tunables = TunablesConfig {
            browser_pool_size: 999,
            llm_concurrency: 0,
            qdrant_batch_size: 0,
        };
        let resolved = tunables.resolve();
        assert_eq!(resolved.browser_pool_size, 50);
        assert_eq!(resolved.llm_concurrency, 1);
        assert_eq!(resolved.qdrant_batch_size, 1);
    }

    #[test]
    fn pipeline_llm_provider_rejects_unknown() {
        assert!(PipelineLlmProvider::from_str("claude").is_err());
        assert_eq!(
            PipelineLlmProvider::from_str("OpenRouter").unwrap(),
            PipelineLlmProvider::Openrouter
        );
    }

    #[test]
    fn embedding_dimension_lookup() {
        assert_eq!(
            EmbeddingProviderKind::Openai.dimension("text-embedding-3-small"),
            1536
        );
        assert_eq!(
            EmbeddingProviderKind::Openai.dimension("text-embedding-3-large"),
            3072
        );
        assert_eq!(EmbeddingProviderKind::Google.dimension("embedding-001"), 768);
    }

    #[test]
    fn pipeline_config_rejects_unknown_provider_from_env() {
        // SAFETY: test-local env mutation, no other test reads this var concurrently.
        unsafe {
            std::env::set_var("PIPELINE_LLM_PROVIDER", "not-a-real-provider");
        }
        let config = AppConfig::default();
        let result = PipelineConfig::try_from(&config);
        unsafe {
            std::env::remove_var("PIPELINE_LLM_PROVIDER");
        }
        assert!(result.is_err());
    }
}
