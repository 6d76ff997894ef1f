//! llmsforge CLI — documentation ingestion pipeline frontend.
//!
//! A thin caller of `llmsforge-core`: it loads config, wires the concrete
//! `reqwest`-backed adapters, builds one [`PipelineHandle`], and dispatches
//! to the requested subcommand. No orchestration logic lives here.

mod adapters;
mod commands;

use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use llmsforge_core::PipelineHandle;
use llmsforge_governor::ResourceGovernor;
use llmsforge_registry::TaskRegistry;
use llmsforge_shared::config::{AppConfig, EmbeddingProviderKind, PipelineConfig, PipelineLlmProvider};
use llmsforge_shared::{load_config, validate_required_settings};

use adapters::{BraveWebSearch, ProviderEmbedder, ProviderLlm, QdrantStore, ReqwestBrowserPage};
use commands::{Cli, CliProgress};

const DEFAULT_VECTOR_COLLECTION: &str = "llmsforge_docs";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);

    let app_config = load_config()?;
    validate_required_settings(&app_config)?;
    let handle = build_handle(&app_config).await?;

    commands::run(cli, &handle).await
}

async fn build_handle(app_config: &AppConfig) -> Result<PipelineHandle> {
    let config = PipelineConfig::try_from(app_config)?;

    let registry = TaskRegistry::load(config.task_store_path.clone()).await?;
    let governor = Arc::new(ResourceGovernor::new(&config.tunables));

    let web_search_key = std::env::var(&app_config.providers.web_search_api_key_env).unwrap_or_default();
    let web_search = Arc::new(BraveWebSearch::new(web_search_key));

    let browser = Arc::new(ReqwestBrowserPage::new());

    let (llm_api_key, llm_base_url) = llm_credentials(app_config, config.pipeline_llm_provider);
    let llm_provider_name = match config.pipeline_llm_provider {
        PipelineLlmProvider::Gemini => "gemini",
        PipelineLlmProvider::Ollama => "ollama",
        PipelineLlmProvider::Openrouter => "openrouter",
        PipelineLlmProvider::Chutes => "chutes",
    };
    let llm_model = config
        .pipeline_llm_model
        .clone()
        .unwrap_or_else(|| default_llm_model(config.pipeline_llm_provider).to_string());
    let llm = Arc::new(ProviderLlm::new(config.pipeline_llm_provider, llm_api_key, llm_base_url));

    let embedding_provider_str = app_config
        .embedding
        .provider
        .clone()
        .or_else(|| std::env::var("EMBEDDING_PROVIDER").ok())
        .ok_or_else(|| eyre!("EMBEDDING_PROVIDER is required"))?;
    let embedding_provider = EmbeddingProviderKind::from_str(&embedding_provider_str)?;
    let (embed_api_key, embed_base_url) = embedding_credentials(app_config, embedding_provider);
    let embedding_model = app_config
        .embedding
        .model
        .clone()
        .unwrap_or_else(|| default_embedding_model(embedding_provider).to_string());
    let embedder = Arc::new(ProviderEmbedder::new(embedding_provider, embed_api_key, embed_base_url));

    let vector_store_url = app_config
        .vector_store
        .url
        .clone()
        .or_else(|| std::env::var("VECTOR_STORE_URL").ok())
        .ok_or_else(|| eyre!("VECTOR_STORE_URL is required"))?;
    let store = Arc::new(QdrantStore::new(vector_store_url, app_config.vector_store.api_key.clone()));

    let progress = Arc::new(CliProgress::new());

    Ok(PipelineHandle::new(
        registry,
        governor,
        config,
        web_search,
        browser,
        llm,
        llm_provider_name,
        llm_model,
        embedder,
        embedding_model,
        store,
        DEFAULT_VECTOR_COLLECTION,
        progress,
    ))
}

fn llm_credentials(
    app_config: &AppConfig,
    provider: PipelineLlmProvider,
) -> (Option<String>, Option<String>) {
    match provider {
        PipelineLlmProvider::Gemini => (std::env::var(&app_config.providers.google_api_key_env).ok(), None),
        PipelineLlmProvider::Ollama => (None, app_config.providers.ollama_base_url.clone()),
        PipelineLlmProvider::Openrouter => (std::env::var("OPENROUTER_API_KEY").ok(), None),
        PipelineLlmProvider::Chutes => (std::env::var("CHUTES_API_KEY").ok(), None),
    }
}

fn embedding_credentials(
    app_config: &AppConfig,
    provider: EmbeddingProviderKind,
) -> (Option<String>, Option<String>) {
    match provider {
        EmbeddingProviderKind::Openai => (
            std::env::var(&app_config.providers.openai_api_key_env).ok(),
            app_config.providers.openai_base_url.clone(),
        ),
        EmbeddingProviderKind::Google => (std::env::var(&app_config.providers.google_api_key_env).ok(), None),
        EmbeddingProviderKind::Ollama => (None, app_config.providers.ollama_base_url.clone()),
    }
}

fn default_llm_model(provider: PipelineLlmProvider) -> &'static str {
    match provider {
        PipelineLlmProvider::Gemini => "gemini-1.5-flash",
        PipelineLlmProvider::Ollama => "llama3.1",
        PipelineLlmProvider::Openrouter => "openrouter/auto",
        PipelineLlmProvider::Chutes => "chutes/default",
    }
}

fn default_embedding_model(provider: EmbeddingProviderKind) -> &'static str {
    match provider {
        EmbeddingProviderKind::Openai => "text-embedding-3-small",
        EmbeddingProviderKind::Ollama => "nomic-embed-text",
        EmbeddingProviderKind::Google => "text-embedding-004",
    }
}
