//! Real, `reqwest`-backed implementations of the pipeline's external
//! collaborator traits (§6.4). These are the CLI's own wiring, not part of
//! the shared library — the orchestrator only ever sees the trait objects.

use std::time::Duration;

use async_trait::async_trait;
use llmsforge_shared::adapters::{
    BrowserPageProvider, CollectionInfo, EmbeddingProvider, LlmProvider, PageContent, SearchHit,
    VectorStoreProvider, WebSearchProvider,
};
use llmsforge_shared::config::{EmbeddingProviderKind, PipelineLlmProvider};
use llmsforge_shared::{PipelineError, VectorPoint};
use reqwest::Client;
use serde_json::{Value, json};

fn http_error(context: &str, err: reqwest::Error) -> PipelineError {
    if err.is_timeout() || err.is_connect() {
        PipelineError::transient(format!("{context}: {err}"))
    } else {
        PipelineError::external_fatal(format!("{context}: {err}"))
    }
}

/// Plays the role of headless-browser navigation with a plain HTTP GET —
/// real browser automation is out of scope (§6.4); the fetch stage's HTML
/// extraction works the same either way.
pub struct ReqwestBrowserPage {
    client: Client,
}

impl ReqwestBrowserPage {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent("llmsforge/0.1")
                .build()
                .expect("reqwest client builds with default TLS backend"),
        }
    }
}

impl Default for ReqwestBrowserPage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserPageProvider for ReqwestBrowserPage {
    async fn load(&self, url: &str, timeout: Duration) -> llmsforge_shared::Result<PageContent> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| http_error("browser page load", e))?;
        let final_url = response.url().to_string();
        if !response.status().is_success() {
            return Err(PipelineError::external_fatal(format!(
                "browser page load: {url} returned HTTP {}",
                response.status()
            )));
        }
        let html = response
            .text()
            .await
            .map_err(|e| http_error("browser page body", e))?;
        Ok(PageContent { html, final_url })
    }
}

/// Web search via the Brave Search API, selected as the one concrete
/// provider behind `WEB_SEARCH_API_KEY` (§6.1).
pub struct BraveWebSearch {
    client: Client,
    api_key: String,
}

impl BraveWebSearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl WebSearchProvider for BraveWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> llmsforge_shared::Result<Vec<SearchHit>> {
        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &max_results.to_string())])
            .send()
            .await
            .map_err(|e| http_error("web search", e))?;
        if !response.status().is_success() {
            return Err(PipelineError::external_fatal(format!(
                "web search returned HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::parse(format!("web search response was not JSON: {e}")))?;
        let hits = body["web"]["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| r["url"].as_str().map(|u| SearchHit { url: u.to_string() }))
                    .take(max_results)
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

/// The Synthesize stage's summarization LLM, dispatching on
/// [`PipelineLlmProvider`] (§6.1).
pub struct ProviderLlm {
    client: Client,
    provider: PipelineLlmProvider,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl ProviderLlm {
    pub fn new(provider: PipelineLlmProvider, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            provider,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl LlmProvider for ProviderLlm {
    async fn complete(&self, model: &str, prompt: &str) -> llmsforge_shared::Result<String> {
        match self.provider {
            PipelineLlmProvider::Gemini => {
                let key = self
                    .api_key
                    .as_deref()
                    .ok_or_else(|| PipelineError::invalid_request("GOOGLE_API_KEY is required for gemini"))?;
                let url = format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={key}"
                );
                let body = json!({"contents": [{"parts": [{"text": prompt}]}]});
                let response = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| http_error("gemini completion", e))?;
                if !response.status().is_success() {
                    return Err(PipelineError::external_fatal(format!(
                        "gemini completion returned HTTP {}",
                        response.status()
                    )));
                }
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::parse(format!("gemini response was not JSON: {e}")))?;
                value["candidates"][0]["content"]["parts"][0]["text"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PipelineError::parse("gemini response missing candidate text"))
            }
            PipelineLlmProvider::Ollama => {
                let base = self.base_url.as_deref().unwrap_or("http://localhost:11434");
                let url = format!("{base}/api/generate");
                let body = json!({"model": model, "prompt": prompt, "stream": false});
                let response = self
                    .client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| http_error("ollama completion", e))?;
                if !response.status().is_success() {
                    return Err(PipelineError::external_fatal(format!(
                        "ollama completion returned HTTP {}",
                        response.status()
                    )));
                }
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::parse(format!("ollama response was not JSON: {e}")))?;
                value["response"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PipelineError::parse("ollama response missing 'response' field"))
            }
            PipelineLlmProvider::Openrouter | PipelineLlmProvider::Chutes => {
                let (url, key) = match self.provider {
                    PipelineLlmProvider::Openrouter => (
                        "https://openrouter.ai/api/v1/chat/completions".to_string(),
                        self.api_key.clone(),
                    ),
                    _ => ("https://llm.chutes.ai/v1/chat/completions".to_string(), self.api_key.clone()),
                };
                let key = key.ok_or_else(|| {
                    PipelineError::invalid_request("missing API key for the configured pipeline LLM provider")
                })?;
                let body = json!({
                    "model": model,
                    "messages": [{"role": "user", "content": prompt}],
                });
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| http_error("chat completion", e))?;
                if !response.status().is_success() {
                    return Err(PipelineError::external_fatal(format!(
                        "chat completion returned HTTP {}",
                        response.status()
                    )));
                }
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::parse(format!("chat completion response was not JSON: {e}")))?;
                value["choices"][0]["message"]["content"]
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PipelineError::parse("chat completion response missing message content"))
            }
        }
    }
}

/// The Embed stage's embedding generator, dispatching on
/// [`EmbeddingProviderKind`] (§6.1, §4.7.1).
pub struct ProviderEmbedder {
    client: Client,
    provider: EmbeddingProviderKind,
    api_key: Option<String>,
    base_url: Option<String>,
}

impl ProviderEmbedder {
    pub fn new(provider: EmbeddingProviderKind, api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            provider,
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ProviderEmbedder {
    async fn embed(&self, model: &str, text: &str) -> llmsforge_shared::Result<Vec<f32>> {
        match self.provider {
            EmbeddingProviderKind::Openai => {
                let key = self
                    .api_key
                    .as_deref()
                    .ok_or_else(|| PipelineError::invalid_request("OPENAI_API_KEY is required for openai"))?;
                let base = self.base_url.as_deref().unwrap_or("https://api.openai.com/v1");
                let response = self
                    .client
                    .post(format!("{base}/embeddings"))
                    .bearer_auth(key)
                    .json(&json!({"model": model, "input": text}))
                    .send()
                    .await
                    .map_err(|e| http_error("openai embedding", e))?;
                if !response.status().is_success() {
                    return Err(PipelineError::external_fatal(format!(
                        "openai embedding returned HTTP {}",
                        response.status()
                    )));
                }
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::parse(format!("openai response was not JSON: {e}")))?;
                parse_float_vec(&value["data"][0]["embedding"])
            }
            EmbeddingProviderKind::Ollama => {
                let base = self.base_url.as_deref().unwrap_or("http://localhost:11434");
                let response = self
                    .client
                    .post(format!("{base}/api/embeddings"))
                    .json(&json!({"model": model, "prompt": text}))
                    .send()
                    .await
                    .map_err(|e| http_error("ollama embedding", e))?;
                if !response.status().is_success() {
                    return Err(PipelineError::external_fatal(format!(
                        "ollama embedding returned HTTP {}",
                        response.status()
                    )));
                }
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::parse(format!("ollama response was not JSON: {e}")))?;
                parse_float_vec(&value["embedding"])
            }
            EmbeddingProviderKind::Google => {
                let key = self
                    .api_key
                    .as_deref()
                    .ok_or_else(|| PipelineError::invalid_request("GOOGLE_API_KEY is required for google"))?;
                let url = format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{model}:embedContent?key={key}"
                );
                let response = self
                    .client
                    .post(&url)
                    .json(&json!({"content": {"parts": [{"text": text}]}}))
                    .send()
                    .await
                    .map_err(|e| http_error("google embedding", e))?;
                if !response.status().is_success() {
                    return Err(PipelineError::external_fatal(format!(
                        "google embedding returned HTTP {}",
                        response.status()
                    )));
                }
                let value: Value = response
                    .json()
                    .await
                    .map_err(|e| PipelineError::parse(format!("google response was not JSON: {e}")))?;
                parse_float_vec(&value["embedding"]["values"])
            }
        }
    }

    fn dimension(&self, model: &str) -> usize {
        self.provider.dimension(model)
    }
}

fn parse_float_vec(value: &Value) -> llmsforge_shared::Result<Vec<f32>> {
    value
        .as_array()
        .map(|values| values.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
        .ok_or_else(|| PipelineError::parse("embedding response did not contain a float array"))
}

/// Vector store backed by Qdrant's HTTP API (§6.4).
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }
}

#[async_trait]
impl VectorStoreProvider for QdrantStore {
    async fn collection_info(&self, name: &str) -> llmsforge_shared::Result<CollectionInfo> {
        let response = self
            .request(reqwest::Method::GET, &format!("/collections/{name}"))
            .send()
            .await
            .map_err(|e| http_error("qdrant collection info", e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(CollectionInfo { exists: false, dimension: None });
        }
        if !response.status().is_success() {
            return Err(PipelineError::external_fatal(format!(
                "qdrant collection info returned HTTP {}",
                response.status()
            )));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::parse(format!("qdrant response was not JSON: {e}")))?;
        let dimension = value["result"]["config"]["params"]["vectors"]["size"]
            .as_u64()
            .map(|n| n as usize);
        Ok(CollectionInfo { exists: true, dimension })
    }

    async fn create_collection(&self, name: &str, dimension: usize) -> llmsforge_shared::Result<()> {
        let body = json!({"vectors": {"size": dimension, "distance": "Cosine"}});
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{name}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| http_error("qdrant create collection", e))?;
        if !response.status().is_success() {
            return Err(PipelineError::external_fatal(format!(
                "qdrant create collection returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> llmsforge_shared::Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/collections/{name}"))
            .send()
            .await
            .map_err(|e| http_error("qdrant delete collection", e))?;
        if !response.status().is_success() {
            return Err(PipelineError::external_fatal(format!(
                "qdrant delete collection returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn upsert(&self, name: &str, points: Vec<VectorPoint>) -> llmsforge_shared::Result<()> {
        let points: Vec<Value> = points
            .into_iter()
            .map(|p| {
                json!({
                    "id": p.id.to_string(),
                    "vector": p.vector,
                    "payload": p.payload,
                })
            })
            .collect();
        let response = self
            .request(reqwest::Method::PUT, &format!("/collections/{name}/points?wait=true"))
            .json(&json!({"points": points}))
            .send()
            .await
            .map_err(|e| http_error("qdrant upsert", e))?;
        if !response.status().is_success() {
            return Err(PipelineError::external_fatal(format!(
                "qdrant upsert returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
