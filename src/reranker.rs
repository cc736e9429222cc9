//! Optional cross-encoder reranking pass over the top fused candidates
//! (`[features].reranker` setting).
//!
//! Grounded in the same `async-trait` provider-abstraction shape as
//! `embedder.rs`, with an `off` no-op default matching the config default
//! (`[features].reranker = "off"`).

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PampaxError, Result};

/// Reranking is applied to at most this many top-fused candidates, and each
/// candidate body is truncated to `RERANKER_MAX_TOKENS` before scoring, to
/// keep reranking API calls cheap.
pub const RERANK_MAX_CANDIDATES: usize = 50;
pub const RERANKER_MAX_TOKENS: usize = 512;
const RERANKER_CHAR_BUDGET: usize = RERANKER_MAX_TOKENS * 4;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, returning one relevance score per
    /// document in input order (higher is more relevant).
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;

    fn name(&self) -> &str;
}

/// The `"off"` default: identity no-op, all documents keep their incoming
/// fusion rank.
pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.0; documents.len()])
    }

    fn name(&self) -> &str {
        "off"
    }
}

/// A local cross-encoder reranker (e.g. a small `ms-marco-MiniLM` ONNX
/// model run through `fastembed`'s reranking support), matching the
/// `LocalEmbedder`'s feature gate since both need the same ONNX runtime.
#[cfg(feature = "semantic")]
pub struct TransformersReranker {
    model: std::sync::Mutex<fastembed::TextRerank>,
}

#[cfg(feature = "semantic")]
impl TransformersReranker {
    pub fn new(model_name: &str) -> Result<Self> {
        let model = resolve_local_model(model_name);
        let reranker = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| PampaxError::Reranker { message: e.to_string() })?;
        Ok(TransformersReranker { model: std::sync::Mutex::new(reranker) })
    }
}

#[cfg(feature = "semantic")]
fn resolve_local_model(name: &str) -> fastembed::RerankerModel {
    match name {
        "bge-reranker-large" => fastembed::RerankerModel::BGERerankerLarge,
        _ => fastembed::RerankerModel::BGERerankerBase,
    }
}

#[cfg(feature = "semantic")]
#[async_trait]
impl Reranker for TransformersReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let documents: Vec<&str> = documents.iter().map(String::as_str).collect();
        let model = self.model.lock().map_err(|_| PampaxError::Internal { message: "reranker lock poisoned".into() })?;
        let results = model
            .rerank(query, documents.clone(), false, None)
            .map_err(|e| PampaxError::Reranker { message: e.to_string() })?;
        let mut scores = vec![0.0f32; documents.len()];
        for r in results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score;
            }
        }
        Ok(scores)
    }

    fn name(&self) -> &str {
        "transformers"
    }
}

/// A remote cross-encoder reranker API (e.g. Cohere rerank, Jina rerank)
/// reached over HTTP, matching the same bearer-token convention as
/// `embedder.rs`'s network providers.
pub struct ApiReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ApiRerankResponse {
    results: Vec<ApiRerankResult>,
}

#[derive(Deserialize)]
struct ApiRerankResult {
    index: usize,
    relevance_score: f32,
}

impl ApiReranker {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = std::env::var("RERANKER_API_KEY")
            .map_err(|_| PampaxError::Reranker { message: "RERANKER_API_KEY is not set".into() })?;
        let base_url = std::env::var("RERANKER_API_URL").unwrap_or_else(|_| "https://api.cohere.ai/v1/rerank".into());
        Ok(ApiReranker { client: reqwest::Client::new(), base_url, api_key, model: model.to_string() })
    }

    /// Build an `ApiReranker` for a named hosted provider (`cohere` |
    /// `voyage`), defaulting to that provider's rerank endpoint and API key
    /// env var but still honoring `RERANKER_API_URL`/`RERANKER_API_KEY` as
    /// an override — the same convention `build_embedder`'s HTTP providers
    /// use for their base URLs.
    pub fn new_for_provider(provider: &str, model: &str) -> Result<Self> {
        let (default_url, key_env) = match provider {
            "voyage" => ("https://api.voyageai.com/v1/rerank", "VOYAGE_API_KEY"),
            _ => ("https://api.cohere.ai/v1/rerank", "COHERE_API_KEY"),
        };
        let api_key = std::env::var("RERANKER_API_KEY")
            .or_else(|_| std::env::var(key_env))
            .map_err(|_| PampaxError::Reranker { message: format!("{key_env} (or RERANKER_API_KEY) is not set") })?;
        let base_url = std::env::var("RERANKER_API_URL").unwrap_or_else(|_| default_url.to_string());
        Ok(ApiReranker { client: reqwest::Client::new(), base_url, api_key, model: model.to_string() })
    }
}

#[async_trait]
impl Reranker for ApiReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let truncated: Vec<&str> = documents.iter().map(|d| truncate_chars(d, RERANKER_CHAR_BUDGET)).collect();
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.model, "query": query, "documents": truncated }))
            .send()
            .await
            .map_err(|e| PampaxError::Reranker { message: e.to_string() })?;
        if !response.status().is_success() {
            return Err(PampaxError::Reranker { message: format!("reranker API returned {}", response.status()) });
        }
        let parsed: ApiRerankResponse =
            response.json().await.map_err(|e| PampaxError::Reranker { message: e.to_string() })?;
        let mut scores = vec![0.0f32; documents.len()];
        for r in parsed.results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.relevance_score;
            }
        }
        Ok(scores)
    }

    fn name(&self) -> &str {
        "api"
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Build the configured reranker from `[features].reranker`
/// (`"off"` | `"transformers"` | `"api"` | `"cohere"` | `"voyage"`).
pub fn build_reranker(setting: &str, model: &str) -> Result<Box<dyn Reranker>> {
    match setting {
        "off" | "rrf" => Ok(Box::new(NoopReranker)),
        "api" => Ok(Box::new(ApiReranker::new(model)?)),
        "cohere" | "voyage" => Ok(Box::new(ApiReranker::new_for_provider(setting, model)?)),
        #[cfg(feature = "semantic")]
        "transformers" | "local" => Ok(Box::new(TransformersReranker::new(model)?)),
        #[cfg(not(feature = "semantic"))]
        "transformers" | "local" => Err(PampaxError::Reranker { message: "built without the `semantic` feature".into() }),
        other => Err(PampaxError::Reranker { message: format!("unknown reranker setting: {other}") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reranker_returns_zero_scores_in_order() {
        let reranker = NoopReranker;
        let scores = reranker.rerank("query", &["a".into(), "b".into()]).await.unwrap();
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn truncate_chars_respects_utf8_boundaries() {
        let s = "héllo wörld";
        let truncated = truncate_chars(s, 3);
        assert_eq!(truncated, "hél");
    }

    #[test]
    fn build_reranker_maps_rrf_alias_to_noop() {
        let reranker = build_reranker("rrf", "unused").unwrap();
        assert_eq!(reranker.name(), "off");
    }

    #[test]
    fn build_reranker_rejects_unknown_setting() {
        let err = build_reranker("not-a-real-reranker", "unused").unwrap_err();
        assert_eq!(err.kind(), "reranker");
    }
}
