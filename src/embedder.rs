//! Embedding provider abstraction — turns chunk text into vectors.
//!
//! One trait, four implementations (local/OpenAI/Ollama/Cohere): local
//! inference via `fastembed`, and three HTTP-backed providers for callers
//! who'd rather not run a model on-box. See DESIGN.md for the stack
//! rationale.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PampaxError, Result};
use crate::types::EmbedderIdentity;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn identity(&self) -> &EmbedderIdentity;

    /// Embed a batch of chunk bodies, returning one vector per input in
    /// the same order. A provider that cannot embed part of a batch (e.g.
    /// a single oversized input) should truncate internally rather than
    /// fail the whole batch.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// Local (fastembed/ort)
// ---------------------------------------------------------------------------

#[cfg(feature = "semantic")]
pub struct LocalEmbedder {
    identity: EmbedderIdentity,
    model: std::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "semantic")]
impl LocalEmbedder {
    pub fn new(model_name: &str) -> Result<Self> {
        let (embedding_model, dim) = resolve_local_model(model_name);
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(embedding_model).with_show_download_progress(false),
        )
        .map_err(|e| PampaxError::EmbedderUnavailable { message: e.to_string() })?;
        Ok(LocalEmbedder {
            identity: EmbedderIdentity { provider: "local".into(), model: model_name.to_string(), dim },
            model: std::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "semantic")]
fn resolve_local_model(name: &str) -> (fastembed::EmbeddingModel, usize) {
    match name {
        "bge-small-en" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
        _ => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
    }
}

#[cfg(feature = "semantic")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        let model = self.model.lock().map_err(|_| PampaxError::Internal { message: "embedder lock poisoned".into() })?;
        // fastembed's `embed` is synchronous CPU/GPU work; keep it off the
        // async executor so a big batch doesn't stall other index tasks.
        model
            .embed(texts, None)
            .map_err(|e| PampaxError::EmbedderUnavailable { message: e.to_string() })
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP provider
// ---------------------------------------------------------------------------

pub struct OpenAiEmbedder {
    identity: EmbedderIdentity,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(model: &str, dim: usize) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PampaxError::EmbedderUnavailable { message: "OPENAI_API_KEY is not set".into() })?;
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
        Ok(OpenAiEmbedder {
            identity: EmbedderIdentity { provider: "openai".into(), model: model.to_string(), dim },
            client: reqwest::Client::new(),
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.identity.model, "input": texts }))
            .send()
            .await
            .map_err(|e| embedder_error_from_reqwest(e))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PampaxError::EmbedderRateLimited { message: "OpenAI embeddings rate limit".into() });
        }
        if !response.status().is_success() {
            return Err(PampaxError::EmbedderUnavailable { message: format!("OpenAI returned {}", response.status()) });
        }

        let parsed: OpenAiEmbeddingResponse =
            response.json().await.map_err(|e| PampaxError::Internal { message: e.to_string() })?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

pub struct OllamaEmbedder {
    identity: EmbedderIdentity,
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(model: &str, dim: usize) -> Self {
        let base_url = std::env::var("OLLAMA_API_URL").unwrap_or_else(|_| "http://localhost:11434".into());
        OllamaEmbedder {
            identity: EmbedderIdentity { provider: "ollama".into(), model: model.to_string(), dim },
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Ollama's embeddings endpoint takes one prompt per call.
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self
                .client
                .post(format!("{}/api/embeddings", self.base_url))
                .json(&serde_json::json!({ "model": self.identity.model, "prompt": text }))
                .send()
                .await
                .map_err(embedder_error_from_reqwest)?;
            if !response.status().is_success() {
                return Err(PampaxError::EmbedderUnavailable { message: format!("Ollama returned {}", response.status()) });
            }
            let parsed: OllamaEmbeddingResponse =
                response.json().await.map_err(|e| PampaxError::Internal { message: e.to_string() })?;
            out.push(parsed.embedding);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Cohere
// ---------------------------------------------------------------------------

pub struct CohereEmbedder {
    identity: EmbedderIdentity,
    client: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct CohereEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

impl CohereEmbedder {
    pub fn new(model: &str, dim: usize) -> Result<Self> {
        let api_key = std::env::var("COHERE_API_KEY")
            .map_err(|_| PampaxError::EmbedderUnavailable { message: "COHERE_API_KEY is not set".into() })?;
        Ok(CohereEmbedder {
            identity: EmbedderIdentity { provider: "cohere".into(), model: model.to_string(), dim },
            client: reqwest::Client::new(),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for CohereEmbedder {
    fn identity(&self) -> &EmbedderIdentity {
        &self.identity
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post("https://api.cohere.ai/v1/embed")
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.identity.model, "texts": texts, "input_type": "search_document" }))
            .send()
            .await
            .map_err(embedder_error_from_reqwest)?;
        if !response.status().is_success() {
            return Err(PampaxError::EmbedderUnavailable { message: format!("Cohere returned {}", response.status()) });
        }
        let parsed: CohereEmbeddingResponse =
            response.json().await.map_err(|e| PampaxError::Internal { message: e.to_string() })?;
        Ok(parsed.embeddings)
    }
}

fn embedder_error_from_reqwest(e: reqwest::Error) -> PampaxError {
    if e.is_timeout() {
        PampaxError::Timeout { elapsed_ms: 0 }
    } else {
        PampaxError::EmbedderUnavailable { message: e.to_string() }
    }
}

/// Build the configured provider from `[indexer].provider` plus environment
/// overrides (`PAMPAX_EMBEDDER_*` and each provider's own API-key variable).
pub fn build_embedder(provider: &str, model: &str, dim: usize) -> Result<Box<dyn Embedder>> {
    match provider {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(model, dim)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(model, dim))),
        "cohere" => Ok(Box::new(CohereEmbedder::new(model, dim)?)),
        #[cfg(feature = "semantic")]
        "local" => Ok(Box::new(LocalEmbedder::new(model)?)),
        #[cfg(not(feature = "semantic"))]
        "local" => Err(PampaxError::EmbedderUnavailable { message: "built without the `semantic` feature".into() }),
        other => Err(PampaxError::EmbedderInvalidModel { message: format!("unknown embedder provider: {other}") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_invalid_model_error() {
        let err = build_embedder("not-a-real-provider", "x", 8).unwrap_err();
        assert_eq!(err.kind(), "embedder_invalid_model");
    }
}
