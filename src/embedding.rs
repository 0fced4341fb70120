//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI or Azure OpenAI embeddings API.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides [`cosine_similarity`] for the in-memory search backend.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use enforcement_search::config::EmbeddingConfig;
//! # use enforcement_search::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let client = reqwest::Client::new();
//! let embedder = create_embedder(&config, client).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! Providers never retry. A failed call surfaces as a [`BackendError`] and
//! the strategy that asked for the embedding reports it.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::BackendError;
use crate::http::{api_key_from_env, send_json};

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-large"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `3072`).
    fn dims(&self) -> usize;
    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Err(BackendError::Unavailable(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI / Azure OpenAI Provider ============

/// Embedding provider using the OpenAI API or an Azure OpenAI deployment.
///
/// - `openai`: `POST {url}/v1/embeddings` with a bearer token.
/// - `azure`: `POST {url}/openai/deployments/{model}/embeddings?api-version=…`
///   with an `api-key` header; `model` names the deployment.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    endpoint: String,
    auth: AuthHeader,
    model: String,
    dims: usize,
}

enum AuthHeader {
    Bearer(String),
    ApiKey(String),
}

impl OpenAIEmbedder {
    /// Create a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config, or if
    /// the configured API key variable is not in the environment.
    pub fn new(config: &EmbeddingConfig, client: reqwest::Client) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let key = api_key_from_env(&config.api_key_env)?;

        let (endpoint, auth) = if config.provider == "azure" {
            let base = config
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("embedding.url required for azure provider"))?;
            (
                format!(
                    "{}/openai/deployments/{}/embeddings?api-version={}",
                    base.trim_end_matches('/'),
                    model,
                    config.api_version
                ),
                AuthHeader::ApiKey(key),
            )
        } else {
            let base = config.url.as_deref().unwrap_or("https://api.openai.com");
            (
                format!("{}/v1/embeddings", base.trim_end_matches('/')),
                AuthHeader::Bearer(key),
            )
        };

        Ok(Self {
            client,
            endpoint,
            auth,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let request = match &self.auth {
            AuthHeader::Bearer(key) => self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", key)),
            AuthHeader::ApiKey(key) => self.client.post(&self.endpoint).header("api-key", key),
        };

        let json = send_json("embeddings", request.json(&body)).await?;
        let vector = first_vector(parse_openai_response(&json)?)?;
        check_dims(&self.model, self.dims, &vector);
        Ok(vector)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, BackendError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| BackendError::malformed("embeddings", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| BackendError::malformed("embeddings", "missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig, client: reqwest::Client) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client,
            url,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);

        let json = send_json("ollama", request).await?;
        let vector = first_vector(parse_ollama_response(&json)?)?;
        check_dims(&self.model, self.dims, &vector);
        Ok(vector)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, BackendError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| BackendError::malformed("ollama", "missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| BackendError::malformed("ollama", "embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

fn first_vector(vectors: Vec<Vec<f32>>) -> Result<Vec<f32>, BackendError> {
    vectors
        .into_iter()
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BackendError::malformed("embeddings", "empty embedding response"))
}

fn check_dims(model: &str, expected: usize, vector: &[f32]) {
    if vector.len() != expected {
        warn!(
            model,
            expected,
            actual = vector.len(),
            "embedding dimensionality differs from config"
        );
    }
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` / `"azure"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(
    config: &EmbeddingConfig,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" | "azure" => Ok(Arc::new(OpenAIEmbedder::new(config, client)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config, client)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors
/// of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_orders_by_index() {
        let body = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&body).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_parse_openai_missing_data_is_malformed() {
        let err = parse_openai_response(&json!({ "error": "nope" })).unwrap_err();
        assert!(matches!(err, BackendError::Malformed { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_ollama() {
        let body = json!({ "embeddings": [[0.5, 0.25, 0.125]] });
        let vectors = parse_ollama_response(&body).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 3);
    }

    #[test]
    fn test_empty_vector_rejected() {
        assert!(first_vector(vec![vec![]]).is_err());
        assert!(first_vector(vec![]).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors() {
        let err = DisabledEmbedder.embed_query("banknotes").await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
