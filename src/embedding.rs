//! Embedding provider abstraction and vector utilities.
//!
//! The [`Embedder`] trait maps batches of text to fixed-dimension vectors.
//! The call is all-or-nothing: either every input gets a vector, in input
//! order, or the whole batch fails — partial results never reach the
//! caller, which keeps asset indexing atomic per batch.
//!
//! Providers:
//! - **[`OpenAiEmbedder`]** — OpenAI-compatible `POST /v1/embeddings` with
//!   batching, retry, and exponential backoff (429/5xx/network errors are
//!   retried, other 4xx fail immediately).
//! - **[`DisabledEmbedder`]** — always errors; lets `init` and read-only
//!   commands run without credentials.
//!
//! Also provides the vector helpers shared with [`crate::index`]:
//! [`vec_to_blob`], [`blob_to_vec`], and [`cosine_similarity`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Result, ServiceError};

/// Maps text to fixed-dimension vectors via an external model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Vector dimensionality for the configured model.
    fn dims(&self) -> usize;

    /// Embed a batch of texts. Returns one vector per input, in input
    /// order, or fails the whole call.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query string.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let texts = [text.to_string()];
    let mut vectors = embedder.embed(&texts).await?;
    vectors
        .pop()
        .ok_or_else(|| ServiceError::EmbeddingService("empty embedding response".to_string()))
}

/// Build the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => Err(ServiceError::EmbeddingService(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Disabled provider ============

/// Placeholder provider used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ServiceError::EmbeddingService(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ OpenAI-compatible provider ============

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ServiceError::EmbeddingService("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::EmbeddingService(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<ServiceError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ... capped at 32s.
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(OPENAI_EMBEDDINGS_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| ServiceError::EmbeddingService(e.to_string()))?;
                        return parse_embeddings_response(&json, texts.len(), self.dims);
                    }

                    // Rate limited or server error — retry.
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(ServiceError::EmbeddingService(format!(
                            "API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    // Other client errors don't retry.
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(ServiceError::EmbeddingService(format!(
                        "API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(ServiceError::EmbeddingService(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ServiceError::EmbeddingService("embedding failed after retries".to_string())
        }))
    }
}

/// Parse the `data[].embedding` arrays, enforcing the all-or-nothing
/// contract: output length must equal input length and every vector must
/// have the configured dimensionality.
fn parse_embeddings_response(
    json: &serde_json::Value,
    expected_len: usize,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            ServiceError::EmbeddingService("invalid response: missing data array".to_string())
        })?;

    if data.len() != expected_len {
        return Err(ServiceError::EmbeddingService(format!(
            "response length {} does not match batch size {}",
            data.len(),
            expected_len
        )));
    }

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                ServiceError::EmbeddingService("invalid response: missing embedding".to_string())
            })?;

        if embedding.len() != expected_dims {
            return Err(ServiceError::EmbeddingService(format!(
                "vector has {} dims, expected {}",
                embedding.len(),
                expected_dims
            )));
        }

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Vector helpers ============

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
/// mismatched lengths.
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
