//! Embedding capability
//!
//! `EmbeddingProvider` is one remote call: texts in, vectors out. Providers:
//! - OpenAI-compatible `/embeddings` endpoints (with `dimensions`)
//! - Deterministic mock for development and tests
//!
//! Batching, backoff and order reassembly live in [`Embedder`].

mod batch;

pub use batch::{EmbedOptions, Embedder};

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "embedding";

/// A remote embedding capability
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts` into vectors of length `dimension`, index-aligned with the input.
    ///
    /// Rate limits and network trouble surface as `TransientService`, rejected
    /// input as `MalformedInput`.
    async fn embed(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Hard per-call limit on the number of texts
    fn max_batch_size(&self) -> usize;
}

/// OpenAI-compatible embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_batch_size: usize,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI-compatible embedder
    pub fn new(
        api_key: Option<String>,
        model: String,
        base_url: Option<String>,
        timeout: Duration,
        max_batch_size: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_batch_size,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.api_base.clone(),
            Duration::from_secs(config.timeout_secs),
            config.max_batch_size,
        )
    }
}

/// Map an HTTP failure onto the retry taxonomy
fn classify_status(status: StatusCode, body: String) -> AppError {
    let message = format!("API error {}: {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => AppError::TransientService {
            service: SERVICE.to_string(),
            message,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Configuration { message },
        s if s.is_server_error() => AppError::TransientService {
            service: SERVICE.to_string(),
            message,
        },
        _ => AppError::MalformedInput {
            service: SERVICE.to_string(),
            message,
        },
    }
}

fn classify_transport(err: reqwest::Error) -> AppError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        AppError::TransientService {
            service: SERVICE.to_string(),
            message: format!("Request failed: {}", err),
        }
    } else {
        AppError::HttpClient(err)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    async fn embed(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        if texts.len() > self.max_batch_size {
            return Err(AppError::configuration(format!(
                "embedding batch of {} exceeds the provider limit of {}",
                texts.len(),
                self.max_batch_size
            )));
        }

        let url = format!("{}/embeddings", self.base_url);
        let request = OpenAIRequest {
            input: texts,
            model: &self.model,
            dimensions: dimension,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let mut result: OpenAIResponse = response.json().await.map_err(classify_transport)?;
        result.data.sort_by_key(|e| e.index);

        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

/// Deterministic embedder for development and testing.
///
/// Hashes lowercase words into buckets and L2-normalises, so texts that share
/// words land close together.
pub struct MockEmbedder {
    max_batch_size: usize,
}

impl MockEmbedder {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    pub fn embed_text(text: &str, dimension: usize) -> Vec<f32> {
        let mut vector = vec![0.0f32; dimension];
        if dimension == 0 {
            return vector;
        }
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(250)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        if texts.len() > self.max_batch_size {
            return Err(AppError::configuration(format!(
                "embedding batch of {} exceeds the provider limit of {}",
                texts.len(),
                self.max_batch_size
            )));
        }
        Ok(texts.iter().map(|t| Self::embed_text(t, dimension)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

/// Create an embedding provider based on configuration
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::from_config(config)?)),
        "mock" => Ok(Arc::new(MockEmbedder::new(config.max_batch_size))),
        other => Err(AppError::configuration(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}
