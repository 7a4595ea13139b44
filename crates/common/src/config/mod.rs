//! Configuration management for ChunkForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Embedding capability configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store configuration
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Generative model configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Chunking strategy parameters
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Document bucket access
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (ingestion runs can be long)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Output dimensionality requested from the provider
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retries per batch after the first attempt
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// First backoff wait; doubles on every retry
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Batch size used when embedding semantic-split chunks
    #[serde(default = "default_semantic_batch_size")]
    pub semantic_batch_size: usize,

    /// Hard per-call limit enforced by the provider
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Batches in flight at once
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Vector store provider: chroma, memory
    #[serde(default = "default_vector_store_provider")]
    pub provider: String,

    /// Chroma server URL
    #[serde(default = "default_vector_store_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_vector_store_timeout")]
    pub timeout_secs: u64,

    /// Records per add call
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: openai, echo
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// API key for the generative model
    pub api_key: Option<String>,

    /// API base URL (for OpenAI-compatible endpoints)
    pub api_base: Option<String>,

    /// Model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Instruction prepended to every chat prompt
    #[serde(default = "default_system_instruction")]
    pub system_instruction: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Window for char-split, in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap for char-split, in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Size bound for recursive-split, in characters
    #[serde(default = "default_chunk_size")]
    pub recursive_chunk_size: usize,

    /// Overlap for recursive-split, in characters
    #[serde(default = "default_recursive_chunk_overlap")]
    pub recursive_chunk_overlap: usize,

    /// Neighbouring sentences joined on each side before embedding
    #[serde(default = "default_semantic_buffer_size")]
    pub semantic_buffer_size: usize,

    /// Distance percentile above which a topic boundary is inserted
    #[serde(default = "default_breakpoint_percentile")]
    pub semantic_breakpoint_percentile: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Default k for plain queries
    #[serde(default = "default_query_results")]
    pub query_results: usize,

    /// Default k for chat context
    #[serde(default = "default_chat_results")]
    pub chat_results: usize,

    /// Upper bound accepted for k
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Cloud Storage JSON API endpoint
    #[serde(default = "default_gcs_endpoint")]
    pub gcs_endpoint: String,

    /// OAuth bearer token for private buckets
    pub access_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level or EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default)]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 9000 }
fn default_request_timeout() -> u64 { 900 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 5 }
fn default_retry_base_delay() -> u64 { 5_000 }
fn default_batch_size() -> usize { 100 }
fn default_semantic_batch_size() -> usize { 15 }
fn default_max_batch_size() -> usize { 250 }
fn default_embedding_concurrency() -> usize { 1 }
fn default_vector_store_provider() -> String { "chroma".to_string() }
fn default_vector_store_url() -> String { "http://chromadb:8000".to_string() }
fn default_vector_store_timeout() -> u64 { 30 }
fn default_insert_batch_size() -> usize { 500 }
fn default_generation_provider() -> String { "openai".to_string() }
fn default_generation_model() -> String { "gemini-2.0-flash-001".to_string() }
fn default_generation_timeout() -> u64 { 60 }
fn default_max_tokens() -> usize { 1024 }
fn default_temperature() -> f32 { 0.2 }
fn default_chunk_size() -> usize { 350 }
fn default_chunk_overlap() -> usize { 20 }
fn default_recursive_chunk_overlap() -> usize { 200 }
fn default_semantic_buffer_size() -> usize { 1 }
fn default_breakpoint_percentile() -> f64 { 95.0 }
fn default_query_results() -> usize { 5 }
fn default_chat_results() -> usize { 10 }
fn default_max_results() -> usize { 100 }
fn default_gcs_endpoint() -> String { "https://storage.googleapis.com".to_string() }
fn default_storage_timeout() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "chunkforge".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }

fn default_system_instruction() -> String {
    "You are an AI assistant that answers questions using only the text chunks provided with each query. \
Do not use external knowledge or make assumptions beyond what the chunks state.\n\
When answering:\n\
1. Read all the provided chunks.\n\
2. Identify the information relevant to the question.\n\
3. Answer using only that information.\n\
4. If the chunks do not contain enough information, say so.\n\
5. If the chunks contradict each other, point out the different viewpoints.\n\
Be concise while covering all relevant information from the chunks."
        .to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            batch_size: default_batch_size(),
            semantic_batch_size: default_semantic_batch_size(),
            max_batch_size: default_max_batch_size(),
            concurrency: default_embedding_concurrency(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_vector_store_provider(),
            url: default_vector_store_url(),
            timeout_secs: default_vector_store_timeout(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            api_base: None,
            model: default_generation_model(),
            timeout_secs: default_generation_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            system_instruction: default_system_instruction(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            recursive_chunk_size: default_chunk_size(),
            recursive_chunk_overlap: default_recursive_chunk_overlap(),
            semantic_buffer_size: default_semantic_buffer_size(),
            semantic_breakpoint_percentile: default_breakpoint_percentile(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query_results: default_query_results(),
            chat_results: default_chat_results(),
            max_results: default_max_results(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gcs_endpoint: default_gcs_endpoint(),
            access_token: None,
            timeout_secs: default_storage_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: false,
        }
    }
}

impl EmbeddingConfig {
    /// First backoff wait as Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__EMBEDDING__BATCH_SIZE=50
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the pipeline cannot honour. Fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let embedding = &self.embedding;
        for (name, size) in [
            ("embedding.batch_size", embedding.batch_size),
            ("embedding.semantic_batch_size", embedding.semantic_batch_size),
        ] {
            if size == 0 || size > embedding.max_batch_size {
                return Err(AppError::configuration(format!(
                    "{} must be between 1 and the provider limit of {}, got {}",
                    name, embedding.max_batch_size, size
                )));
            }
        }
        if embedding.dimension == 0 {
            return Err(AppError::configuration("embedding.dimension must be positive"));
        }
        if embedding.concurrency == 0 {
            return Err(AppError::configuration("embedding.concurrency must be positive"));
        }
        if self.vector_store.insert_batch_size == 0 {
            return Err(AppError::configuration(
                "vector_store.insert_batch_size must be positive",
            ));
        }

        let chunking = &self.chunking;
        if chunking.chunk_size == 0 || chunking.chunk_overlap >= chunking.chunk_size {
            return Err(AppError::configuration(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if chunking.recursive_chunk_size == 0
            || chunking.recursive_chunk_overlap >= chunking.recursive_chunk_size
        {
            return Err(AppError::configuration(format!(
                "chunking.recursive_chunk_overlap ({}) must be smaller than chunking.recursive_chunk_size ({})",
                chunking.recursive_chunk_overlap, chunking.recursive_chunk_size
            )));
        }
        if !(0.0..=100.0).contains(&chunking.semantic_breakpoint_percentile) {
            return Err(AppError::configuration(
                "chunking.semantic_breakpoint_percentile must be within 0..=100",
            ));
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}
