//! ChunkForge Common Library
//!
//! Shared code for the ChunkForge pipeline crates and binaries including:
//! - Data model (documents, chunks, records, query results)
//! - Embedding capability and the retrying batch embedder
//! - Vector store capability (Chroma over HTTP, in-memory)
//! - Collection lifecycle management
//! - Generative model capability
//! - Error types, configuration, and metrics

pub mod collections;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod vectorstore;

// Re-export commonly used types
pub use collections::CollectionManager;
pub use config::AppConfig;
pub use embeddings::{EmbedOptions, Embedder, EmbeddingProvider};
pub use errors::{AppError, Result};
pub use generation::Generator;
pub use identity::assign_id;
pub use models::{Chunk, ChunkRecord, ChunkingMethod, CollectionHandle, Document, GetResult, Metadata, QueryResult};
pub use vectorstore::VectorStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 256;
