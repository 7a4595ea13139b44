//! Vector store capability
//!
//! Implementations:
//! - [`ChromaStore`]: Chroma server over its v1 REST API
//! - [`MemoryStore`]: in-process brute-force cosine search

mod chroma;
mod memory;

pub use chroma::ChromaStore;
pub use memory::MemoryStore;

use crate::config::VectorStoreConfig;
use crate::errors::{AppError, Result};
use crate::models::{ChunkRecord, CollectionHandle, GetResult, Metadata, QueryResult};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Collection metadata key selecting the similarity metric
pub const SPACE_KEY: &str = "hnsw:space";

/// Parallel arrays for one `add` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddBatch {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub embeddings: Vec<Vec<f32>>,
}

impl AddBatch {
    pub fn from_records(records: &[ChunkRecord]) -> Self {
        let mut batch = AddBatch {
            ids: Vec::with_capacity(records.len()),
            documents: Vec::with_capacity(records.len()),
            metadatas: Vec::with_capacity(records.len()),
            embeddings: Vec::with_capacity(records.len()),
        };
        for record in records {
            batch.ids.push(record.id.clone());
            batch.documents.push(record.chunk.text.clone());
            batch.metadatas.push(record.metadata.clone());
            batch.embeddings.push(record.embedding.clone());
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All four arrays must have the same length
    pub fn validate(&self, collection: &str) -> Result<()> {
        let n = self.ids.len();
        if self.documents.len() != n || self.metadatas.len() != n || self.embeddings.len() != n {
            return Err(AppError::MalformedBatch {
                collection: collection.to_string(),
                message: format!(
                    "ids={} documents={} metadatas={} embeddings={}",
                    n,
                    self.documents.len(),
                    self.metadatas.len(),
                    self.embeddings.len()
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a new empty collection. Fails if one with `name` already exists.
    async fn create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionHandle>;

    /// Fails with `CollectionNotFound` when absent
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Fails with `CollectionNotFound` when absent
    async fn get_collection(&self, name: &str) -> Result<CollectionHandle>;

    async fn list_collections(&self) -> Result<Vec<CollectionHandle>>;

    async fn add(&self, collection: &CollectionHandle, batch: AddBatch) -> Result<()>;

    /// Up to `k` records nearest to `embedding`, ascending by distance
    async fn query(&self, collection: &CollectionHandle, embedding: &[f32], k: usize) -> Result<QueryResult>;

    /// Records whose metadata equals every key/value in `filter`
    async fn get(
        &self,
        collection: &CollectionHandle,
        filter: Option<Metadata>,
        limit: Option<usize>,
    ) -> Result<GetResult>;

    /// Liveness check
    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }
}

/// Create a vector store based on configuration
pub fn create_vector_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.provider.as_str() {
        "chroma" => Ok(Arc::new(ChromaStore::from_config(config)?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(AppError::configuration(format!(
            "unknown vector store provider '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn record(i: usize) -> ChunkRecord {
        ChunkRecord {
            id: format!("abc-{}", i),
            chunk: Chunk {
                source_name: "abc".into(),
                sequence_index: i,
                text: format!("chunk {}", i),
            },
            embedding: vec![i as f32, 1.0],
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_from_records_keeps_order() {
        let batch = AddBatch::from_records(&[record(0), record(1), record(2)]);
        assert_eq!(batch.ids, vec!["abc-0", "abc-1", "abc-2"]);
        assert_eq!(batch.documents[2], "chunk 2");
        assert!(batch.validate("c").is_ok());
    }

    #[test]
    fn test_misaligned_batch() {
        let mut batch = AddBatch::from_records(&[record(0), record(1)]);
        batch.metadatas.pop();
        let err = batch.validate("char-split-collection").unwrap_err();
        assert!(matches!(err, AppError::MalformedBatch { .. }));
        assert!(err.to_string().contains("metadatas=1"));
    }
}
