//! In-process vector store with brute-force cosine search

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AddBatch, VectorStore};
use crate::errors::{AppError, Result};
use crate::models::{CollectionHandle, GetResult, Metadata, QueryResult};

#[derive(Debug, Clone)]
struct StoredRecord {
    id: String,
    document: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

#[derive(Debug)]
struct MemoryCollection {
    id: String,
    dimension: Option<usize>,
    records: Vec<StoredRecord>,
}

/// Collections held in process memory. Used for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 1 - cosine similarity; zero vectors are maximally distant
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

fn lookup<'a>(
    collections: &'a HashMap<String, MemoryCollection>,
    handle: &CollectionHandle,
) -> Result<&'a MemoryCollection> {
    collections
        .get(&handle.name)
        .filter(|c| c.id == handle.id)
        .ok_or_else(|| AppError::CollectionNotFound {
            name: handle.name.clone(),
        })
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn create_collection(&self, name: &str, _metadata: Metadata) -> Result<CollectionHandle> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(AppError::VectorStore {
                collection: name.to_string(),
                message: "collection already exists".to_string(),
            });
        }
        let id = Uuid::new_v4().to_string();
        collections.insert(
            name.to_string(),
            MemoryCollection {
                id: id.clone(),
                dimension: None,
                records: Vec::new(),
            },
        );
        Ok(CollectionHandle {
            name: name.to_string(),
            id,
        })
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AppError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    async fn get_collection(&self, name: &str) -> Result<CollectionHandle> {
        let collections = self.collections.read().await;
        collections
            .get(name)
            .map(|c| CollectionHandle {
                name: name.to_string(),
                id: c.id.clone(),
            })
            .ok_or_else(|| AppError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
        let collections = self.collections.read().await;
        let mut handles: Vec<CollectionHandle> = collections
            .iter()
            .map(|(name, c)| CollectionHandle {
                name: name.clone(),
                id: c.id.clone(),
            })
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(handles)
    }

    async fn add(&self, handle: &CollectionHandle, batch: AddBatch) -> Result<()> {
        batch.validate(&handle.name)?;

        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&handle.name)
            .filter(|c| c.id == handle.id)
            .ok_or_else(|| AppError::CollectionNotFound {
                name: handle.name.clone(),
            })?;

        // The first insert fixes the dimension, but only once the whole batch agrees
        let expected = collection
            .dimension
            .or_else(|| batch.embeddings.first().map(Vec::len));
        if let Some(expected) = expected {
            if let Some(bad) = batch.embeddings.iter().find(|e| e.len() != expected) {
                return Err(AppError::VectorStore {
                    collection: handle.name.clone(),
                    message: format!(
                        "embedding dimension {} does not match collection dimension {}",
                        bad.len(),
                        expected
                    ),
                });
            }
            collection.dimension = Some(expected);
        }

        let AddBatch {
            ids,
            documents,
            metadatas,
            embeddings,
        } = batch;
        for (((id, document), metadata), embedding) in
            ids.into_iter().zip(documents).zip(metadatas).zip(embeddings)
        {
            let record = StoredRecord {
                id,
                document,
                metadata,
                embedding,
            };
            match collection.records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => collection.records.push(record),
            }
        }
        Ok(())
    }

    async fn query(&self, handle: &CollectionHandle, embedding: &[f32], k: usize) -> Result<QueryResult> {
        let collections = self.collections.read().await;
        let collection = lookup(&collections, handle)?;

        let mut scored: Vec<(f32, &StoredRecord)> = collection
            .records
            .iter()
            .map(|r| (cosine_distance(embedding, &r.embedding), r))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(k);

        let mut result = QueryResult::default();
        for (distance, record) in scored {
            result.ids.push(record.id.clone());
            result.documents.push(record.document.clone());
            result.metadatas.push(record.metadata.clone());
            result.distances.push(distance);
        }
        Ok(result)
    }

    async fn get(
        &self,
        handle: &CollectionHandle,
        filter: Option<Metadata>,
        limit: Option<usize>,
    ) -> Result<GetResult> {
        let collections = self.collections.read().await;
        let collection = lookup(&collections, handle)?;
        let filter = filter.unwrap_or_default();

        let mut result = GetResult::default();
        for record in collection
            .records
            .iter()
            .filter(|r| filter.iter().all(|(k, v)| r.metadata.get(k) == Some(v)))
            .take(limit.unwrap_or(usize::MAX))
        {
            result.ids.push(record.id.clone());
            result.documents.push(record.document.clone());
            result.metadatas.push(record.metadata.clone());
        }
        Ok(result)
    }
}
