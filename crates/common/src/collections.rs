//! Collection lifecycle
//!
//! Every ingestion run replaces its collection wholesale. Nothing outside
//! this manager creates, deletes or writes to a collection.

use std::sync::Arc;
use tracing::instrument;

use crate::errors::{AppError, Result};
use crate::models::{ChunkRecord, CollectionHandle, Metadata};
use crate::vectorstore::{AddBatch, VectorStore, SPACE_KEY};

/// Records per `add` call unless configured otherwise
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct CollectionManager {
    store: Arc<dyn VectorStore>,
    insert_batch_size: usize,
}

impl CollectionManager {
    pub fn new(store: Arc<dyn VectorStore>, insert_batch_size: usize) -> Self {
        Self {
            store,
            insert_batch_size: insert_batch_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Delete `name` if it exists, then create it empty with cosine distance.
    ///
    /// Not atomic: a reader between the two calls sees `CollectionNotFound`.
    #[instrument(skip(self))]
    pub async fn ensure_fresh(&self, name: &str) -> Result<CollectionHandle> {
        match self.store.delete_collection(name).await {
            Ok(()) => tracing::info!(collection = name, "Dropped previous collection"),
            Err(AppError::CollectionNotFound { .. }) => {
                tracing::debug!(collection = name, "No previous collection to drop")
            }
            Err(e) => return Err(e),
        }

        let mut metadata = Metadata::new();
        metadata.insert(SPACE_KEY.to_string(), "cosine".into());
        self.store.create_collection(name, metadata).await
    }

    /// Fails with `CollectionNotFound` when absent; never creates
    pub async fn get(&self, name: &str) -> Result<CollectionHandle> {
        self.store.get_collection(name).await
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
        self.store.list_collections().await
    }

    /// Append records in `insert_batch_size` slices. Returns the number inserted.
    #[instrument(skip(self, records), fields(collection = %handle.name, records = records.len()))]
    pub async fn insert_batch(&self, handle: &CollectionHandle, records: &[ChunkRecord]) -> Result<usize> {
        let mut inserted = 0;
        for (index, slice) in records.chunks(self.insert_batch_size).enumerate() {
            let batch = AddBatch::from_records(slice);
            inserted += self.insert_arrays(handle, batch).await?;
            tracing::debug!(
                collection = %handle.name,
                batch = index,
                inserted,
                "Inserted batch"
            );
        }
        Ok(inserted)
    }

    /// Insert already-split parallel arrays. Lengths must agree.
    pub async fn insert_arrays(&self, handle: &CollectionHandle, batch: AddBatch) -> Result<usize> {
        batch.validate(&handle.name)?;
        let count = batch.len();
        if count == 0 {
            return Ok(0);
        }
        self.store.add(handle, batch).await?;
        Ok(count)
    }
}
