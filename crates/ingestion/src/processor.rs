//! Ingestion orchestrator
//!
//! One run: chunk every document, assign ids, embed the whole corpus, and
//! only then replace the method's collection. An embedding failure leaves the
//! previous collection untouched.

use crate::chunker::Chunker;
use chrono::{DateTime, Utc};
use chunkforge_common::config::ChunkingConfig;
use chunkforge_common::{
    assign_id, metrics, AppError, Chunk, ChunkRecord, ChunkingMethod, CollectionManager, Document, Embedder,
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Per-file line of an ingestion report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub source_name: String,
    pub chunks_count: usize,
    pub size_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub method: ChunkingMethod,
    pub collection_name: String,
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_inserted: usize,
    pub embeddings_generated: usize,
    pub processed_files: Vec<ProcessedFile>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct IngestionOrchestrator {
    embedder: Arc<Embedder>,
    semantic_embedder: Arc<Embedder>,
    collections: CollectionManager,
    chunking: ChunkingConfig,
}

impl IngestionOrchestrator {
    /// `semantic_batch_size` applies to embedding calls made for the semantic method
    pub fn new(
        embedder: Arc<Embedder>,
        semantic_batch_size: usize,
        collections: CollectionManager,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        let semantic_embedder = Arc::new(embedder.with_batch_size(semantic_batch_size)?);
        Ok(Self {
            embedder,
            semantic_embedder,
            collections,
            chunking,
        })
    }

    /// Embedder used for `method`'s chunks
    pub fn embedder_for(&self, method: ChunkingMethod) -> &Arc<Embedder> {
        match method {
            ChunkingMethod::SemanticSplit => &self.semantic_embedder,
            _ => &self.embedder,
        }
    }

    /// Chunk documents without embedding or storing anything
    pub async fn chunk_documents(&self, documents: &[Document], method: ChunkingMethod) -> Result<Vec<Vec<Chunk>>> {
        let chunker = Chunker::for_method(method, &self.chunking, self.embedder_for(method).clone())?;
        let mut per_document = Vec::with_capacity(documents.len());
        for document in documents {
            per_document.push(chunker.chunk_document(document).await?);
        }
        Ok(per_document)
    }

    #[instrument(skip(self, documents), fields(documents = documents.len(), method = %method))]
    pub async fn ingest(&self, documents: &[Document], method: ChunkingMethod) -> Result<IngestionReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        if documents.is_empty() {
            return Err(AppError::validation("no documents to ingest"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = documents.iter().find(|d| !seen.insert(d.source_name.as_str())) {
            return Err(AppError::Validation {
                message: format!("source name '{}' appears more than once in this run", dup.source_name),
                field: Some("source_name".to_string()),
            });
        }

        let collection_name = method.collection_name();

        // (a) chunk
        let per_document = self
            .chunk_documents(documents, method)
            .await
            .map_err(|e| e.for_collection(&collection_name))?;

        // (b) ids and metadata
        let mut processed_files = Vec::with_capacity(documents.len());
        let mut pending: Vec<(String, Chunk, chunkforge_common::Metadata)> = Vec::new();
        for (document, chunks) in documents.iter().zip(per_document) {
            processed_files.push(ProcessedFile {
                source_name: document.source_name.clone(),
                chunks_count: chunks.len(),
                size_bytes: document.text.len(),
                location: document.location.clone(),
            });
            let metadata = document.record_metadata();
            for chunk in chunks {
                let id = assign_id(&chunk.source_name, chunk.sequence_index);
                pending.push((id, chunk, metadata.clone()));
            }
        }
        let total_chunks = pending.len();
        info!(total_chunks, "Chunking complete");

        // (c) embed the whole corpus before touching the collection
        let texts: Vec<String> = pending.iter().map(|(_, chunk, _)| chunk.text.clone()).collect();
        let embeddings = self
            .embedder_for(method)
            .embed_batch(&texts)
            .await
            .map_err(|e| e.for_collection(&collection_name))?;
        if embeddings.len() != total_chunks {
            return Err(AppError::MalformedBatch {
                collection: collection_name,
                message: format!("{} chunks but {} embeddings", total_chunks, embeddings.len()),
            });
        }
        let embeddings_generated = embeddings.len();

        let records: Vec<ChunkRecord> = pending
            .into_iter()
            .zip(embeddings)
            .map(|((id, chunk, metadata), embedding)| ChunkRecord {
                id,
                chunk,
                embedding,
                metadata,
            })
            .collect();

        // (d) replace, (e) insert
        let handle = self.collections.ensure_fresh(&collection_name).await?;
        let total_inserted = self.collections.insert_batch(&handle, &records).await?;

        metrics::record_ingestion(start.elapsed().as_secs_f64(), method.as_str(), total_chunks, total_inserted);
        info!(
            collection = %collection_name,
            total_files = documents.len(),
            total_chunks,
            total_inserted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Ingestion complete"
        );

        Ok(IngestionReport {
            method,
            collection_name,
            total_files: documents.len(),
            total_chunks,
            total_inserted,
            embeddings_generated,
            processed_files,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
