//! Ingestion trigger

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use chunkforge_common::{errors::Result, ChunkingMethod};
use chunkforge_ingestion::{DocumentSource, GcsBucketSource, ProcessedFile};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::{default_method, validation_error};
use crate::AppState;

/// Ingest every `.txt` object under a bucket prefix
#[derive(Debug, Deserialize, Validate)]
pub struct ProcessBucketRequest {
    #[validate(length(min = 3, max = 222))]
    pub bucket_name: String,

    #[serde(default)]
    pub folder_path: String,

    #[serde(default = "default_method")]
    pub method: String,
}

#[derive(Debug, Serialize)]
pub struct ProcessBucketResponse {
    pub status: String,
    pub method: ChunkingMethod,
    pub bucket_name: String,
    pub folder_path: String,
    pub chunking: ChunkingSummary,
    pub embedding: EmbeddingSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ChunkingSummary {
    pub total_files: usize,
    pub total_chunks: usize,
    pub processed_files: Vec<ProcessedFile>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingSummary {
    pub collection_name: String,
    pub total_inserted: usize,
    pub embeddings_generated: usize,
}

/// Download, chunk, embed and load one bucket prefix, replacing the method's collection
pub async fn process_bucket(
    State(state): State<AppState>,
    Json(request): Json<ProcessBucketRequest>,
) -> Result<Json<ProcessBucketResponse>> {
    request.validate().map_err(validation_error)?;
    let method: ChunkingMethod = request.method.parse()?;

    let source = GcsBucketSource::new(&state.config.storage, &request.bucket_name, &request.folder_path)?;
    info!(source = %source.describe(), method = %method, "Ingestion requested");

    let documents = source.load().await?;
    let report = state.ingestion.ingest(&documents, method).await?;

    Ok(Json(ProcessBucketResponse {
        status: "success".to_string(),
        method: report.method,
        bucket_name: request.bucket_name,
        folder_path: request.folder_path,
        chunking: ChunkingSummary {
            total_files: report.total_files,
            total_chunks: report.total_chunks,
            processed_files: report.processed_files,
        },
        embedding: EmbeddingSummary {
            collection_name: report.collection_name,
            total_inserted: report.total_inserted,
            embeddings_generated: report.embeddings_generated,
        },
        started_at: report.started_at,
        finished_at: report.finished_at,
    }))
}
