//! Query, chat and collection handlers

use axum::{extract::State, Json};
use chunkforge_common::{errors::Result, ChunkingMethod, CollectionHandle, QueryResult};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{default_method, validation_error};
use crate::AppState;

/// Query or chat request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 10000))]
    pub query: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// Defaults to the configured k for the endpoint; bounded by `search.max_results`
    pub n_results: Option<usize>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub status: String,
    pub query: String,
    pub method: ChunkingMethod,
    pub results: QueryResult,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub status: String,
    pub query: String,
    pub method: ChunkingMethod,
    pub response: String,
    pub context_chunks_count: usize,
}

#[derive(Serialize)]
pub struct CollectionsResponse {
    pub status: String,
    pub collections: Vec<CollectionHandle>,
}

/// Nearest chunks for a query
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<QueryResponse>> {
    request.validate().map_err(validation_error)?;
    let method: ChunkingMethod = request.method.parse()?;
    let k = request.n_results.unwrap_or(state.config.search.query_results);

    let results = state.engine.query(&request.query, method, k).await?;

    Ok(Json(QueryResponse {
        status: "success".to_string(),
        query: request.query,
        method,
        results,
    }))
}

/// Retrieval-augmented answer
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<ChatResponse>> {
    request.validate().map_err(validation_error)?;
    let method: ChunkingMethod = request.method.parse()?;
    let k = request.n_results.unwrap_or(state.config.search.chat_results);

    let answer = state.engine.chat(&request.query, method, k).await?;

    Ok(Json(ChatResponse {
        status: "success".to_string(),
        query: request.query,
        method,
        response: answer.response,
        context_chunks_count: answer.context_chunks_count,
    }))
}

/// Every collection in the vector store
pub async fn list_collections(State(state): State<AppState>) -> Result<Json<CollectionsResponse>> {
    let collections = state.engine.list_collections().await?;
    Ok(Json(CollectionsResponse {
        status: "success".to_string(),
        collections,
    }))
}
