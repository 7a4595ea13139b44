//! Chroma client over the v1 REST API

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::instrument;

use super::{AddBatch, VectorStore};
use crate::config::VectorStoreConfig;
use crate::errors::{AppError, Result};
use crate::models::{CollectionHandle, GetResult, Metadata, QueryResult};

pub struct ChromaStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CollectionModel {
    id: String,
    name: String,
}

impl From<CollectionModel> for CollectionHandle {
    fn from(model: CollectionModel) -> Self {
        CollectionHandle {
            name: model.name,
            id: model.id,
        }
    }
}

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    metadata: Metadata,
    get_or_create: bool,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: [&'a [f32]; 1],
    n_results: usize,
    include: [&'static str; 3],
}

/// Chroma nests every field one level per query embedding
#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
}

#[derive(Serialize)]
struct GetRequest {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    where_: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    include: [&'static str; 2],
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Metadata>>>,
}

impl ChromaStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        Self::new(&config.url, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Turn a non-success response into an error for `collection`
    async fn check(response: reqwest::Response, collection: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND || body.contains("does not exist") {
            return Err(AppError::CollectionNotFound {
                name: collection.to_string(),
            });
        }
        Err(AppError::VectorStore {
            collection: collection.to_string(),
            message: format!("HTTP {}: {}", status, body),
        })
    }

    fn transport(err: reqwest::Error, collection: &str) -> AppError {
        AppError::VectorStore {
            collection: collection.to_string(),
            message: format!("request failed: {}", err),
        }
    }
}

/// Chroma's `where` clause: a single equality, or `$and` over several
fn where_clause(filter: Metadata) -> Option<Value> {
    match filter.len() {
        0 => None,
        1 => Some(Value::Object(filter)),
        _ => {
            let terms: Vec<Value> = filter
                .into_iter()
                .map(|(key, value)| {
                    let mut term = Metadata::new();
                    term.insert(key, value);
                    Value::Object(term)
                })
                .collect();
            Some(json!({ "$and": terms }))
        }
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    #[instrument(skip(self, metadata))]
    async fn create_collection(&self, name: &str, metadata: Metadata) -> Result<CollectionHandle> {
        let request = CreateCollectionRequest {
            name,
            metadata,
            get_or_create: false,
        };
        let response = self
            .client
            .post(self.url("/collections"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::transport(e, name))?;

        let model: CollectionModel = Self::check(response, name)
            .await?
            .json()
            .await
            .map_err(|e| Self::transport(e, name))?;

        tracing::info!(collection = %model.name, id = %model.id, "Created collection");
        Ok(model.into())
    }

    #[instrument(skip(self))]
    async fn delete_collection(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(|e| Self::transport(e, name))?;

        Self::check(response, name).await?;
        tracing::info!(collection = name, "Deleted collection");
        Ok(())
    }

    async fn get_collection(&self, name: &str) -> Result<CollectionHandle> {
        let response = self
            .client
            .get(self.url(&format!("/collections/{}", name)))
            .send()
            .await
            .map_err(|e| Self::transport(e, name))?;

        let model: CollectionModel = Self::check(response, name)
            .await?
            .json()
            .await
            .map_err(|e| Self::transport(e, name))?;
        Ok(model.into())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
        let response = self
            .client
            .get(self.url("/collections"))
            .send()
            .await
            .map_err(|e| Self::transport(e, "*"))?;

        let models: Vec<CollectionModel> = Self::check(response, "*")
            .await?
            .json()
            .await
            .map_err(|e| Self::transport(e, "*"))?;
        Ok(models.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, batch), fields(collection = %collection.name, records = batch.len()))]
    async fn add(&self, collection: &CollectionHandle, batch: AddBatch) -> Result<()> {
        batch.validate(&collection.name)?;

        let response = self
            .client
            .post(self.url(&format!("/collections/{}/add", collection.id)))
            .json(&batch)
            .send()
            .await
            .map_err(|e| Self::transport(e, &collection.name))?;

        Self::check(response, &collection.name).await?;
        Ok(())
    }

    #[instrument(skip(self, embedding), fields(collection = %collection.name))]
    async fn query(&self, collection: &CollectionHandle, embedding: &[f32], k: usize) -> Result<QueryResult> {
        let request = QueryRequest {
            query_embeddings: [embedding],
            n_results: k,
            include: ["documents", "metadatas", "distances"],
        };
        let response = self
            .client
            .post(self.url(&format!("/collections/{}/query", collection.id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::transport(e, &collection.name))?;

        let body: QueryResponse = Self::check(response, &collection.name)
            .await?
            .json()
            .await
            .map_err(|e| Self::transport(e, &collection.name))?;

        let ids = body.ids.into_iter().next().unwrap_or_default();
        let n = ids.len();
        let documents = body
            .documents
            .and_then(|d| d.into_iter().next())
            .map(|d| d.into_iter().map(Option::unwrap_or_default).collect())
            .unwrap_or_else(|| vec![String::new(); n]);
        let distances = body
            .distances
            .and_then(|d| d.into_iter().next())
            .map(|d| d.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect())
            .unwrap_or_else(|| vec![f32::NAN; n]);
        let metadatas = body
            .metadatas
            .and_then(|m| m.into_iter().next())
            .map(|m| m.into_iter().map(Option::unwrap_or_default).collect())
            .unwrap_or_else(|| vec![Metadata::new(); n]);

        let result = QueryResult {
            documents,
            distances,
            metadatas,
            ids,
        };
        if result.documents.len() != n || result.distances.len() != n || result.metadatas.len() != n {
            return Err(AppError::MalformedBatch {
                collection: collection.name.clone(),
                message: "query response arrays differ in length".to_string(),
            });
        }
        Ok(result)
    }

    #[instrument(skip(self, filter), fields(collection = %collection.name))]
    async fn get(
        &self,
        collection: &CollectionHandle,
        filter: Option<Metadata>,
        limit: Option<usize>,
    ) -> Result<GetResult> {
        let request = GetRequest {
            where_: filter.and_then(where_clause),
            limit,
            include: ["documents", "metadatas"],
        };
        let response = self
            .client
            .post(self.url(&format!("/collections/{}/get", collection.id)))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::transport(e, &collection.name))?;

        let body: GetResponse = Self::check(response, &collection.name)
            .await?
            .json()
            .await
            .map_err(|e| Self::transport(e, &collection.name))?;

        let n = body.ids.len();
        Ok(GetResult {
            documents: body
                .documents
                .map(|d| d.into_iter().map(Option::unwrap_or_default).collect())
                .unwrap_or_else(|| vec![String::new(); n]),
            metadatas: body
                .metadatas
                .map(|m| m.into_iter().map(Option::unwrap_or_default).collect())
                .unwrap_or_else(|| vec![Metadata::new(); n]),
            ids: body.ids,
        })
    }

    async fn heartbeat(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("/heartbeat"))
            .send()
            .await
            .map_err(|e| Self::transport(e, "*"))?;
        Self::check(response, "*").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };

    async fn serve(app: Router) -> ChromaStore {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ChromaStore::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap()
    }

    fn handle() -> CollectionHandle {
        CollectionHandle {
            name: "char-split-collection".into(),
            id: "c0ffee".into(),
        }
    }

    #[tokio::test]
    async fn test_create_collection_sends_metric() {
        let app = Router::new().route(
            "/api/v1/collections",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["metadata"]["hnsw:space"], "cosine");
                assert_eq!(body["get_or_create"], false);
                Json(json!({"id": "c0ffee", "name": body["name"], "metadata": body["metadata"]}))
            }),
        );
        let store = serve(app).await;

        let mut metadata = Metadata::new();
        metadata.insert("hnsw:space".into(), "cosine".into());
        let handle = store
            .create_collection("char-split-collection", metadata)
            .await
            .unwrap();
        assert_eq!(handle, self::handle());
    }

    #[tokio::test]
    async fn test_missing_collection_maps_to_not_found() {
        let app = Router::new().route(
            "/api/v1/collections/{name}",
            get(|Path(name): Path<String>| async move {
                (
                    AxumStatus::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": format!("ValueError('Collection {} does not exist.')", name)})),
                )
            }),
        );
        let store = serve(app).await;

        let err = store.get_collection("semantic-split-collection").await.unwrap_err();
        match err {
            AppError::CollectionNotFound { name } => assert_eq!(name, "semantic-split-collection"),
            other => panic!("expected CollectionNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_unwraps_nested_arrays() {
        let app = Router::new().route(
            "/api/v1/collections/{id}/query",
            post(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(id, "c0ffee");
                assert_eq!(body["n_results"], 2);
                Json(json!({
                    "ids": [["a-0", "a-1"]],
                    "distances": [[0.1, 0.4]],
                    "documents": [["first", null]],
                    "metadatas": [[{"source": "a"}, null]],
                    "embeddings": null
                }))
            }),
        );
        let store = serve(app).await;

        let result = store.query(&handle(), &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(result.ids, vec!["a-0", "a-1"]);
        assert_eq!(result.distances, vec![0.1, 0.4]);
        assert_eq!(result.documents, vec!["first".to_string(), String::new()]);
        assert_eq!(result.metadatas[0]["source"], "a");
        assert!(result.metadatas[1].is_empty());
    }

    #[tokio::test]
    async fn test_get_builds_where_clause() {
        let app = Router::new().route(
            "/api/v1/collections/{id}/get",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["where"], json!({"source": "report"}));
                assert_eq!(body["limit"], 3);
                Json(json!({
                    "ids": ["r-0"],
                    "documents": ["text"],
                    "metadatas": [{"source": "report"}]
                }))
            }),
        );
        let store = serve(app).await;

        let mut filter = Metadata::new();
        filter.insert("source".into(), "report".into());
        let result = store.get(&handle(), Some(filter), Some(3)).await.unwrap();
        assert_eq!(result.ids, vec!["r-0"]);
        assert_eq!(result.documents, vec!["text"]);
    }

    #[test]
    fn test_where_clause_with_several_keys() {
        let mut filter = Metadata::new();
        filter.insert("bucket".into(), "docs".into());
        filter.insert("source".into(), "report".into());
        let clause = where_clause(filter).unwrap();
        assert_eq!(clause["$and"].as_array().unwrap().len(), 2);
        assert!(where_clause(Metadata::new()).is_none());
    }

    #[tokio::test]
    async fn test_add_rejects_misaligned_batch() {
        let store = ChromaStore::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let batch = AddBatch {
            ids: vec!["a-0".into()],
            documents: vec![],
            metadatas: vec![Metadata::new()],
            embeddings: vec![vec![1.0]],
        };
        let err = store.add(&handle(), batch).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedBatch { .. }));
    }
}
