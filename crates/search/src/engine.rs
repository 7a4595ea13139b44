//! Query engine

use crate::prompt::build_prompt;
use chunkforge_common::{
    metrics, AppError, ChunkingMethod, CollectionHandle, CollectionManager, Embedder, GetResult, Generator,
    Metadata, QueryResult, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

/// Generated answer plus how many retrieved chunks backed it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub response: String,
    pub context_chunks_count: usize,
}

pub struct QueryEngine {
    embedder: Arc<Embedder>,
    collections: CollectionManager,
    generator: Arc<dyn Generator>,
    system_instruction: String,
    max_results: usize,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<Embedder>,
        collections: CollectionManager,
        generator: Arc<dyn Generator>,
        system_instruction: impl Into<String>,
        max_results: usize,
    ) -> Self {
        Self {
            embedder,
            collections,
            generator,
            system_instruction: system_instruction.into(),
            max_results,
        }
    }

    fn validate(&self, text: &str, k: usize) -> Result<()> {
        if text.trim().is_empty() {
            return Err(AppError::Validation {
                message: "query must not be empty".to_string(),
                field: Some("query".to_string()),
            });
        }
        if k == 0 || k > self.max_results {
            return Err(AppError::Validation {
                message: format!("n_results must be between 1 and {}, got {}", self.max_results, k),
                field: Some("n_results".to_string()),
            });
        }
        Ok(())
    }

    async fn retrieve(&self, text: &str, method: ChunkingMethod, k: usize) -> Result<QueryResult> {
        self.validate(text, k)?;
        let handle = self.collections.get(&method.collection_name()).await?;
        let embedding = self.embedder.embed_query(text).await?;
        self.collections.store().query(&handle, &embedding, k).await
    }

    /// The `k` chunks nearest to `text` in the method's collection.
    /// `CollectionNotFound` if that method was never ingested.
    #[instrument(skip(self, text), fields(method = %method, k))]
    pub async fn query(&self, text: &str, method: ChunkingMethod, k: usize) -> Result<QueryResult> {
        let start = Instant::now();
        let result = self.retrieve(text, method, k).await?;
        metrics::record_query(start.elapsed().as_secs_f64(), method.as_str(), "query", result.len());
        info!(results = result.len(), "Query served");
        Ok(result)
    }

    /// Retrieve, then answer from the retrieved chunks only
    #[instrument(skip(self, text), fields(method = %method, k))]
    pub async fn chat(&self, text: &str, method: ChunkingMethod, k: usize) -> Result<ChatAnswer> {
        let start = Instant::now();
        let result = self.retrieve(text, method, k).await?;

        let prompt = build_prompt(&self.system_instruction, text, &result.documents);
        let response = self.generator.generate(&prompt).await?;

        metrics::record_query(start.elapsed().as_secs_f64(), method.as_str(), "chat", result.len());
        info!(
            context_chunks = result.len(),
            model = self.generator.model_name(),
            "Chat answered"
        );
        Ok(ChatAnswer {
            response,
            context_chunks_count: result.len(),
        })
    }

    /// Records matching an equality filter on metadata
    #[instrument(skip(self, filter), fields(method = %method))]
    pub async fn get(&self, method: ChunkingMethod, filter: Option<Metadata>, limit: Option<usize>) -> Result<GetResult> {
        let start = Instant::now();
        let handle = self.collections.get(&method.collection_name()).await?;
        let result = self.collections.store().get(&handle, filter, limit).await?;
        metrics::record_query(start.elapsed().as_secs_f64(), method.as_str(), "get", result.ids.len());
        Ok(result)
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionHandle>> {
        self.collections.list_collections().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::CONTEXT_SEPARATOR;
    use async_trait::async_trait;
    use chunkforge_common::config::ChunkingConfig;
    use chunkforge_common::embeddings::{EmbedOptions, MockEmbedder};
    use chunkforge_common::generation::EchoGenerator;
    use chunkforge_common::vectorstore::MemoryStore;
    use chunkforge_common::Document;
    use chunkforge_ingestion::IngestionOrchestrator;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Remembers the last prompt it was given
    #[derive(Default)]
    struct RecordingGenerator {
        last_prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            Ok("answer".to_string())
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn embedder() -> Arc<Embedder> {
        let options = EmbedOptions {
            dimension: 128,
            batch_size: 100,
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            concurrency: 1,
        };
        Arc::new(Embedder::new(Arc::new(MockEmbedder::default()), options).unwrap())
    }

    async fn ingested(generator: Arc<dyn Generator>) -> QueryEngine {
        let embedder = embedder();
        let collections = CollectionManager::new(Arc::new(MemoryStore::new()), 500);
        let chunking = ChunkingConfig {
            recursive_chunk_size: 60,
            recursive_chunk_overlap: 0,
            ..Default::default()
        };
        let orchestrator =
            IngestionOrchestrator::new(embedder.clone(), 15, collections.clone(), chunking).unwrap();
        let docs = vec![
            Document::new("pets", "Cats purr when they are content.\n\nDogs bark at the mail carrier."),
            Document::new("space", "Rockets burn fuel to reach orbit.\n\nSatellites circle the planet."),
        ];
        orchestrator.ingest(&docs, ChunkingMethod::RecursiveSplit).await.unwrap();

        QueryEngine::new(embedder, collections, generator, "Use the context.", 100)
    }

    #[tokio::test]
    async fn test_query_returns_nearest_first() {
        let engine = ingested(Arc::new(EchoGenerator)).await;
        let result = engine
            .query("why do cats purr", ChunkingMethod::RecursiveSplit, 2)
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.documents[0], "Cats purr when they are content.");
        assert!(result.distances[0] <= result.distances[1]);
        assert_eq!(result.metadatas[0]["source"], "pets");
    }

    #[tokio::test]
    async fn test_missing_collection_is_not_found() {
        let engine = ingested(Arc::new(EchoGenerator)).await;
        let err = engine
            .query("anything", ChunkingMethod::SemanticSplit, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CollectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_chat_prompt_carries_context_in_order() {
        let generator = Arc::new(RecordingGenerator::default());
        let engine = ingested(generator.clone()).await;

        let answer = engine
            .chat("rockets and orbit", ChunkingMethod::RecursiveSplit, 3)
            .await
            .unwrap();
        assert_eq!(answer.response, "answer");
        assert_eq!(answer.context_chunks_count, 3);

        let prompt = generator.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.starts_with("System: Use the context."));
        assert!(prompt.contains("User question:\nrockets and orbit"));
        let context = prompt.split("Context from retrieved text:\n").nth(1).unwrap();
        assert_eq!(context.split(CONTEXT_SEPARATOR).count(), 3);
        assert!(context.starts_with("Rockets burn fuel to reach orbit."));
    }

    #[tokio::test]
    async fn test_get_filters_by_source() {
        let engine = ingested(Arc::new(EchoGenerator)).await;
        let mut filter = Metadata::new();
        filter.insert("source".into(), "space".into());

        let result = engine
            .get(ChunkingMethod::RecursiveSplit, Some(filter), None)
            .await
            .unwrap();
        assert_eq!(result.ids.len(), 2);
        assert!(result.metadatas.iter().all(|m| m["source"] == "space"));
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let engine = ingested(Arc::new(EchoGenerator)).await;
        let err = engine.query("  ", ChunkingMethod::RecursiveSplit, 5).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        let err = engine.query("cats", ChunkingMethod::RecursiveSplit, 0).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_list_collections() {
        let engine = ingested(Arc::new(EchoGenerator)).await;
        let names: Vec<String> = engine
            .list_collections()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["recursive-split-collection"]);
    }
}
