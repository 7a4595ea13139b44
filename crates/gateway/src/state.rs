//! Shared handler state

use chunkforge_common::embeddings::create_embedding_provider;
use chunkforge_common::generation::create_generator;
use chunkforge_common::vectorstore::create_vector_store;
use chunkforge_common::{
    AppConfig, CollectionManager, Embedder, EmbeddingProvider, Generator, Result, VectorStore,
};
use chunkforge_ingestion::IngestionOrchestrator;
use chunkforge_search::QueryEngine;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn VectorStore>,
    pub ingestion: Arc<IngestionOrchestrator>,
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    /// Build every capability from configuration
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let provider = create_embedding_provider(&config.embedding)?;
        let store = create_vector_store(&config.vector_store)?;
        let generator = create_generator(&config.generation)?;
        Self::with_capabilities(config, provider, store, generator)
    }

    /// Wire the pipeline around the given capabilities
    pub fn with_capabilities(
        config: AppConfig,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config.validate()?;

        let embedder = Arc::new(Embedder::from_config(provider, &config.embedding)?);
        let collections = CollectionManager::new(store.clone(), config.vector_store.insert_batch_size);

        let ingestion = IngestionOrchestrator::new(
            embedder.clone(),
            config.embedding.semantic_batch_size,
            collections.clone(),
            config.chunking.clone(),
        )?;
        let engine = QueryEngine::new(
            embedder,
            collections,
            generator,
            config.generation.system_instruction.clone(),
            config.search.max_results,
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            ingestion: Arc::new(ingestion),
            engine: Arc::new(engine),
        })
    }
}
