//! Text chunking module
//!
//! One [`Chunker`] per chunking method. Every strategy returns an empty
//! sequence for empty or whitespace-only text.

mod fixed;
mod recursive;
mod semantic;

pub use fixed::FixedWidthChunker;
pub use recursive::RecursiveChunker;
pub use semantic::SemanticChunker;

use chunkforge_common::config::ChunkingConfig;
use chunkforge_common::{Chunk, ChunkingMethod, Document, Embedder, Result};
use std::sync::Arc;
use tracing::debug;

pub enum Chunker {
    FixedWidth(FixedWidthChunker),
    Recursive(RecursiveChunker),
    Semantic(SemanticChunker),
}

impl Chunker {
    /// Build the chunker for `method`. `embedder` is only used by the semantic strategy.
    pub fn for_method(method: ChunkingMethod, config: &ChunkingConfig, embedder: Arc<Embedder>) -> Result<Self> {
        Ok(match method {
            ChunkingMethod::CharSplit => {
                Chunker::FixedWidth(FixedWidthChunker::new(config.chunk_size, config.chunk_overlap)?)
            }
            ChunkingMethod::RecursiveSplit => Chunker::Recursive(RecursiveChunker::new(
                config.recursive_chunk_size,
                config.recursive_chunk_overlap,
            )?),
            ChunkingMethod::SemanticSplit => Chunker::Semantic(SemanticChunker::new(
                embedder,
                config.semantic_buffer_size,
                config.semantic_breakpoint_percentile,
            )?),
        })
    }

    pub fn method(&self) -> ChunkingMethod {
        match self {
            Chunker::FixedWidth(_) => ChunkingMethod::CharSplit,
            Chunker::Recursive(_) => ChunkingMethod::RecursiveSplit,
            Chunker::Semantic(_) => ChunkingMethod::SemanticSplit,
        }
    }

    /// Split `text` into ordered spans
    pub async fn split(&self, text: &str) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Chunker::FixedWidth(c) => Ok(c.split(text)),
            Chunker::Recursive(c) => Ok(c.split(text)),
            Chunker::Semantic(c) => c.split(text).await,
        }
    }

    /// Split a document, tagging each span with its source and position
    pub async fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>> {
        let spans = self.split(&document.text).await?;

        debug!(
            source = %document.source_name,
            method = %self.method(),
            input_len = document.text.len(),
            chunk_count = spans.len(),
            "Text chunked"
        );

        Ok(spans
            .into_iter()
            .enumerate()
            .map(|(sequence_index, text)| Chunk {
                source_name: document.source_name.clone(),
                sequence_index,
                text,
            })
            .collect())
    }
}
