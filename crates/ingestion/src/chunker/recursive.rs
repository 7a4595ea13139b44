use chunkforge_common::{AppError, Result};
use text_splitter::{ChunkConfig, TextSplitter};

/// Splits on the coarsest boundary that keeps spans under the size bound:
/// paragraphs, then lines, sentences, words, and finally characters.
pub struct RecursiveChunker {
    splitter: TextSplitter<text_splitter::Characters>,
}

impl RecursiveChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = ChunkConfig::new(chunk_size)
            .with_overlap(overlap)
            .map_err(|e| AppError::configuration(format!("invalid recursive-split settings: {}", e)))?;
        Ok(Self {
            splitter: TextSplitter::new(config),
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.splitter
            .chunks(text)
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}
