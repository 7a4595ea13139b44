//! Pipeline data model
//!
//! Documents come in, chunks and records flow through the pipeline, and query
//! results come back out of the vector store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

/// Free-form record metadata, stored alongside each vector
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Chunking strategy. Each method owns exactly one live collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingMethod {
    /// Fixed character window with overlap
    #[default]
    CharSplit,
    /// Separator hierarchy under a size bound
    RecursiveSplit,
    /// Embedding-similarity topic boundaries
    SemanticSplit,
}

impl ChunkingMethod {
    pub const ALL: [ChunkingMethod; 3] = [
        ChunkingMethod::CharSplit,
        ChunkingMethod::RecursiveSplit,
        ChunkingMethod::SemanticSplit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingMethod::CharSplit => "char-split",
            ChunkingMethod::RecursiveSplit => "recursive-split",
            ChunkingMethod::SemanticSplit => "semantic-split",
        }
    }

    /// Name of the collection holding this method's records
    pub fn collection_name(&self) -> String {
        format!("{}-collection", self.as_str())
    }
}

impl fmt::Display for ChunkingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkingMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChunkingMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| AppError::Validation {
                message: format!(
                    "unknown chunking method '{}', expected one of char-split, recursive-split, semantic-split",
                    s
                ),
                field: Some("method".to_string()),
            })
    }
}

/// A source document, already extracted to UTF-8 text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source_name: String,
    pub text: String,

    /// Where the text was read from (file path, object URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Source-level metadata copied onto every record (e.g. bucket, path)
    #[serde(default)]
    pub extras: Metadata,
}

impl Document {
    pub fn new(source_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            text: text.into(),
            location: None,
            extras: Metadata::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Record metadata: `source` plus the document extras
    pub fn record_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), self.source_name.clone().into());
        for (key, value) in &self.extras {
            metadata.insert(key.clone(), value.clone());
        }
        metadata
    }
}

/// A text span cut from one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub source_name: String,
    pub sequence_index: usize,
    pub text: String,
}

/// A chunk ready for the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// Nearest-neighbour result. All four sequences are index-aligned, nearest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub documents: Vec<String>,
    pub distances: Vec<f32>,
    pub metadatas: Vec<Metadata>,
    pub ids: Vec<String>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Result of a filtered `get`, unordered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
}

/// Reference to a live collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHandle {
    pub name: String,
    pub id: String,
}
