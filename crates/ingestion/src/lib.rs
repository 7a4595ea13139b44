//! ChunkForge ingestion
//!
//! Turns source documents into a freshly built vector collection:
//! chunk, assign ids, embed everything, then replace the collection.

pub mod chunker;
pub mod processor;
pub mod sources;

pub use chunker::Chunker;
pub use processor::{IngestionOrchestrator, IngestionReport, ProcessedFile};
pub use sources::{DocumentSource, GcsBucketSource, LocalDirectorySource};
