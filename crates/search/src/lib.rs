//! ChunkForge search
//!
//! Retrieval is pure vector distance: embed the query, take the k nearest
//! chunks, nearest first. Chat feeds those chunks to the generative model.

pub mod engine;
pub mod prompt;

pub use engine::{ChatAnswer, QueryEngine};
pub use prompt::{build_prompt, CONTEXT_SEPARATOR};
