//! API handlers module

pub mod health;
pub mod ingest;
pub mod search;

use chunkforge_common::{AppError, ChunkingMethod};
use validator::ValidationErrors;

fn default_method() -> String {
    ChunkingMethod::default().as_str().to_string()
}

fn validation_error(errors: ValidationErrors) -> AppError {
    AppError::Validation {
        message: errors.to_string(),
        field: errors.field_errors().keys().next().map(|k| k.to_string()),
    }
}
