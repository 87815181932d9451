//! Typed errors for the storage seam and the header guard.
//!
//! Everything above these seams uses `anyhow` with context, matching the rest
//! of the crate; these two enums exist because callers branch on the variant.

use std::time::Duration;

use thiserror::Error;

use crate::model::EntityKind;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {key} not found")]
    NotFound { entity: &'static str, key: String },
    #[error("unique constraint violated on {field}: '{value}' already exists")]
    UniqueViolation { field: &'static str, value: String },
    #[error("{0} entities are read-only and cannot be created")]
    Immutable(EntityKind),
    #[error("storage operation '{operation}' timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Faults that affect the storage layer as a whole rather than the row
    /// being written. These end the current batch.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Input has no header row")]
    Empty,
    #[error("Missing required column(s): {}", .0.join(", "))]
    MissingRequired(Vec<String>),
}
