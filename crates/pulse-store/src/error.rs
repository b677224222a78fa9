//! Error types for the metric store.

use pulse_core::MetricKind;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has never been written. Drives the create branch.
    #[error("{kind} metric {name:?} not found")]
    NotFound { kind: MetricKind, name: String },

    #[error("counter {name:?} would overflow")]
    Overflow { name: String },

    #[error("backup error: {0}")]
    Backup(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn not_found(kind: MetricKind, name: &str) -> Self {
        StoreError::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
