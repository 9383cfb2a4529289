//! Common error types for modelsync

use thiserror::Error;

/// Common result type for modelsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the modelsync pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Every extraction strategy came up empty for a fetched document
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// Reconciling would publish a new entity with too few required fields
    #[error("Incomplete entity '{entity_id}': {missing} required field(s) missing")]
    IncompleteEntity { entity_id: String, missing: usize },

    /// A field update fell outside the sanity envelope and was rejected
    #[error("Anomaly rejected for '{entity_id}.{field}': {detail}")]
    AnomalyRejected {
        entity_id: String,
        field: String,
        detail: String,
    },

    /// Upstream fetch timed out or returned a non-success status
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl Error {
    /// True for errors that a sync task must absorb locally rather than
    /// letting them abort the run (per-entity and per-field failures).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::IncompleteEntity { .. } | Error::AnomalyRejected { .. }
        )
    }
}
