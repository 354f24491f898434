//! # Structured Error Handling
//!
//! Crate-level error type for the ingestion pipeline. Queue-transport
//! errors have their own taxonomy in [`crate::messaging::errors`] and are
//! wrapped here at component boundaries.

use crate::messaging::MessagingError;
use thiserror::Error;

/// Top-level error type for pipeline components.
#[derive(Debug, Error)]
pub enum IngestCoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid status value: {0}")]
    InvalidStatus(String),
}

impl IngestCoreError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, IngestCoreError>;
