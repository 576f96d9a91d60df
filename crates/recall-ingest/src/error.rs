//! Error types for the ingestion pipeline
//!
//! Each collaborator has its own error so the pipeline can decide what is
//! fatal to a run. Fetch and notify failures are absorbed into the run
//! summary; store failures abort the run and roll back its batch.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while requesting a page from the recall source
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Source returned HTTP {status}")]
    Status { status: u16 },

    #[error("Undecodable response body: {0}")]
    Decode(String),

    #[error("Invalid source configuration: {0}")]
    Config(String),
}

impl FetchError {
    /// Network trouble, timeouts, 5xx and rate limiting.
    ///
    /// Other failures (4xx, bad bodies) are counted against the same
    /// consecutive-failure ceiling, but are logged as non-transient.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Transport(_) => true,
            FetchError::Status { status } => *status == 429 || *status >= 500,
            FetchError::Decode(_) | FetchError::Config(_) => false,
        }
    }
}

/// Errors raised by a recall store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while reporting a batch downstream
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Cross-reference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Undecodable match response: {0}")]
    Decode(String),

    #[error("Invalid notifier configuration: {0}")]
    Config(String),
}
