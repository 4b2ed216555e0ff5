//! Error types for Synheart Relay

use thiserror::Error;

/// Errors that can occur while syncing a workout between endpoints
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authorization refused: {0}")]
    AuthorizationError(String),

    #[error("Unable to start workout session: {0}")]
    SessionInitError(String),

    #[error("Link unavailable: {0}")]
    LinkUnavailable(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Time-series source error: {0}")]
    SourceError(String),

    #[error("Endpoint stopped")]
    EndpointClosed,
}
