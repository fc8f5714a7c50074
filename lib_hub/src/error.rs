//! # Hub Errors
//!
//! A single error type shared by the registry, relay, broker and HTTP layers.

use thiserror::Error;

/// Custom error types for hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("Broker unreachable after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Malformed envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Envelope has an empty target connection id")]
    EmptyTarget,

    #[error("Invalid connection id in request path: {0}")]
    InvalidConnectionId(String),

    #[error("Connection {0} is closed")]
    ConnectionClosed(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
