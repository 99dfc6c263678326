//! Error types

use thiserror::Error;

use crate::Venue;

/// Push transport errors. These only drive the reconnect loop.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Feed disconnected")]
    Disconnected,

    #[error("Heartbeat not sent within {0}ms")]
    HeartbeatTimeout(u64),

    #[error("No frames received for {0}ms")]
    IdleTimeout(u64),

    #[error("Failed to send frame: {0}")]
    SendFailed(String),
}

/// Origin fetch errors from pollers and coalesced reads
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid response payload: {0}")]
    Parse(String),

    #[error("No fetch source registered for {0}")]
    NoSource(Venue),

    #[error("Market not found: {0}")]
    NotFound(String),
}

/// Subscriber delivery errors; logged by the cache, never propagated
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Listener channel closed")]
    Closed,

    #[error("Listener failed: {0}")]
    Failed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown venue: {0}")]
    InvalidVenue(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias
pub type FeedResult<T> = Result<T, FeedError>;
pub type FetchResult<T> = Result<T, FetchError>;
