use std::time::Duration;

use thiserror::Error;

/// Failures raised by a [`crate::transport::Transport`] before any HTTP status is seen.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Per-product (or per-listing) failure. Never fatal to the batch.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("transport error for {url} after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: usize,
        #[source]
        source: TransportError,
    },
    #[error("blocked with status {status} for {url} after {attempts} attempt(s)")]
    Blocked {
        url: String,
        status: u16,
        attempts: usize,
    },
    #[error("unexpected status {status} for {url} after {attempts} attempt(s)")]
    Status {
        url: String,
        status: u16,
        attempts: usize,
    },
    #[error("malformed document from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl ItemError {
    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. }
            | Self::Blocked { url, .. }
            | Self::Status { url, .. }
            | Self::Malformed { url, .. } => url,
        }
    }
}

/// Destination unwritable. Halts the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("encode record {rpc:?}: {source}")]
    Encode {
        rpc: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sink lock poisoned")]
    Poisoned,
}
