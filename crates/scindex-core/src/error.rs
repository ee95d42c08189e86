//! Error types for the scindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    /// The daemon does not hold a block at this height (pruned history).
    #[error("Height {height} unavailable on daemon")]
    HeightUnavailable { height: u64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Signature validation failed: {0}")]
    Signature(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the daemon reported the requested height as missing.
    pub fn is_height_unavailable(&self) -> bool {
        matches!(self, Self::HeightUnavailable { .. })
    }
}
