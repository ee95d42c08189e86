//! Transport-level error types.

use thiserror::Error;

use scindex_core::error::IndexerError;

use crate::request::JsonRpcError;

/// Daemon messages meaning "this height is not stored here".
const HEIGHT_NOT_FOUND_PHRASES: [&str; 3] = ["empty block", "file does not exist", "not found"];

/// Daemon messages refusing a full variable dump.
const VARIABLE_LIMIT_PHRASES: [&str; 2] = [
    "max 1024 variables can be returned",
    "namesc cannot request all variables",
];

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// No channel is open; `connect` has not succeeded yet.
    #[error("not connected to daemon")]
    NotConnected,

    /// JSON-RPC protocol-level error returned by the daemon.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The daemon does not hold the requested height.
    #[error("height {height} not found on daemon")]
    HeightNotFound { height: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Classify a daemon error returned for a height-addressed request.
    pub fn for_height(err: JsonRpcError, height: u64) -> Self {
        if HEIGHT_NOT_FOUND_PHRASES
            .iter()
            .any(|p| err.message.contains(p))
        {
            Self::HeightNotFound { height }
        } else {
            Self::Rpc(err)
        }
    }

    /// Returns `true` if the daemon refused to return every variable.
    pub fn is_variable_limit(&self) -> bool {
        match self {
            Self::Rpc(e) => VARIABLE_LIMIT_PHRASES.iter().any(|p| e.message.contains(p)),
            _ => false,
        }
    }

    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WebSocket(_) | Self::NotConnected => true,
            Self::Rpc(_) => !self.is_variable_limit(),
            Self::HeightNotFound { .. } | Self::Deserialization(_) | Self::Other(_) => false,
        }
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::WebSocket(msg) => IndexerError::Connection(msg),
            TransportError::NotConnected => IndexerError::Connection("not connected to daemon".into()),
            TransportError::Rpc(err) => IndexerError::Rpc(err.to_string()),
            TransportError::HeightNotFound { height } => IndexerError::HeightUnavailable { height },
            TransportError::Deserialization(err) => IndexerError::Decode(err.to_string()),
            TransportError::Other(msg) => IndexerError::Other(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_err(message: &str) -> JsonRpcError {
        JsonRpcError {
            code: -32098,
            message: message.into(),
            data: None,
        }
    }

    #[test]
    fn height_phrases_become_typed() {
        for msg in [
            "open /data/mainnet/balances/0001.db: file does not exist",
            "leaf not found",
            "empty block",
        ] {
            let err = TransportError::for_height(rpc_err(msg), 42);
            assert!(matches!(err, TransportError::HeightNotFound { height: 42 }));
            assert!(!err.is_retryable());
            assert!(IndexerError::from(err).is_height_unavailable());
        }

        let other = TransportError::for_height(rpc_err("internal error"), 42);
        assert!(matches!(other, TransportError::Rpc(_)));
        assert!(other.is_retryable());
    }

    #[test]
    fn variable_limit_is_not_retried() {
        let err = TransportError::Rpc(rpc_err("max 1024 variables can be returned"));
        assert!(err.is_variable_limit());
        assert!(!err.is_retryable());
        assert!(TransportError::WebSocket("reset".into()).is_retryable());
    }
}
