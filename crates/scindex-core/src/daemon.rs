//! The upstream daemon surface consumed by the pipeline.
//!
//! [`DaemonClient`] is implemented over WebSocket JSON-RPC in `scindex-rpc`
//! and by scripted mocks in tests. Binary decoding of transactions is a
//! separate seam, [`WireCodec`], so the client never has to understand the
//! chain's serialization format itself.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{BlockData, ChainInfo, DecodedTransaction, ScState, ScValue, TransactionData};

/// Key selection for a `get_sc` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScQuery {
    /// Return code.
    pub code: bool,
    /// Return every variable.
    pub variables: bool,
    /// Return only these keys (used when full dumps are refused).
    pub keys: Vec<ScValue>,
}

impl ScQuery {
    /// Code and every variable.
    pub fn all() -> Self {
        Self {
            code: true,
            variables: true,
            keys: Vec::new(),
        }
    }

    /// Code plus the values of the given keys.
    pub fn keys(keys: Vec<ScValue>) -> Self {
        Self {
            code: true,
            variables: false,
            keys,
        }
    }
}

/// Remote procedures the indexer needs from a daemon.
///
/// Implementations own their retry policy: an `Err` means the call already
/// exhausted its retries and the caller decides whether to degrade or abort.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Dial (or confirm) the daemon connection.
    async fn connect(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Tear down the connection.
    async fn close(&self) {}

    async fn get_info(&self) -> Result<ChainInfo, IndexerError>;

    /// Block hash at `height`. Returns [`IndexerError::HeightUnavailable`]
    /// when the daemon no longer holds that height.
    async fn get_block_hash(&self, height: u64) -> Result<String, IndexerError>;

    async fn get_block(&self, hash: &str, height: u64) -> Result<BlockData, IndexerError>;

    async fn get_transaction(&self, txid: &str) -> Result<TransactionData, IndexerError>;

    /// Contract state at `height` (`None` = tip).
    async fn get_sc(
        &self,
        scid: &str,
        height: Option<u64>,
        query: ScQuery,
    ) -> Result<ScState, IndexerError>;

    /// Transaction ids currently in the mempool.
    async fn get_tx_pool(&self) -> Result<Vec<String>, IndexerError>;
}

/// Decoder for the chain's binary wire format.
pub trait WireCodec: Send + Sync {
    /// Decode a raw transaction body.
    fn decode_transaction(&self, raw: &[u8]) -> Result<DecodedTransaction, IndexerError>;

    /// Decode a compressed public key into an address, if `raw` is one.
    fn decode_address(&self, _raw: &[u8]) -> Option<String> {
        None
    }
}
