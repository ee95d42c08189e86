//! scindex-core: foundation for the DERO smart-contract indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → Indexer (scindex-daemon)
//!                      ├── DaemonClient       (RPC with retry, scindex-rpc)
//!                      ├── classifier         (tx kind, SC fields, asset records)
//!                      ├── ContractRegistry   (admission policy, validated set)
//!                      ├── Fastsync           (signed registry import)
//!                      └── StoreHandle        (memory / SQLite, single writer)
//! ```

pub mod classifier;
pub mod daemon;
pub mod error;
pub mod indexer;
pub mod network;
pub mod query;
pub mod signature;
pub mod status;
pub mod store;
pub mod types;

pub use classifier::{classify_block, ClassifiedBlock, TxClass};
pub use daemon::{DaemonClient, ScQuery, WireCodec};
pub use error::IndexerError;
pub use indexer::{FastsyncConfig, IndexerConfig, IndexerPhase, RunMode};
pub use signature::{SignatureVerifier, SignedMessage};
pub use status::{IndexerStatus, StatusSnapshot};
pub use store::{CommitGroup, IndexSnapshot, IndexStore, StoreHandle};
pub use types::{
    BlockBatch, BlockData, ChainInfo, FastsyncImport, NormalTxWithScid, ParsedTransaction,
    ScMethod, ScState, ScValue, ScVariable, TransactionData, TxCountKind, TxCounts,
};
