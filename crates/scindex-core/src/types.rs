//! Shared data model for blocks, transactions, contract variables and
//! the records persisted by the index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── Contract values ─────────────────────────────────────────────────────────

/// A smart-contract key or value. Contract storage only holds `u64` and
/// string cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScValue {
    Uint64(u64),
    String(String),
}

impl ScValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint64(n) => Some(*n),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Uint64(_) => None,
        }
    }
}

impl std::fmt::Display for ScValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uint64(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for ScValue {
    fn from(n: u64) -> Self {
        Self::Uint64(n)
    }
}

impl From<&str> for ScValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ScValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// One key/value cell of a contract's storage at some height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScVariable {
    pub key: ScValue,
    pub value: ScValue,
}

impl ScVariable {
    pub fn new(key: impl Into<ScValue>, value: impl Into<ScValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Code, variables and balances of a contract as returned by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScState {
    pub code: String,
    pub variables: Vec<ScVariable>,
    pub balances: HashMap<String, u64>,
}

// ─── Blocks and transactions ─────────────────────────────────────────────────

/// Transaction ids of one fetched block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBatch {
    pub topoheight: u64,
    pub tx_hashes: Vec<String>,
}

/// A block as returned by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub hash: String,
    pub topoheight: u64,
    pub tx_hashes: Vec<String>,
    /// Secondary block-internal details (miniblocks), when the daemon sent them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BlockData {
    pub fn into_batch(self) -> BlockBatch {
        BlockBatch {
            topoheight: self.topoheight,
            tx_hashes: self.tx_hashes,
        }
    }
}

/// Kind of a decoded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Premine,
    Registration,
    Coinbase,
    Normal,
    Burn,
    SmartContract,
}

/// A named smart-contract call argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScArgument {
    pub name: String,
    pub value: ScValue,
}

impl ScArgument {
    pub fn new(name: impl Into<String>, value: impl Into<ScValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Look up an argument by name.
pub fn argument<'a>(args: &'a [ScArgument], name: &str) -> Option<&'a ScValue> {
    args.iter().find(|a| a.name == name).map(|a| &a.value)
}

/// One asset payload of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxPayload {
    /// Hex-encoded asset / contract id. All zeroes for the native asset.
    pub scid: String,
    pub ring_size: usize,
    #[serde(default)]
    pub burn_value: u64,
}

impl TxPayload {
    pub fn has_scid(&self) -> bool {
        !self.scid.is_empty() && self.scid.bytes().any(|b| b != b'0')
    }
}

/// The binary transaction body, decoded by a [`crate::daemon::WireCodec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub kind: TxKind,
    pub fees: u64,
    pub payloads: Vec<TxPayload>,
    pub sc_args: Vec<ScArgument>,
}

/// A transaction as returned by the daemon: decoded body plus the
/// daemon-side signer and ring annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionData {
    pub txid: String,
    pub tx: DecodedTransaction,
    /// Signer address; only meaningful when the ring size is 2.
    pub signer: String,
    /// Ring member addresses, one list per payload.
    pub ring: Vec<Vec<String>>,
}

/// Smart-contract transaction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScMethod {
    Install,
    Invoke,
}

impl std::fmt::Display for ScMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "installsc"),
            Self::Invoke => write!(f, "scinvoke"),
        }
    }
}

/// A classified smart-contract transaction. Also the persisted invoke record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub txid: String,
    pub scid: String,
    pub scid_raw: Vec<u8>,
    pub entrypoint: String,
    pub method: ScMethod,
    pub args: Vec<ScArgument>,
    /// Empty unless the ring size was exactly 2.
    pub sender: String,
    pub payloads: Vec<TxPayload>,
    pub fees: u64,
    pub height: u64,
}

impl ParsedTransaction {
    /// Contract code carried by an install transaction.
    pub fn code(&self) -> Option<&str> {
        argument(&self.args, "SC_CODE").and_then(ScValue::as_str)
    }

    pub fn burn_value(&self) -> u64 {
        self.payloads.first().map(|p| p.burn_value).unwrap_or(0)
    }
}

/// A normal transaction touching a contract asset, recorded per ring member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalTxWithScid {
    pub txid: String,
    pub scid: String,
    pub fees: u64,
    pub height: u64,
}

// ─── Counters and chain info ─────────────────────────────────────────────────

/// Named transaction counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxCountKind {
    Registration,
    Burn,
    Normal,
}

impl TxCountKind {
    pub const ALL: [TxCountKind; 3] = [Self::Registration, Self::Burn, Self::Normal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Burn => "burn",
            Self::Normal => "normal",
        }
    }
}

impl std::fmt::Display for TxCountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind transaction counts of a block or batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCounts {
    pub registration: u64,
    pub burn: u64,
    pub normal: u64,
}

impl TxCounts {
    pub fn add(&mut self, other: &TxCounts) {
        self.registration += other.registration;
        self.burn += other.burn;
        self.normal += other.normal;
    }

    pub fn get(&self, kind: TxCountKind) -> u64 {
        match kind {
            TxCountKind::Registration => self.registration,
            TxCountKind::Burn => self.burn,
            TxCountKind::Normal => self.normal,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.registration == 0 && self.burn == 0 && self.normal == 0
    }
}

/// Snapshot of the daemon's `GetInfo` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub topoheight: u64,
    #[serde(default)]
    pub stableheight: u64,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub version: String,
}

/// An install whose contract returned no variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidDeploy {
    pub scid: String,
    pub fees: u64,
}

/// A contract entry decoded from the on-chain registry during fastsync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastsyncImport {
    pub owner: String,
    pub height: u64,
    pub headers: String,
}
