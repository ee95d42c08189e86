//! Scripted in-process daemon for pipeline tests.
//!
//! Compiled into the crate's unit tests and pulled into the integration
//! tests with `#[path]`, so it only refers to `scindex_core`.
#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use scindex_core::daemon::{DaemonClient, ScQuery};
use scindex_core::error::IndexerError;
use scindex_core::types::{
    BlockData, ChainInfo, DecodedTransaction, ScArgument, ScState, ScVariable, TransactionData,
    TxKind, TxPayload,
};

const NATIVE_ASSET: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Default)]
struct MockState {
    info: ChainInfo,
    blocks: HashMap<u64, Vec<String>>,
    txs: HashMap<String, TransactionData>,
    contracts: HashMap<String, ScState>,
    unavailable: Option<Range<u64>>,
    mempool: Vec<String>,
    fetched_blocks: Vec<u64>,
    connects: u64,
    closed: bool,
}

/// A daemon whose chain, transactions and contract states are set up front.
///
/// Heights above the chain tip, or inside the unavailable range, answer
/// `get_block_hash` with [`IndexerError::HeightUnavailable`]. Contracts
/// return the same state at every height.
pub struct MockDaemon {
    state: Mutex<MockState>,
    probes: AtomicU64,
    sc_calls: AtomicU64,
}

impl MockDaemon {
    pub fn new(chain_height: u64) -> Self {
        let state = MockState {
            info: ChainInfo {
                height: chain_height,
                topoheight: chain_height,
                stableheight: chain_height.saturating_sub(8),
                network: "Simulator".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            probes: AtomicU64::new(0),
            sc_calls: AtomicU64::new(0),
        }
    }

    pub fn testnet(self) -> Self {
        self.state.lock().unwrap().info.testnet = true;
        self
    }

    /// Place `txs` in the block at `height`.
    pub fn with_block(self, height: u64, txs: Vec<TransactionData>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let ids = txs.iter().map(|t| t.txid.clone()).collect();
            state.blocks.insert(height, ids);
            for tx in txs {
                state.txs.insert(tx.txid.clone(), tx);
            }
        }
        self
    }

    /// Place raw transaction ids in the block at `height` (e.g. registrations).
    pub fn with_block_ids(self, height: u64, ids: Vec<String>) -> Self {
        self.state.lock().unwrap().blocks.insert(height, ids);
        self
    }

    pub fn with_contract(self, scid: &str, code: &str, variables: Vec<ScVariable>) -> Self {
        self.add_contract(scid, code, variables);
        self
    }

    /// Heights in `range` answer as pruned.
    pub fn unavailable(self, range: Range<u64>) -> Self {
        self.state.lock().unwrap().unavailable = Some(range);
        self
    }

    pub fn with_mempool(self, ids: Vec<String>) -> Self {
        self.state.lock().unwrap().mempool = ids;
        self
    }

    pub fn add_contract(&self, scid: &str, code: &str, variables: Vec<ScVariable>) {
        let state = ScState {
            code: code.to_string(),
            variables,
            ..Default::default()
        };
        self.state.lock().unwrap().contracts.insert(scid.to_string(), state);
    }

    pub fn set_chain_height(&self, height: u64) {
        let mut state = self.state.lock().unwrap();
        state.info.height = height;
        state.info.topoheight = height;
    }

    /// Number of `get_block_hash` calls.
    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn sc_calls(&self) -> u64 {
        self.sc_calls.load(Ordering::SeqCst)
    }

    /// Heights passed to `get_block`, in call order.
    pub fn fetched_blocks(&self) -> Vec<u64> {
        self.state.lock().unwrap().fetched_blocks.clone()
    }

    pub fn connects(&self) -> u64 {
        self.state.lock().unwrap().connects
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl DaemonClient for MockDaemon {
    async fn connect(&self) -> Result<(), IndexerError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        state.closed = false;
        Ok(())
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    async fn get_info(&self) -> Result<ChainInfo, IndexerError> {
        Ok(self.state.lock().unwrap().info.clone())
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, IndexerError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let pruned = state.unavailable.as_ref().is_some_and(|r| r.contains(&height));
        if pruned || height > state.info.topoheight {
            return Err(IndexerError::HeightUnavailable { height });
        }
        Ok(block_hash(height))
    }

    async fn get_block(&self, hash: &str, height: u64) -> Result<BlockData, IndexerError> {
        let mut state = self.state.lock().unwrap();
        state.fetched_blocks.push(height);
        Ok(BlockData {
            hash: hash.to_string(),
            topoheight: height,
            tx_hashes: state.blocks.get(&height).cloned().unwrap_or_default(),
            details: Some(json!({ "miniblocks": [{ "height": height }] })),
        })
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionData, IndexerError> {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| IndexerError::Rpc(format!("transaction {txid} not found")))
    }

    async fn get_sc(
        &self,
        scid: &str,
        _height: Option<u64>,
        query: ScQuery,
    ) -> Result<ScState, IndexerError> {
        self.sc_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self
            .state
            .lock()
            .unwrap()
            .contracts
            .get(scid)
            .cloned()
            .unwrap_or_default();
        if !query.variables {
            state.variables.retain(|v| query.keys.contains(&v.key));
        }
        Ok(state)
    }

    async fn get_tx_pool(&self) -> Result<Vec<String>, IndexerError> {
        Ok(self.state.lock().unwrap().mempool.clone())
    }
}

// ─── Fixture builders ────────────────────────────────────────────────────────

pub fn block_hash(height: u64) -> String {
    format!("b{height:063x}")
}

/// A non-registration transaction id.
pub fn txid(n: u64) -> String {
    format!("ab{n:062x}")
}

/// A registration transaction id (leading zero bytes).
pub fn registration_id(n: u64) -> String {
    format!("000000{n:058x}")
}

fn sc_tx(txid: &str, ring_size: usize, signer: &str, sc_args: Vec<ScArgument>) -> TransactionData {
    TransactionData {
        txid: txid.to_string(),
        tx: DecodedTransaction {
            kind: TxKind::SmartContract,
            fees: 120,
            payloads: vec![TxPayload {
                scid: NATIVE_ASSET.into(),
                ring_size,
                burn_value: 0,
            }],
            sc_args,
        },
        signer: signer.to_string(),
        ring: vec![vec![signer.to_string(); ring_size.max(1)]],
    }
}

pub fn install_tx(txid: &str, code: &str, ring_size: usize, signer: &str) -> TransactionData {
    sc_tx(
        txid,
        ring_size,
        signer,
        vec![
            ScArgument::new("SC_ACTION", 1u64),
            ScArgument::new("SC_CODE", code),
        ],
    )
}

pub fn invoke_tx(
    txid: &str,
    scid: &str,
    entrypoint: &str,
    ring_size: usize,
    signer: &str,
) -> TransactionData {
    sc_tx(
        txid,
        ring_size,
        signer,
        vec![
            ScArgument::new("SC_ACTION", 0u64),
            ScArgument::new("SC_ID", scid),
            ScArgument::new("entrypoint", entrypoint),
        ],
    )
}

/// A transfer of `asset` whose ring holds `members`.
pub fn transfer_tx(txid: &str, asset: &str, members: &[&str]) -> TransactionData {
    TransactionData {
        txid: txid.to_string(),
        tx: DecodedTransaction {
            kind: TxKind::Normal,
            fees: 80,
            payloads: vec![TxPayload {
                scid: asset.to_string(),
                ring_size: members.len(),
                burn_value: 0,
            }],
            sc_args: Vec::new(),
        },
        signer: String::new(),
        ring: vec![members.iter().map(|m| m.to_string()).collect()],
    }
}

pub fn burn_tx(txid: &str) -> TransactionData {
    TransactionData {
        txid: txid.to_string(),
        tx: DecodedTransaction {
            kind: TxKind::Burn,
            fees: 50,
            payloads: vec![TxPayload {
                scid: NATIVE_ASSET.into(),
                ring_size: 2,
                burn_value: 1_000,
            }],
            sc_args: Vec::new(),
        },
        signer: String::new(),
        ring: Vec::new(),
    }
}
