//! Storage interface consumed by the pipeline.
//!
//! [`IndexStore`] is implemented by every backend (see `scindex-storage`).
//! [`IndexSnapshot`] is the plain in-RAM shape of a store: the memory backend
//! keeps one behind a lock, and bulk admission stages into one before a
//! single [`IndexStore::merge`].

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::IndexerError;
use crate::types::{
    ChainInfo, NormalTxWithScid, ParsedTransaction, ScVariable, TxCountKind, TxCounts,
};

/// The writes that admit (or update) one contract at one height.
///
/// Backends apply a group all-or-nothing so a contract's owner, invoke
/// history, variables and interaction heights never diverge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitGroup {
    pub scid: String,
    pub owner: Option<String>,
    pub invoke: Option<ParsedTransaction>,
    pub variables: Option<(u64, Vec<ScVariable>)>,
    pub interaction_height: Option<u64>,
}

impl CommitGroup {
    pub fn new(scid: impl Into<String>) -> Self {
        Self {
            scid: scid.into(),
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn invoke(mut self, record: ParsedTransaction) -> Self {
        self.invoke = Some(record);
        self
    }

    pub fn variables(mut self, height: u64, vars: Vec<ScVariable>) -> Self {
        self.variables = Some((height, vars));
        self
    }

    pub fn interaction_height(mut self, height: u64) -> Self {
        self.interaction_height = Some(height);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.owner.is_none()
            && self.invoke.is_none()
            && self.variables.is_none()
            && self.interaction_height.is_none()
    }
}

/// The full content of an index held in RAM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub owners: BTreeMap<String, String>,
    pub invokes: BTreeMap<String, Vec<ParsedTransaction>>,
    pub variables: BTreeMap<String, BTreeMap<u64, Vec<ScVariable>>>,
    pub interaction_heights: BTreeMap<String, Vec<u64>>,
    pub normal_txs: BTreeMap<String, Vec<NormalTxWithScid>>,
    pub tx_counts: TxCounts,
    pub last_indexed_height: u64,
    pub chain_info: Option<ChainInfo>,
    pub invalid_deploys: BTreeMap<String, u64>,
    pub block_details: BTreeMap<String, serde_json::Value>,
}

impl IndexSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_owner(&mut self, scid: &str, owner: &str) {
        self.owners.insert(scid.to_string(), owner.to_string());
    }

    /// Insert an invoke record in height order. A record already present
    /// for the same (height, txid) is left as is.
    pub fn push_invoke(&mut self, record: ParsedTransaction) {
        let history = self.invokes.entry(record.scid.clone()).or_default();
        if history
            .iter()
            .any(|r| r.height == record.height && r.txid == record.txid)
        {
            return;
        }
        let at = history.partition_point(|r| r.height <= record.height);
        history.insert(at, record);
    }

    /// Record a normal transaction against `address`, once per (txid, scid).
    pub fn push_normal_tx(&mut self, address: &str, record: NormalTxWithScid) {
        let txs = self.normal_txs.entry(address.to_string()).or_default();
        if !txs
            .iter()
            .any(|t| t.txid == record.txid && t.scid == record.scid)
        {
            txs.push(record);
        }
    }

    pub fn set_variables(&mut self, scid: &str, height: u64, vars: Vec<ScVariable>) {
        self.variables
            .entry(scid.to_string())
            .or_default()
            .insert(height, vars);
    }

    /// Append a height to the contract's interaction list, once.
    pub fn push_interaction_height(&mut self, scid: &str, height: u64) {
        let heights = self.interaction_heights.entry(scid.to_string()).or_default();
        if !heights.contains(&height) {
            heights.push(height);
        }
    }

    /// Drop everything staged for `scid`.
    pub fn remove_contract(&mut self, scid: &str) {
        self.owners.remove(scid);
        self.invokes.remove(scid);
        self.variables.remove(scid);
        self.interaction_heights.remove(scid);
    }

    /// Latest variable snapshot at or below `height`.
    pub fn variables_at(&self, scid: &str, height: u64) -> Option<(u64, Vec<ScVariable>)> {
        self.variables
            .get(scid)?
            .range(..=height)
            .next_back()
            .map(|(h, vars)| (*h, vars.clone()))
    }

    pub fn commit_progress(&mut self, counts: &TxCounts, height: u64) {
        self.tx_counts.add(counts);
        self.last_indexed_height = height;
    }

    pub fn set_tx_count(&mut self, kind: TxCountKind, count: u64) {
        match kind {
            TxCountKind::Registration => self.tx_counts.registration = count,
            TxCountKind::Burn => self.tx_counts.burn = count,
            TxCountKind::Normal => self.tx_counts.normal = count,
        }
    }

    pub fn apply(&mut self, group: &CommitGroup) {
        if let Some(owner) = &group.owner {
            self.set_owner(&group.scid, owner);
        }
        if let Some(record) = &group.invoke {
            self.push_invoke(record.clone());
        }
        if let Some((height, vars)) = &group.variables {
            self.set_variables(&group.scid, *height, vars.clone());
        }
        if let Some(height) = group.interaction_height {
            self.push_interaction_height(&group.scid, height);
        }
    }

    /// Fold a staged snapshot into this one.
    ///
    /// The last-indexed height never moves backwards through a merge.
    pub fn merge(&mut self, staged: IndexSnapshot) {
        self.owners.extend(staged.owners);
        for (_, records) in staged.invokes {
            for record in records {
                self.push_invoke(record);
            }
        }
        for (scid, by_height) in staged.variables {
            self.variables.entry(scid).or_default().extend(by_height);
        }
        for (scid, heights) in staged.interaction_heights {
            for h in heights {
                self.push_interaction_height(&scid, h);
            }
        }
        for (addr, txs) in staged.normal_txs {
            for tx in txs {
                self.push_normal_tx(&addr, tx);
            }
        }
        if !staged.tx_counts.is_empty() {
            self.tx_counts = staged.tx_counts;
        }
        self.last_indexed_height = self.last_indexed_height.max(staged.last_indexed_height);
        if staged.chain_info.is_some() {
            self.chain_info = staged.chain_info;
        }
        self.invalid_deploys.extend(staged.invalid_deploys);
        self.block_details.extend(staged.block_details);
    }
}

/// Persistence operations required by the pipeline.
///
/// Implementations must be internally synchronized. Write ordering across
/// callers is enforced one level up by [`StoreHandle`].
#[async_trait]
pub trait IndexStore: Send + Sync {
    // ── Owners ───────────────────────────────────────────────────────────────

    async fn store_owner(&self, scid: &str, owner: &str) -> Result<(), IndexerError>;

    async fn get_owner(&self, scid: &str) -> Result<Option<String>, IndexerError>;

    /// Every tracked contract id with its owner (possibly empty).
    async fn get_all_owners(&self) -> Result<BTreeMap<String, String>, IndexerError>;

    // ── Invoke history ───────────────────────────────────────────────────────

    /// Record an invoke. Several records may share a height; storing the same
    /// (scid, height, txid) again is a no-op.
    async fn store_invoke_details(&self, record: &ParsedTransaction) -> Result<(), IndexerError>;

    async fn get_invoke_details(&self, scid: &str) -> Result<Vec<ParsedTransaction>, IndexerError>;

    // ── Variable snapshots ───────────────────────────────────────────────────

    async fn store_variables(
        &self,
        scid: &str,
        height: u64,
        vars: &[ScVariable],
    ) -> Result<(), IndexerError>;

    /// Snapshot at the nearest height at or below `height`, with that height.
    async fn get_variables_at(
        &self,
        scid: &str,
        height: u64,
    ) -> Result<Option<(u64, Vec<ScVariable>)>, IndexerError>;

    async fn get_variable_heights(&self, scid: &str) -> Result<Vec<u64>, IndexerError>;

    // ── Interaction heights ──────────────────────────────────────────────────

    async fn store_interaction_height(&self, scid: &str, height: u64) -> Result<(), IndexerError>;

    async fn get_interaction_heights(&self, scid: &str) -> Result<Vec<u64>, IndexerError>;

    // ── Normal transactions touching a contract asset ────────────────────────

    /// Idempotent on (address, txid, scid).
    async fn store_normal_tx_with_scid(
        &self,
        address: &str,
        record: &NormalTxWithScid,
    ) -> Result<(), IndexerError>;

    async fn get_normal_txs_with_scid(
        &self,
        address: &str,
    ) -> Result<Vec<NormalTxWithScid>, IndexerError>;

    // ── Counters and scalars ─────────────────────────────────────────────────

    async fn store_tx_count(&self, kind: TxCountKind, count: u64) -> Result<(), IndexerError>;

    async fn get_tx_count(&self, kind: TxCountKind) -> Result<u64, IndexerError>;

    async fn store_last_indexed_height(&self, height: u64) -> Result<(), IndexerError>;

    async fn get_last_indexed_height(&self) -> Result<u64, IndexerError>;

    /// Add `counts` onto the persisted counters and set the last indexed
    /// height, in one write.
    async fn commit_progress(&self, counts: &TxCounts, height: u64) -> Result<(), IndexerError>;

    async fn store_chain_info(&self, info: &ChainInfo) -> Result<(), IndexerError>;

    async fn get_chain_info(&self) -> Result<Option<ChainInfo>, IndexerError>;

    // ── Audit ledgers ────────────────────────────────────────────────────────

    async fn store_invalid_deploy(&self, scid: &str, fees: u64) -> Result<(), IndexerError>;

    async fn get_invalid_deploys(&self) -> Result<BTreeMap<String, u64>, IndexerError>;

    async fn store_block_details(
        &self,
        block_hash: &str,
        details: &serde_json::Value,
    ) -> Result<(), IndexerError>;

    // ── Grouped writes ───────────────────────────────────────────────────────

    /// Apply every write of `group` atomically.
    async fn commit_group(&self, group: &CommitGroup) -> Result<(), IndexerError>;

    /// Merge a staged snapshot in one transaction.
    async fn merge(&self, staged: IndexSnapshot) -> Result<(), IndexerError>;

    /// Flush and release the backend.
    async fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

/// A shared storage handle with a single-writer lock.
///
/// Readers go straight through `Deref`. Writers that must not interleave
/// (a batch commit, a bulk merge) hold [`StoreHandle::writer`] for the
/// duration.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn IndexStore>,
    writer: Arc<Mutex<()>>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self {
            store,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Acquire the single-writer lock.
    pub async fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }
}

impl Deref for StoreHandle {
    type Target = dyn IndexStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}
