//! Validated-contract registry: the admission policy and the in-memory set
//! of tracked contract ids.
//!
//! Membership only grows. A contract enters the set once its code passes the
//! search filter and the daemon returns at least one variable for it; its
//! owner, variables and interaction height are committed as one
//! [`CommitGroup`] before it is added.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};

use scindex_core::daemon::{DaemonClient, ScQuery};
use scindex_core::error::IndexerError;
use scindex_core::indexer::IndexerConfig;
use scindex_core::network;
use scindex_core::store::{CommitGroup, IndexSnapshot, StoreHandle};
use scindex_core::types::{FastsyncImport, ParsedTransaction, ScMethod, ScVariable};

/// Concurrent `get_sc` calls during bulk admission.
const BULK_FETCH_CONCURRENCY: usize = 16;

/// Outcome of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    AlreadyValidated,
    Excluded,
    /// Code does not contain any filter substring.
    FilteredOut,
    /// The daemon returned no variables; treated as non-existent.
    NoVariables,
}

/// Per-candidate state during bulk admission.
#[derive(Debug, Clone)]
pub struct StagingRecord {
    pub scid: String,
    pub import: FastsyncImport,
    pub code: String,
    pub variables: Vec<ScVariable>,
    pub matches: bool,
}

impl StagingRecord {
    pub fn admissible(&self) -> bool {
        self.matches && !self.variables.is_empty()
    }
}

pub struct ContractRegistry {
    client: Arc<dyn DaemonClient>,
    store: StoreHandle,
    config: Arc<IndexerConfig>,
    validated: Mutex<BTreeSet<String>>,
}

impl ContractRegistry {
    pub fn new(client: Arc<dyn DaemonClient>, store: StoreHandle, config: Arc<IndexerConfig>) -> Self {
        Self {
            client,
            store,
            config,
            validated: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn contains(&self, scid: &str) -> bool {
        self.validated.lock().unwrap().contains(scid)
    }

    pub fn len(&self) -> usize {
        self.validated.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the validated set.
    pub fn validated(&self) -> Vec<String> {
        self.validated.lock().unwrap().iter().cloned().collect()
    }

    /// Load every contract with a stored owner into the set.
    pub async fn reload(&self) -> Result<usize, IndexerError> {
        let owners = self.store.get_all_owners().await?;
        let mut set = self.validated.lock().unwrap();
        set.extend(owners.into_keys());
        Ok(set.len())
    }

    fn mark_validated(&self, scid: &str) {
        self.validated.lock().unwrap().insert(scid.to_string());
    }

    /// Admit `scid` at `height` if it exists and passes the filter.
    ///
    /// Callers hold the store's writer lock.
    pub async fn try_admit(
        &self,
        scid: &str,
        height: u64,
        owner: &str,
        invoke: Option<&ParsedTransaction>,
    ) -> Result<Admission, IndexerError> {
        if self.config.is_excluded(scid) {
            return Ok(Admission::Excluded);
        }
        if self.contains(scid) {
            return Ok(Admission::AlreadyValidated);
        }

        let state = self.client.get_sc(scid, Some(height), ScQuery::all()).await?;
        if !self.config.code_matches(&state.code) {
            return Ok(Admission::FilteredOut);
        }
        if state.variables.is_empty() {
            return Ok(Admission::NoVariables);
        }

        let mut group = CommitGroup::new(scid)
            .owner(owner)
            .variables(height, state.variables)
            .interaction_height(height);
        if let Some(tx) = invoke {
            group = group.invoke(tx.clone());
        }
        self.store.commit_group(&group).await?;
        self.mark_validated(scid);

        tracing::info!(scid, height, owner, "contract admitted");
        Ok(Admission::Admitted)
    }

    /// Apply the SC transactions of one block, in order.
    ///
    /// Failures are logged and the transaction skipped. Callers hold the
    /// store's writer lock.
    pub async fn process_sc_txs(&self, txs: &[ParsedTransaction]) -> usize {
        let mut applied = 0;
        for tx in txs {
            if self.config.is_excluded(&tx.scid) {
                tracing::debug!(scid = %tx.scid, txid = %tx.txid, "excluded contract, skipping");
                continue;
            }
            let result = if self.contains(&tx.scid) {
                self.update_validated(tx).await
            } else {
                match tx.method {
                    ScMethod::Install => self.handle_install(tx).await,
                    ScMethod::Invoke => self.handle_unvalidated_invoke(tx).await,
                }
            };
            match result {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    scid = %tx.scid,
                    txid = %tx.txid,
                    height = tx.height,
                    error = %e,
                    "skipping smart-contract transaction"
                ),
            }
        }
        applied
    }

    async fn handle_install(&self, tx: &ParsedTransaction) -> Result<bool, IndexerError> {
        if let Some(code) = tx.code() {
            if !self.config.code_matches(code) {
                tracing::debug!(scid = %tx.scid, "install does not match search filter");
                return Ok(false);
            }
        }

        match self.try_admit(&tx.scid, tx.height, &tx.sender, Some(tx)).await? {
            Admission::Admitted => Ok(true),
            Admission::NoVariables => {
                if self.config.run_mode.keeps_bookkeeping() {
                    self.store.store_invalid_deploy(&tx.scid, tx.fees).await?;
                }
                tracing::debug!(scid = %tx.scid, fees = tx.fees, "install returned no variables");
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn handle_unvalidated_invoke(&self, tx: &ParsedTransaction) -> Result<bool, IndexerError> {
        let admission = self.try_admit(&tx.scid, tx.height, "", Some(tx)).await?;
        Ok(admission == Admission::Admitted)
    }

    /// Record an interaction with an already tracked contract.
    async fn update_validated(&self, tx: &ParsedTransaction) -> Result<bool, IndexerError> {
        if !self.config.run_mode.keeps_bookkeeping() {
            return Ok(false);
        }

        let mut group = CommitGroup::new(&tx.scid).interaction_height(tx.height);
        // The name service sees heavy traffic; with fastsync its history is left out.
        if !(network::is_builtin(&tx.scid) && self.config.fastsync.enabled) {
            group = group.invoke(tx.clone());
        }
        match self.client.get_sc(&tx.scid, Some(tx.height), ScQuery::all()).await {
            Ok(state) if !state.variables.is_empty() => {
                group = group.variables(tx.height, state.variables);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(
                scid = %tx.scid,
                height = tx.height,
                error = %e,
                "variables unavailable, storing invoke only"
            ),
        }

        self.store.commit_group(&group).await?;
        tracing::debug!(scid = %tx.scid, txid = %tx.txid, height = tx.height, "invoke recorded");
        Ok(true)
    }

    /// Validate many candidates concurrently and commit the accepted ones
    /// with a single merge. Returns the number admitted.
    ///
    /// With `recheck` off, candidates are admitted from their import record
    /// alone. Takes the store's writer lock for the merge; candidates admitted
    /// elsewhere in the meantime are left untouched.
    pub async fn bulk_admit(
        &self,
        candidates: BTreeMap<String, FastsyncImport>,
        height: u64,
        recheck: bool,
    ) -> Result<usize, IndexerError> {
        let pending: Vec<(String, FastsyncImport)> = candidates
            .into_iter()
            .filter(|(scid, _)| !self.config.is_excluded(scid) && !self.contains(scid))
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }
        let total = pending.len();

        let mut staged = IndexSnapshot::new();
        let mut admitted = Vec::new();

        if recheck {
            let records = self.stage(pending).await;
            for rec in records.into_iter().filter(StagingRecord::admissible) {
                staged.set_owner(&rec.scid, &rec.import.owner);
                staged.set_variables(&rec.scid, height, rec.variables);
                staged.push_interaction_height(&rec.scid, height);
                admitted.push(rec.scid);
            }
        } else {
            for (scid, import) in pending {
                let at = if import.height > 0 { import.height } else { height };
                staged.set_owner(&scid, &import.owner);
                staged.push_interaction_height(&scid, at);
                admitted.push(scid);
            }
        }

        if admitted.is_empty() {
            tracing::info!(candidates = total, "bulk admission found no eligible contracts");
            return Ok(0);
        }

        let _writer = self.store.writer().await;
        // The pipeline may have admitted some candidates while they were staged.
        let (admitted, raced): (Vec<String>, Vec<String>) =
            admitted.into_iter().partition(|scid| !self.contains(scid));
        for scid in &raced {
            staged.remove_contract(scid);
            tracing::debug!(scid = %scid, "admitted by the pipeline during staging, dropped");
        }
        if admitted.is_empty() {
            return Ok(0);
        }
        self.store.merge(staged).await?;
        self.validated.lock().unwrap().extend(admitted.iter().cloned());

        tracing::info!(candidates = total, admitted = admitted.len(), height, "bulk admission merged");
        Ok(admitted.len())
    }

    async fn stage(&self, pending: Vec<(String, FastsyncImport)>) -> Vec<StagingRecord> {
        let client = &self.client;
        let config = &self.config;

        let mut records: Vec<StagingRecord> = stream::iter(pending)
            .map(|(scid, import)| async move {
                match client.get_sc(&scid, None, ScQuery::all()).await {
                    Ok(state) => Some(StagingRecord {
                        matches: config.code_matches(&state.code),
                        scid,
                        import,
                        code: state.code,
                        variables: state.variables,
                    }),
                    Err(e) => {
                        tracing::warn!(scid = %scid, error = %e, "bulk candidate fetch failed");
                        None
                    }
                }
            })
            .buffer_unordered(BULK_FETCH_CONCURRENCY)
            .filter_map(|rec| async move { rec })
            .collect()
            .await;

        records.sort_by(|a, b| a.scid.cmp(&b.scid));
        records
    }
}
