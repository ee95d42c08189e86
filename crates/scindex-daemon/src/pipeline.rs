//! The daemon-mode pipeline driver.
//!
//! # Lifecycle
//! `Connecting → AwaitingChainHeight → Bootstrapping → SteadyState → Closing → Closed`
//!
//! # Steady state
//! Each iteration fetches up to `num_parallel_blocks` blocks concurrently,
//! sorts them by height, then classifies and commits them one at a time in
//! ascending order while holding the store's writer lock. The last indexed
//! height only advances once the whole batch is applied, so a crash simply
//! replays the unfinished tail.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use scindex_core::classifier::{self, ClassifiedBlock};
use scindex_core::daemon::{DaemonClient, ScQuery};
use scindex_core::error::IndexerError;
use scindex_core::indexer::{IndexerConfig, IndexerPhase};
use scindex_core::network::BUILTIN_SCIDS;
use scindex_core::query::{self, SplitValues};
use scindex_core::signature::SignatureVerifier;
use scindex_core::status::{IndexerStatus, StatusSnapshot};
use scindex_core::store::{IndexStore, StoreHandle};
use scindex_core::types::{BlockBatch, BlockData, FastsyncImport, ScValue, ScVariable, TxCounts};
use scindex_rpc::HeightPoller;

use crate::fastsync::Fastsync;
use crate::gap;
use crate::registry::ContractRegistry;

/// Summary of one committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// First height of the batch.
    pub from: u64,
    /// Last height of the batch; the new last indexed height.
    pub to: u64,
    pub counts: TxCounts,
    pub sc_txs: usize,
    /// SC transactions that changed the index.
    pub applied: usize,
}

/// A daemon-mode indexer instance.
pub struct Indexer {
    config: Arc<IndexerConfig>,
    client: Arc<dyn DaemonClient>,
    store: StoreHandle,
    status: Arc<IndexerStatus>,
    registry: ContractRegistry,
    verifier: Arc<dyn SignatureVerifier>,
    finished: AtomicBool,
}

impl Indexer {
    pub fn new(
        config: IndexerConfig,
        client: Arc<dyn DaemonClient>,
        store: Arc<dyn IndexStore>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        let config = Arc::new(config);
        let store = StoreHandle::new(store);
        let registry = ContractRegistry::new(client.clone(), store.clone(), config.clone());
        Self {
            config,
            client,
            store,
            status: Arc::new(IndexerStatus::new()),
            registry,
            verifier,
            finished: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Shared status, for pollers and readers running beside the driver.
    pub fn status_handle(&self) -> Arc<IndexerStatus> {
        self.status.clone()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.height_poll_interval_ms)
    }

    fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.config.idle_interval_ms)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Run until closed. Returns once the handles are released.
    pub async fn run(&self) -> Result<(), IndexerError> {
        self.status.set_phase(IndexerPhase::Connecting);
        if !self.connect().await {
            self.finish().await;
            return Ok(());
        }

        let poller = HeightPoller::new(
            self.client.clone(),
            self.store.clone(),
            self.status.clone(),
            self.poll_interval(),
            self.config.close_on_disconnect,
        )
        .spawn();

        let result = self.drive().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "indexer stopped");
        }

        poller.abort();
        self.finish().await;
        result
    }

    async fn drive(&self) -> Result<(), IndexerError> {
        self.status.set_phase(IndexerPhase::AwaitingChainHeight);
        let Some(chain_height) = self.await_chain_height().await else {
            return Ok(());
        };
        self.bootstrap(chain_height).await?;
        self.steady_state().await
    }

    /// Retry `connect` until it succeeds. `false` if closed first.
    async fn connect(&self) -> bool {
        loop {
            if self.status.is_closing() {
                return false;
            }
            match self.client.connect().await {
                Ok(()) => {
                    tracing::info!(endpoint = %self.config.endpoint, "connected to daemon");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(endpoint = %self.config.endpoint, error = %e, "daemon connect failed");
                    tokio::time::sleep(self.poll_interval()).await;
                }
            }
        }
    }

    async fn await_chain_height(&self) -> Option<u64> {
        loop {
            if self.status.is_closing() {
                return None;
            }
            let height = self.status.chain_height();
            if height > 0 {
                return Some(height);
            }
            tokio::time::sleep(self.idle_interval()).await;
        }
    }

    /// Restore persisted state, admit built-in contracts and run fastsync
    /// when configured.
    pub async fn bootstrap(&self, chain_height: u64) -> Result<(), IndexerError> {
        self.status.set_phase(IndexerPhase::Bootstrapping);

        let known = self.registry.reload().await?;
        let stored = self.store.get_last_indexed_height().await?;
        let start = if stored > 0 { stored } else { self.config.start_height };
        self.status.set_last_indexed_height(start);
        tracing::info!(stored, start, known, chain_height, "bootstrapping");

        {
            let _writer = self.store.writer().await;
            for scid in BUILTIN_SCIDS {
                match self.registry.try_admit(scid, chain_height, "", None).await {
                    Ok(outcome) => tracing::debug!(scid, ?outcome, "built-in contract"),
                    Err(e) => tracing::warn!(scid, error = %e, "built-in contract admission failed"),
                }
            }
        }

        if self.should_fastsync(stored, chain_height) {
            let fastsync = Fastsync::new(
                self.client.as_ref(),
                &self.store,
                &self.registry,
                &self.config,
                self.verifier.as_ref(),
            );
            match fastsync.run(chain_height).await {
                Ok(report) => {
                    self.store.store_last_indexed_height(chain_height).await?;
                    self.status.set_last_indexed_height(chain_height);
                    tracing::info!(
                        height = chain_height,
                        admitted = report.admitted,
                        "fastsync complete, resuming at chain tip"
                    );
                }
                Err(e) => tracing::warn!(
                    error = %e,
                    start,
                    "fastsync unavailable, replaying history"
                ),
            }
        }

        tracing::info!(
            last_indexed = self.status.last_indexed_height(),
            validated = self.registry.len(),
            "bootstrap complete"
        );
        Ok(())
    }

    fn should_fastsync(&self, stored: u64, chain_height: u64) -> bool {
        let fs = &self.config.fastsync;
        fs.enabled && (stored == 0 || (fs.force && chain_height.saturating_sub(stored) > fs.force_diff))
    }

    async fn steady_state(&self) -> Result<(), IndexerError> {
        self.status.set_phase(IndexerPhase::SteadyState);
        let mut gap_checked = false;

        loop {
            if self.status.is_closing() {
                break;
            }
            if self.status.last_indexed_height() >= self.status.chain_height() {
                tokio::time::sleep(self.idle_interval()).await;
                continue;
            }

            if !gap_checked {
                match self.recover_gap().await {
                    Ok(()) => gap_checked = true,
                    Err(IndexerError::Aborted { .. }) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "gap check failed");
                        tokio::time::sleep(self.idle_interval()).await;
                    }
                }
                continue;
            }

            match self.index_next_batch().await {
                Ok(Some(_)) => {}
                Ok(None) => tokio::time::sleep(self.idle_interval()).await,
                Err(IndexerError::Aborted { .. }) => break,
                Err(e) => {
                    if e.is_height_unavailable() {
                        gap_checked = false;
                    }
                    tracing::warn!(
                        height = self.status.last_indexed_height(),
                        error = %e,
                        "batch failed, retrying at same height"
                    );
                    tokio::time::sleep(self.idle_interval()).await;
                }
            }
        }
        Ok(())
    }

    /// Move the last indexed height past a pruned history gap, if any.
    async fn recover_gap(&self) -> Result<(), IndexerError> {
        let last = self.status.last_indexed_height();
        let lowest = gap::find_lowest_available(
            self.client.as_ref(),
            last,
            self.config.gap_jump,
            self.status.chain_height(),
            &self.status,
        )
        .await?;

        if lowest != last {
            tracing::warn!(from = last, to = lowest, "history gap, resuming at lowest served height");
            self.store.store_last_indexed_height(lowest).await?;
            self.status.set_last_indexed_height(lowest);
        }
        Ok(())
    }

    async fn fetch_block(&self, height: u64) -> Result<BlockData, IndexerError> {
        let hash = self.client.get_block_hash(height).await?;
        self.client.get_block(&hash, height).await
    }

    /// Fetch, classify and commit the next batch. `None` when at the tip.
    pub async fn index_next_batch(&self) -> Result<Option<BatchReport>, IndexerError> {
        let last = self.status.last_indexed_height();
        let chain_height = self.status.chain_height();
        let width = self
            .config
            .num_parallel_blocks
            .max(1)
            .min(chain_height.saturating_sub(last));
        if width == 0 {
            return Ok(None);
        }
        let from = last + 1;
        let to = last + width;

        let fetched = join_all((from..=to).map(|h| self.fetch_block(h))).await;
        let mut blocks = fetched.into_iter().collect::<Result<Vec<_>, _>>()?;
        blocks.sort_by_key(|b| b.topoheight);

        let _writer = self.store.writer().await;
        if self.status.is_closing() {
            return Err(IndexerError::Aborted {
                reason: "close requested before commit".into(),
            });
        }

        if self.config.miniblock_lookup {
            for block in &blocks {
                if let Some(details) = &block.details {
                    if let Err(e) = self.store.store_block_details(&block.hash, details).await {
                        tracing::warn!(hash = %block.hash, error = %e, "failed to store block details");
                    }
                }
            }
        }

        // Classify the whole batch before committing any of it, so a decode
        // failure retries the batch without double-applying earlier blocks.
        let bookkeeping = self.config.run_mode.keeps_bookkeeping();
        let mut classified = Vec::with_capacity(blocks.len());
        for block in blocks {
            let batch = block.into_batch();
            classified.push(classifier::classify_block(self.client.as_ref(), &batch, !bookkeeping).await?);
        }

        let mut counts = TxCounts::default();
        let mut sc_txs = 0;
        let mut applied = 0;
        for block in &classified {
            applied += self.registry.process_sc_txs(&block.sc_txs).await;
            sc_txs += block.sc_txs.len();
            for (address, record) in &block.asset_records {
                if let Err(e) = self.store.store_normal_tx_with_scid(address, record).await {
                    tracing::warn!(address = %address, txid = %record.txid, error = %e, "failed to store asset record");
                }
            }
            counts.add(&block.counts);
        }

        let persisted = if bookkeeping { counts } else { TxCounts::default() };
        if let Err(e) = self.store.commit_progress(&persisted, to).await {
            tracing::warn!(height = to, error = %e, "failed to persist batch progress");
        }
        self.status.set_last_indexed_height(to);

        tracing::info!(
            from,
            to,
            chain_height,
            registration = counts.registration,
            burn = counts.burn,
            normal = counts.normal,
            sc_txs,
            applied,
            "batch committed"
        );
        Ok(Some(BatchReport {
            from,
            to,
            counts,
            sc_txs,
            applied,
        }))
    }

    /// Request shutdown and release the daemon channel and storage after
    /// the grace period. Idempotent.
    pub async fn close(&self) {
        if self.status.request_close() {
            tracing::info!("close requested");
        }
        self.finish().await;
    }

    async fn finish(&self) {
        self.status.request_close();
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.status.set_phase(IndexerPhase::Closing);
        tokio::time::sleep(Duration::from_millis(self.config.close_grace_ms)).await;

        self.client.close().await;
        if let Err(e) = self.store.close().await {
            tracing::warn!(error = %e, "store close failed");
        }
        self.status.set_phase(IndexerPhase::Closed);
        tracing::info!(last_indexed = self.status.last_indexed_height(), "indexer closed");
    }

    // ─── Downstream surface ──────────────────────────────────────────────────

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn validated_contracts(&self) -> Vec<String> {
        self.registry.validated()
    }

    /// Manually admit candidate contracts at the current chain height.
    pub async fn add_contracts(
        &self,
        candidates: BTreeMap<String, FastsyncImport>,
    ) -> Result<usize, IndexerError> {
        let height = self.status.chain_height().max(self.status.last_indexed_height());
        let recheck = !(self.config.fastsync.skip_recheck && self.config.search_filter.is_empty());
        self.registry.bulk_admit(candidates, height, recheck).await
    }

    /// Re-classify a block without committing anything.
    pub async fn classify_block(&self, batch: &BlockBatch) -> Result<ClassifiedBlock, IndexerError> {
        let no_store = !self.config.run_mode.keeps_bookkeeping();
        classifier::classify_block(self.client.as_ref(), batch, no_store).await
    }

    /// Variables of `scid` at `height` (default: last indexed height), from
    /// the index when it holds a snapshot, else from the daemon.
    pub async fn scid_variables(
        &self,
        scid: &str,
        height: Option<u64>,
    ) -> Result<Vec<ScVariable>, IndexerError> {
        let at = height.unwrap_or_else(|| self.status.last_indexed_height());
        if let Some((_, vars)) = self.store.get_variables_at(scid, at).await? {
            return Ok(vars);
        }
        Ok(self.client.get_sc(scid, height, ScQuery::all()).await?.variables)
    }

    pub async fn scid_keys_by_value(
        &self,
        scid: &str,
        height: Option<u64>,
        value: &ScValue,
    ) -> Result<SplitValues, IndexerError> {
        let vars = self.scid_variables(scid, height).await?;
        Ok(query::keys_by_value(&vars, value))
    }

    pub async fn scid_values_by_key(
        &self,
        scid: &str,
        height: Option<u64>,
        key: &ScValue,
    ) -> Result<SplitValues, IndexerError> {
        let vars = self.scid_variables(scid, height).await?;
        Ok(query::values_by_key(&vars, key))
    }

    /// Every key of `scid`'s variables, split by type.
    pub async fn convert_keys(&self, scid: &str, height: Option<u64>) -> Result<SplitValues, IndexerError> {
        let vars = self.scid_variables(scid, height).await?;
        Ok(query::convert_keys(&vars))
    }

    /// Every value of `scid`'s variables, split by type.
    pub async fn convert_values(&self, scid: &str, height: Option<u64>) -> Result<SplitValues, IndexerError> {
        let vars = self.scid_variables(scid, height).await?;
        Ok(query::convert_values(&vars))
    }

    pub async fn mempool(&self) -> Result<Vec<String>, IndexerError> {
        self.client.get_tx_pool().await
    }

    /// Lower the last indexed height to `height`. Indexed data above it is
    /// kept and overwritten by the replay.
    pub async fn rollback_to(&self, height: u64) -> Result<(), IndexerError> {
        let _writer = self.store.writer().await;
        let current = self.status.last_indexed_height().max(self.store.get_last_indexed_height().await?);
        if height > current {
            return Err(IndexerError::Config(format!(
                "rollback target {height} is above last indexed height {current}"
            )));
        }
        self.store.store_last_indexed_height(height).await?;
        self.status.set_last_indexed_height(height);
        tracing::warn!(from = current, to = height, "last indexed height rolled back");
        Ok(())
    }
}
