//! Fluent builder API for creating indexers.
//!
//! # Example
//!
//! ```rust,no_run
//! use scindex_daemon::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .endpoint("127.0.0.1:40402")
//!     .search_filter(["Function InitializePrivate"])
//!     .num_parallel_blocks(10)
//!     .fastsync(true)
//!     .build_config();
//! ```

use std::sync::Arc;

use scindex_core::daemon::DaemonClient;
use scindex_core::error::IndexerError;
use scindex_core::indexer::{IndexerConfig, RunMode};
use scindex_core::signature::{SignatureVerifier, UnavailableVerifier};
use scindex_core::store::IndexStore;
use scindex_storage::InMemoryStorage;

use crate::pipeline::Indexer;

/// Fluent builder for [`IndexerConfig`] and [`Indexer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    client: Option<Arc<dyn DaemonClient>>,
    store: Option<Arc<dyn IndexStore>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Set the daemon `host:port`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// First height to index when nothing is persisted.
    pub fn start_height(mut self, height: u64) -> Self {
        self.config.start_height = height;
        self
    }

    /// Replace the code search filter.
    pub fn search_filter<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.search_filter = filters.into_iter().map(Into::into).collect();
        self
    }

    /// Never admit `scid`.
    pub fn exclude(mut self, scid: impl Into<String>) -> Self {
        self.config.scid_exclusions.push(scid.into());
        self
    }

    pub fn run_mode(mut self, mode: RunMode) -> Self {
        self.config.run_mode = mode;
        self
    }

    /// Cap on blocks fetched per batch.
    pub fn num_parallel_blocks(mut self, n: u64) -> Self {
        self.config.num_parallel_blocks = n;
        self
    }

    pub fn close_on_disconnect(mut self, enabled: bool) -> Self {
        self.config.close_on_disconnect = enabled;
        self
    }

    pub fn miniblock_lookup(mut self, enabled: bool) -> Self {
        self.config.miniblock_lookup = enabled;
        self
    }

    pub fn fastsync(mut self, enabled: bool) -> Self {
        self.config.fastsync.enabled = enabled;
        self
    }

    /// Fast-forward whenever the index lags the tip by more than `diff` blocks.
    pub fn force_fastsync(mut self, diff: u64) -> Self {
        self.config.fastsync.enabled = true;
        self.config.fastsync.force = true;
        self.config.fastsync.force_diff = diff;
        self
    }

    pub fn skip_fastsync_recheck(mut self, skip: bool) -> Self {
        self.config.fastsync.skip_recheck = skip;
        self
    }

    pub fn skip_registry_index(mut self, skip: bool) -> Self {
        self.config.fastsync.skip_registry_index = skip;
        self
    }

    pub fn gap_jump(mut self, jump: u64) -> Self {
        self.config.gap_jump = jump;
        self
    }

    pub fn height_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.height_poll_interval_ms = ms;
        self
    }

    pub fn idle_interval_ms(mut self, ms: u64) -> Self {
        self.config.idle_interval_ms = ms;
        self
    }

    pub fn close_grace_ms(mut self, ms: u64) -> Self {
        self.config.close_grace_ms = ms;
        self
    }

    pub fn client(mut self, client: Arc<dyn DaemonClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Storage backend. Defaults to [`InMemoryStorage`].
    pub fn store(mut self, store: Arc<dyn IndexStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registry signature verifier. Defaults to [`UnavailableVerifier`].
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build the indexer. A daemon client is required.
    pub fn build(self) -> Result<Indexer, IndexerError> {
        if self.config.num_parallel_blocks == 0 {
            return Err(IndexerError::Config("num_parallel_blocks must be at least 1".into()));
        }
        if self.config.gap_jump == 0 {
            return Err(IndexerError::Config("gap_jump must be at least 1".into()));
        }
        let client = self
            .client
            .ok_or_else(|| IndexerError::Config("no daemon client configured".into()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let verifier = self
            .verifier
            .unwrap_or_else(|| Arc::new(UnavailableVerifier));

        Ok(Indexer::new(self.config, client, store, verifier))
    }
}
