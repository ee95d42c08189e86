//! Indexer configuration and lifecycle types.

use serde::{Deserialize, Serialize};

/// What the indexer persists besides admitted contracts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Full bookkeeping.
    #[default]
    Daemon,
    /// Only contract admission. Counters, invalid deploys, normal-tx
    /// records and invoke history of known contracts are skipped.
    Asset,
}

impl RunMode {
    pub fn keeps_bookkeeping(&self) -> bool {
        matches!(self, Self::Daemon)
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daemon" => Ok(Self::Daemon),
            "asset" => Ok(Self::Asset),
            other => Err(format!("unsupported run mode '{other}' (expected daemon or asset)")),
        }
    }
}

/// Fastsync bootstrap options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FastsyncConfig {
    /// Seed the height to the chain tip on a first run and import the registry.
    pub enabled: bool,
    /// Also fast-forward when the stored height lags the tip by more than `force_diff`.
    pub force: bool,
    pub force_diff: u64,
    /// With an empty filter, admit registry records without re-fetching variables.
    pub skip_recheck: bool,
    /// Do not admit the registry contract itself.
    pub skip_registry_index: bool,
}

impl Default for FastsyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force: false,
            force_diff: 100,
            skip_recheck: false,
            skip_registry_index: false,
        }
    }
}

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Daemon host:port.
    pub endpoint: String,
    /// First height to index when nothing is persisted.
    pub start_height: u64,
    /// Code substrings; a contract is tracked if its code contains any of them.
    /// Empty means every contract is tracked.
    pub search_filter: Vec<String>,
    /// Contract ids that are never admitted.
    pub scid_exclusions: Vec<String>,
    pub run_mode: RunMode,
    /// Maximum number of blocks fetched concurrently per batch.
    pub num_parallel_blocks: u64,
    /// Request shutdown after repeated connection failures in the height poller.
    pub close_on_disconnect: bool,
    /// Persist secondary block details keyed by block hash.
    pub miniblock_lookup: bool,
    pub fastsync: FastsyncConfig,
    /// Forward step used when probing past a history gap.
    pub gap_jump: u64,
    /// Chain height polling interval (milliseconds).
    pub height_poll_interval_ms: u64,
    /// Idle wait when the index is at the chain tip (milliseconds).
    pub idle_interval_ms: u64,
    /// Grace period between the close request and tearing down handles (milliseconds).
    pub close_grace_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:40402".into(),
            start_height: 0,
            search_filter: Vec::new(),
            scid_exclusions: Vec::new(),
            run_mode: RunMode::Daemon,
            num_parallel_blocks: 5,
            close_on_disconnect: false,
            miniblock_lookup: false,
            fastsync: FastsyncConfig::default(),
            gap_jump: 10_000,
            height_poll_interval_ms: 5_000,
            idle_interval_ms: 1_000,
            close_grace_ms: 1_000,
        }
    }
}

impl IndexerConfig {
    /// Returns `true` if `code` passes the search filter.
    pub fn code_matches(&self, code: &str) -> bool {
        self.search_filter.is_empty()
            || self
                .search_filter
                .iter()
                .any(|f| !f.is_empty() && code.contains(f.as_str()))
    }

    pub fn is_excluded(&self, scid: &str) -> bool {
        self.scid_exclusions.iter().any(|s| s == scid)
    }
}

/// Lifecycle phase of the daemon-mode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerPhase {
    /// Not yet started.
    Idle,
    /// Dialling the daemon.
    Connecting,
    /// Waiting for the height poller to report the tip.
    AwaitingChainHeight,
    /// Admitting built-in contracts and running fastsync.
    Bootstrapping,
    /// Following the chain batch by batch.
    SteadyState,
    /// Close requested; draining.
    Closing,
    /// Handles released.
    Closed,
}

impl std::fmt::Display for IndexerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::AwaitingChainHeight => write!(f, "awaiting-chain-height"),
            Self::Bootstrapping => write!(f, "bootstrapping"),
            Self::SteadyState => write!(f, "steady-state"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let cfg = IndexerConfig::default();
        assert!(cfg.code_matches(""));
        assert!(cfg.code_matches("Function Initialize() Uint64"));
    }

    #[test]
    fn filter_is_or_combined_and_case_sensitive() {
        let cfg = IndexerConfig {
            search_filter: vec!["Function Foo".into(), "STORE(\"owner\"".into()],
            ..Default::default()
        };
        assert!(cfg.code_matches("10 Function Foo() Uint64"));
        assert!(cfg.code_matches("20 STORE(\"owner\", SIGNER())"));
        assert!(!cfg.code_matches("function foo()"));
    }

    #[test]
    fn config_defaults() {
        let cfg = IndexerConfig::default();
        assert_eq!(cfg.endpoint, "127.0.0.1:40402");
        assert_eq!(cfg.num_parallel_blocks, 5);
        assert_eq!(cfg.gap_jump, 10_000);
        assert_eq!(cfg.fastsync.force_diff, 100);
        assert_eq!(cfg.run_mode, RunMode::Daemon);
    }

    #[test]
    fn run_mode_parse() {
        assert_eq!("asset".parse::<RunMode>().unwrap(), RunMode::Asset);
        assert!("wallet".parse::<RunMode>().is_err());
        assert!(!RunMode::Asset.keeps_bookkeeping());
    }

    #[test]
    fn phase_display() {
        assert_eq!(IndexerPhase::SteadyState.to_string(), "steady-state");
        assert_eq!(IndexerPhase::AwaitingChainHeight.to_string(), "awaiting-chain-height");
    }
}
