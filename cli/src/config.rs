//! Optional YAML configuration file and command-line overrides.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use scindex_core::indexer::{IndexerConfig, RunMode};
use scindex_storage::StorageKind;

use crate::logging::LogConfig;

/// Separator for multi-valued string flags.
pub const SEPARATOR: &str = ";;;";

/// Everything the binary can be configured with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub indexer: IndexerConfig,
    pub storage: StorageKind,
    pub log: LogConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Flags of the `run` command. Anything given here overrides the file.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Daemon RPC address (host:port)
    #[arg(long = "daemon-rpc-address")]
    pub daemon_rpc_address: Option<String>,

    /// First topoheight to index when nothing is stored
    #[arg(long = "start-topoheight")]
    pub start_topoheight: Option<u64>,

    /// Code substrings to match, separated by ';;;'
    #[arg(long = "search-filter")]
    pub search_filter: Option<String>,

    /// Contract ids never indexed, separated by ';;;'
    #[arg(long = "sf-scid-exclusions")]
    pub sf_scid_exclusions: Option<String>,

    /// daemon | asset
    #[arg(long)]
    pub runmode: Option<RunMode>,

    /// Blocks fetched concurrently per batch
    #[arg(long = "num-parallel-blocks")]
    pub num_parallel_blocks: Option<u64>,

    /// Shut down after repeated daemon connection failures
    #[arg(long = "close-on-disconnect")]
    pub close_on_disconnect: bool,

    /// Start at the chain tip and import the contract registry
    #[arg(long)]
    pub fastsync: bool,

    /// Fastsync whenever the index lags the tip by more than --forcefastsyncdiff
    #[arg(long)]
    pub forcefastsync: bool,

    #[arg(long)]
    pub forcefastsyncdiff: Option<u64>,

    /// Trust registry records without re-fetching variables (empty filter only)
    #[arg(long)]
    pub skipfsrecheck: bool,

    /// Do not index the registry contract itself
    #[arg(long = "skip-gnomonsc-index")]
    pub skip_gnomonsc_index: bool,

    /// Store each block's miniblock details
    #[arg(long = "enable-miniblock-lookup")]
    pub enable_miniblock_lookup: bool,

    /// SQLite database file; in-memory storage when omitted
    #[arg(long = "db-path")]
    pub db_path: Option<String>,
}

fn split(list: &str) -> Vec<String> {
    list.split(SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl RunArgs {
    /// Apply the flags on top of `config`.
    pub fn apply(&self, config: &mut FileConfig) {
        let ix = &mut config.indexer;
        if let Some(addr) = &self.daemon_rpc_address {
            ix.endpoint = addr.clone();
        }
        if let Some(h) = self.start_topoheight {
            ix.start_height = h;
        }
        if let Some(filter) = &self.search_filter {
            ix.search_filter = split(filter);
        }
        if let Some(exclusions) = &self.sf_scid_exclusions {
            ix.scid_exclusions = split(exclusions);
        }
        if let Some(mode) = self.runmode {
            ix.run_mode = mode;
        }
        if let Some(n) = self.num_parallel_blocks {
            ix.num_parallel_blocks = n.max(1);
        }
        ix.close_on_disconnect |= self.close_on_disconnect;
        ix.miniblock_lookup |= self.enable_miniblock_lookup;

        ix.fastsync.enabled |= self.fastsync || self.forcefastsync;
        ix.fastsync.force |= self.forcefastsync;
        if let Some(diff) = self.forcefastsyncdiff {
            ix.fastsync.force_diff = diff;
        }
        ix.fastsync.skip_recheck |= self.skipfsrecheck;
        ix.fastsync.skip_registry_index |= self.skip_gnomonsc_index;

        if let Some(path) = &self.db_path {
            config.storage = StorageKind::Sqlite { path: path.clone() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_defaults() {
        let yaml = r#"
indexer:
  endpoint: "10.0.0.2:40402"
  search_filter: ["Function Foo"]
  fastsync:
    enabled: true
storage:
  kind: sqlite
  path: /var/lib/scindex/index.db
log:
  level: debug
"#;
        let cfg: FileConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.indexer.endpoint, "10.0.0.2:40402");
        assert_eq!(cfg.indexer.num_parallel_blocks, 5);
        assert!(cfg.indexer.fastsync.enabled);
        assert_eq!(cfg.indexer.fastsync.force_diff, 100);
        assert_eq!(
            cfg.storage,
            StorageKind::Sqlite { path: "/var/lib/scindex/index.db".into() }
        );
        assert_eq!(cfg.log.level, "debug");
        assert!(!cfg.log.json);
    }

    #[test]
    fn flags_override_file() {
        let mut cfg = FileConfig::default();
        cfg.indexer.search_filter = vec!["from file".into()];

        let args = RunArgs {
            daemon_rpc_address: Some("node:20000".into()),
            search_filter: Some("Function Foo;;;Function Bar;;;".into()),
            sf_scid_exclusions: Some("aa;;;bb".into()),
            runmode: Some(RunMode::Asset),
            num_parallel_blocks: Some(0),
            forcefastsync: true,
            forcefastsyncdiff: Some(500),
            db_path: Some("index.db".into()),
            ..Default::default()
        };
        args.apply(&mut cfg);

        let ix = &cfg.indexer;
        assert_eq!(ix.endpoint, "node:20000");
        assert_eq!(ix.search_filter, vec!["Function Foo", "Function Bar"]);
        assert_eq!(ix.scid_exclusions, vec!["aa", "bb"]);
        assert_eq!(ix.run_mode, RunMode::Asset);
        assert_eq!(ix.num_parallel_blocks, 1);
        assert!(ix.fastsync.enabled && ix.fastsync.force);
        assert_eq!(ix.fastsync.force_diff, 500);
        assert_eq!(cfg.storage, StorageKind::Sqlite { path: "index.db".into() });
    }
}
