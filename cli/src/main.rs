//! SCIndex CLI: run the smart-contract indexer against a DERO daemon.
//!
//! # Commands
//! ```text
//! scindex run    [--daemon-rpc-address <host:port>] [--search-filter <a;;;b>] [--fastsync] ...
//! scindex status --db-path <index.db>
//! scindex info
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use scindex_core::daemon::WireCodec;
use scindex_core::error::IndexerError;
use scindex_core::network;
use scindex_core::types::{DecodedTransaction, TxCountKind};
use scindex_core::IndexerConfig;
use scindex_daemon::{Indexer, IndexerBuilder};
use scindex_rpc::DeroDaemonClient;
use scindex_storage::StorageKind;

mod config;
mod logging;

use config::{FileConfig, RunArgs};

/// Interval between progress log lines while running.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "scindex",
    about = "DERO smart-contract indexer",
    long_about = "
SCIndex follows a DERO daemon block by block, tracks every smart contract
whose code matches the search filter, and records owners, invokes and
variable snapshots per height.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the log filter (e.g. scindex_daemon=debug)
",
    version
)]
struct Cli {
    /// YAML configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit JSON logs
    #[arg(long = "json-logs", global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the chain until interrupted
    Run(RunArgs),

    /// Print the persisted index state as JSON
    Status {
        /// SQLite database file
        #[arg(long = "db-path")]
        db_path: PathBuf,
    },

    /// Show defaults and network constants
    Info,
}

/// Wire codec used when no binary transaction decoder is linked in. Every
/// decode fails, so only registration-only blocks can be indexed.
struct UnlinkedCodec;

impl WireCodec for UnlinkedCodec {
    fn decode_transaction(&self, _raw: &[u8]) -> Result<DecodedTransaction, IndexerError> {
        Err(IndexerError::Decode("no transaction wire codec linked".into()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    if cli.debug {
        cfg.log.level = "debug".into();
    }
    cfg.log.json |= cli.json_logs;

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut cfg);
            logging::init_tracing(&cfg.log);
            cmd_run(cfg).await
        }
        Commands::Status { db_path } => cmd_status(db_path).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_run(cfg: FileConfig) -> Result<()> {
    tracing::info!(
        endpoint = %cfg.indexer.endpoint,
        storage = ?cfg.storage,
        filters = cfg.indexer.search_filter.len(),
        fastsync = cfg.indexer.fastsync.enabled,
        "starting scindex"
    );
    tracing::warn!("no transaction wire codec linked; blocks carrying transactions will not decode");

    let store = scindex_storage::open(&cfg.storage)
        .await
        .context("opening storage")?;
    let client = Arc::new(DeroDaemonClient::new(
        cfg.indexer.endpoint.clone(),
        Arc::new(UnlinkedCodec),
    ));
    let indexer = Arc::new(
        IndexerBuilder::from_config(cfg.indexer)
            .client(client)
            .store(store)
            .build()
            .context("building indexer")?,
    );

    let mut runner = tokio::spawn({
        let indexer = indexer.clone();
        async move { indexer.run().await }
    });
    let reporter = tokio::spawn(report_progress(indexer.clone()));

    let finished = tokio::select! {
        res = &mut runner => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(res) => res,
        None => {
            tracing::info!("interrupt received, closing");
            indexer.close().await;
            runner.await
        }
    };
    reporter.abort();

    result.context("indexer task failed")??;
    Ok(())
}

async fn report_progress(indexer: Arc<Indexer>) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let status = indexer.status();
        tracing::info!(
            last_indexed = status.last_indexed_height,
            chain_height = status.chain_height,
            phase = %status.phase,
            validated = indexer.validated_contracts().len(),
            "progress"
        );
    }
}

async fn cmd_status(db_path: PathBuf) -> Result<()> {
    let path = db_path.to_string_lossy().into_owned();
    let store = scindex_storage::open(&StorageKind::Sqlite { path })
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;

    let owners = store.get_all_owners().await?;
    let mut counts = serde_json::Map::new();
    for kind in TxCountKind::ALL {
        counts.insert(kind.to_string(), json!(store.get_tx_count(kind).await?));
    }

    let report = json!({
        "last_indexed_height": store.get_last_indexed_height().await?,
        "chain_info": store.get_chain_info().await?,
        "validated_contracts": owners.len(),
        "invalid_deploys": store.get_invalid_deploys().await?.len(),
        "tx_counts": counts,
    });
    store.close().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_info() {
    let defaults = IndexerConfig::default();
    println!("SCIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default daemon: {}", defaults.endpoint);
    println!("  Default parallel blocks: {}", defaults.num_parallel_blocks);
    println!("  Default gap jump: {} blocks", defaults.gap_jump);
    println!("  Default force-fastsync diff: {} blocks", defaults.fastsync.force_diff);
    println!("  Registry (mainnet): {}", network::MAINNET_REGISTRY_SCID);
    println!("  Registry (testnet): {}", network::TESTNET_REGISTRY_SCID);
    println!("  Built-in contracts: {}", network::BUILTIN_SCIDS.join(", "));
    println!("  Storage backends: memory, SQLite (--db-path)");
}
