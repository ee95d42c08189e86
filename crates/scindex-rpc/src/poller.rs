//! Background chain-height poller.
//!
//! Every interval: reconnect, fetch chain info, guard against a network
//! switch, persist the snapshot when it moved forward, publish `topoheight`
//! as the chain height. Consecutive failures can request shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use scindex_core::daemon::DaemonClient;
use scindex_core::error::IndexerError;
use scindex_core::status::IndexerStatus;
use scindex_core::store::StoreHandle;
use scindex_core::types::ChainInfo;

/// Consecutive failures after which `close_on_disconnect` shuts down.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// What to do with one successful `get_info` answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// The daemon reports a different network than the stored snapshot.
    NetworkMismatch,
    /// Publish `chain_height`; persist the snapshot if `persist`.
    Publish { chain_height: u64, persist: bool },
}

/// Decide how to apply `info` given the stored snapshot.
pub fn evaluate(info: &ChainInfo, stored: Option<&ChainInfo>) -> PollDecision {
    match stored {
        Some(prev) if prev.testnet != info.testnet => PollDecision::NetworkMismatch,
        Some(prev) => PollDecision::Publish {
            chain_height: info.topoheight,
            persist: prev.topoheight < info.topoheight,
        },
        None => PollDecision::Publish {
            chain_height: info.topoheight,
            persist: true,
        },
    }
}

/// Consecutive-failure counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        Self { count: 0, threshold }
    }

    /// Record a failure. Returns `true` once the threshold is reached.
    pub fn record_failure(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count >= self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Chain-height poller task.
pub struct HeightPoller {
    client: Arc<dyn DaemonClient>,
    store: StoreHandle,
    status: Arc<IndexerStatus>,
    interval: Duration,
    close_on_disconnect: bool,
}

impl HeightPoller {
    pub fn new(
        client: Arc<dyn DaemonClient>,
        store: StoreHandle,
        status: Arc<IndexerStatus>,
        interval: Duration,
        close_on_disconnect: bool,
    ) -> Self {
        Self {
            client,
            store,
            status,
            interval,
            close_on_disconnect,
        }
    }

    /// Run one poll round.
    pub async fn poll_once(&self) -> Result<PollDecision, IndexerError> {
        self.client.connect().await?;
        let info = self.client.get_info().await?;
        let stored = self.store.get_chain_info().await?;

        let decision = evaluate(&info, stored.as_ref());
        match decision {
            PollDecision::NetworkMismatch => {
                tracing::error!(
                    stored_testnet = ?stored.as_ref().map(|s| s.testnet),
                    daemon_testnet = info.testnet,
                    "daemon network changed, dropping channel"
                );
                self.client.close().await;
                self.status.set_chain_height(0);
            }
            PollDecision::Publish { chain_height, persist } => {
                if persist {
                    self.store.store_chain_info(&info).await?;
                }
                self.status.set_chain_height(chain_height);
            }
        }
        Ok(decision)
    }

    /// Poll until the closing flag is set.
    pub async fn run(self) {
        let mut failures = FailureCounter::new(MAX_CONSECUTIVE_FAILURES);
        loop {
            if self.status.is_closing() {
                break;
            }
            match self.poll_once().await {
                Ok(_) => failures.reset(),
                Err(e) => {
                    let exhausted = failures.record_failure();
                    tracing::warn!(error = %e, failures = failures.count(), "chain height poll failed");
                    if exhausted && self.close_on_disconnect {
                        tracing::error!(
                            failures = failures.count(),
                            "daemon unreachable, requesting shutdown"
                        );
                        self.status.request_close();
                        break;
                    }
                }
            }
            tokio::time::sleep(self.interval).await;
        }
        tracing::debug!("height poller stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
