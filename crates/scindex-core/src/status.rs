//! Shared runtime status: heights, the closing flag and the current phase.
//!
//! One `IndexerStatus` is shared (behind an `Arc`) by the pipeline driver,
//! the chain-height poller and downstream readers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indexer::IndexerPhase;

/// Point-in-time copy of [`IndexerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub last_indexed_height: u64,
    pub chain_height: u64,
    pub closing: bool,
    pub phase: IndexerPhase,
    /// Wall-clock time of the last committed batch.
    pub last_progress_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct IndexerStatus {
    last_indexed_height: AtomicU64,
    chain_height: AtomicU64,
    closing: AtomicBool,
    phase: Mutex<IndexerPhase>,
    last_progress_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for IndexerStatus {
    fn default() -> Self {
        Self {
            last_indexed_height: AtomicU64::new(0),
            chain_height: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            phase: Mutex::new(IndexerPhase::Idle),
            last_progress_at: Mutex::new(None),
        }
    }
}

impl IndexerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_indexed_height(&self) -> u64 {
        self.last_indexed_height.load(Ordering::SeqCst)
    }

    /// Only the pipeline driver calls this.
    pub fn set_last_indexed_height(&self, height: u64) {
        self.last_indexed_height.store(height, Ordering::SeqCst);
        *self.last_progress_at.lock().unwrap() = Some(Utc::now());
    }

    pub fn chain_height(&self) -> u64 {
        self.chain_height.load(Ordering::SeqCst)
    }

    pub fn set_chain_height(&self, height: u64) {
        self.chain_height.store(height, Ordering::SeqCst);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Set the one-way closing flag. Returns `true` on the first call.
    pub fn request_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn phase(&self) -> IndexerPhase {
        *self.phase.lock().unwrap()
    }

    pub fn set_phase(&self, phase: IndexerPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            last_indexed_height: self.last_indexed_height(),
            chain_height: self.chain_height(),
            closing: self.is_closing(),
            phase: self.phase(),
            last_progress_at: *self.last_progress_at.lock().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_flag_is_one_way() {
        let status = IndexerStatus::new();
        assert!(!status.is_closing());
        assert!(status.request_close());
        assert!(!status.request_close());
        assert!(status.is_closing());
    }

    #[test]
    fn snapshot_reflects_updates() {
        let status = IndexerStatus::new();
        status.set_chain_height(110);
        status.set_last_indexed_height(100);
        status.set_phase(IndexerPhase::SteadyState);
        let snap = status.snapshot();
        assert_eq!(snap.chain_height, 110);
        assert_eq!(snap.last_indexed_height, 100);
        assert_eq!(snap.phase, IndexerPhase::SteadyState);
        assert!(!snap.closing);
        assert!(snap.last_progress_at.is_some());
        assert!(IndexerStatus::new().snapshot().last_progress_at.is_none());
    }
}
