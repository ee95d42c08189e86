//! History-gap recovery for pruned daemons.
//!
//! A pruned node only serves a suffix of the chain. Starting from a height it
//! cannot serve, probe forward in fixed jumps until some height answers, then
//! walk up from just past the last failed probe to find the lowest height it
//! can serve. Costs `O(distance / jump + jump)` probes.

use scindex_core::daemon::DaemonClient;
use scindex_core::error::IndexerError;
use scindex_core::status::IndexerStatus;

/// `Ok(true)` if the daemon serves `height`.
async fn probe(client: &dyn DaemonClient, height: u64) -> Result<bool, IndexerError> {
    match client.get_block_hash(height).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_height_unavailable() => Ok(false),
        Err(e) => Err(e),
    }
}

fn aborted() -> IndexerError {
    IndexerError::Aborted {
        reason: "close requested during gap recovery".into(),
    }
}

/// Lowest height at or above `from` that the daemon can serve.
///
/// Returns `from` itself when it is available. Fails with
/// [`IndexerError::HeightUnavailable`] if nothing up to `chain_height`
/// answers, and with [`IndexerError::Aborted`] once the closing flag is set.
pub async fn find_lowest_available(
    client: &dyn DaemonClient,
    from: u64,
    jump: u64,
    chain_height: u64,
    status: &IndexerStatus,
) -> Result<u64, IndexerError> {
    if probe(client, from).await? {
        return Ok(from);
    }

    let jump = jump.max(1);
    let mut last_failed = from;
    let found = loop {
        if status.is_closing() {
            return Err(aborted());
        }
        if last_failed >= chain_height {
            return Err(IndexerError::HeightUnavailable { height: chain_height });
        }
        let next = last_failed.saturating_add(jump).min(chain_height);
        if probe(client, next).await? {
            tracing::info!(height = next, "gap probe succeeded");
            break next;
        }
        tracing::debug!(height = next, "gap probe failed");
        last_failed = next;
    };

    let start = (last_failed + 1).max(found.saturating_sub(jump) + 1);
    for height in start..found {
        if status.is_closing() {
            return Err(aborted());
        }
        if probe(client, height).await? {
            return Ok(height);
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockDaemon;

    #[tokio::test]
    async fn available_start_costs_one_probe() {
        let mock = MockDaemon::new(100);
        let status = IndexerStatus::new();
        assert_eq!(find_lowest_available(&mock, 42, 10, 100, &status).await.unwrap(), 42);
        assert_eq!(mock.probes(), 1);
    }

    #[tokio::test]
    async fn converges_on_first_served_height() {
        let mock = MockDaemon::new(20_000).unavailable(1..5000);
        let status = IndexerStatus::new();

        let lowest = find_lowest_available(&mock, 1, 1000, 20_000, &status).await.unwrap();
        assert_eq!(lowest, 5000);
        // 1 + 5 forward probes + at most `jump` upward probes.
        assert!(mock.probes() <= 1 + 5000 / 1000 + 1 + 1000, "probes: {}", mock.probes());
    }

    #[tokio::test]
    async fn forward_probe_is_capped_at_chain_height() {
        let mock = MockDaemon::new(120).unavailable(0..120);
        let status = IndexerStatus::new();

        assert_eq!(find_lowest_available(&mock, 10, 1000, 120, &status).await.unwrap(), 120);
    }

    #[tokio::test]
    async fn nothing_served_is_an_error() {
        let mock = MockDaemon::new(50).unavailable(0..1000);
        let status = IndexerStatus::new();

        let err = find_lowest_available(&mock, 1, 20, 50, &status).await.unwrap_err();
        assert!(err.is_height_unavailable());
    }

    #[tokio::test]
    async fn closing_aborts_search() {
        let mock = MockDaemon::new(20_000).unavailable(1..5000);
        let status = IndexerStatus::new();
        status.request_close();

        let err = find_lowest_available(&mock, 1, 1000, 20_000, &status).await.unwrap_err();
        assert!(matches!(err, IndexerError::Aborted { .. }));
    }
}
