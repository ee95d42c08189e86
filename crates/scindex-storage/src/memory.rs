//! In-memory storage backend.
//!
//! Keeps the whole index in one [`IndexSnapshot`] behind a lock. Useful for
//! tests, short-lived runs and as the RAM store of an asset-mode indexer.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use scindex_core::error::IndexerError;
use scindex_core::store::{CommitGroup, IndexSnapshot, IndexStore};
use scindex_core::types::{
    ChainInfo, NormalTxWithScid, ParsedTransaction, ScVariable, TxCountKind, TxCounts,
};

/// In-memory index storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    data: Mutex<IndexSnapshot>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            data: Mutex::new(snapshot),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> IndexSnapshot {
        self.data.lock().unwrap().clone()
    }
}

#[async_trait]
impl IndexStore for InMemoryStorage {
    async fn store_owner(&self, scid: &str, owner: &str) -> Result<(), IndexerError> {
        self.data.lock().unwrap().set_owner(scid, owner);
        Ok(())
    }

    async fn get_owner(&self, scid: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.data.lock().unwrap().owners.get(scid).cloned())
    }

    async fn get_all_owners(&self) -> Result<BTreeMap<String, String>, IndexerError> {
        Ok(self.data.lock().unwrap().owners.clone())
    }

    async fn store_invoke_details(&self, record: &ParsedTransaction) -> Result<(), IndexerError> {
        self.data.lock().unwrap().push_invoke(record.clone());
        Ok(())
    }

    async fn get_invoke_details(&self, scid: &str) -> Result<Vec<ParsedTransaction>, IndexerError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .invokes
            .get(scid)
            .cloned()
            .unwrap_or_default())
    }

    async fn store_variables(
        &self,
        scid: &str,
        height: u64,
        vars: &[ScVariable],
    ) -> Result<(), IndexerError> {
        self.data
            .lock()
            .unwrap()
            .set_variables(scid, height, vars.to_vec());
        Ok(())
    }

    async fn get_variables_at(
        &self,
        scid: &str,
        height: u64,
    ) -> Result<Option<(u64, Vec<ScVariable>)>, IndexerError> {
        Ok(self.data.lock().unwrap().variables_at(scid, height))
    }

    async fn get_variable_heights(&self, scid: &str) -> Result<Vec<u64>, IndexerError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .variables
            .get(scid)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn store_interaction_height(&self, scid: &str, height: u64) -> Result<(), IndexerError> {
        self.data.lock().unwrap().push_interaction_height(scid, height);
        Ok(())
    }

    async fn get_interaction_heights(&self, scid: &str) -> Result<Vec<u64>, IndexerError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .interaction_heights
            .get(scid)
            .cloned()
            .unwrap_or_default())
    }

    async fn store_normal_tx_with_scid(
        &self,
        address: &str,
        record: &NormalTxWithScid,
    ) -> Result<(), IndexerError> {
        self.data
            .lock()
            .unwrap()
            .push_normal_tx(address, record.clone());
        Ok(())
    }

    async fn get_normal_txs_with_scid(
        &self,
        address: &str,
    ) -> Result<Vec<NormalTxWithScid>, IndexerError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .normal_txs
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn store_tx_count(&self, kind: TxCountKind, count: u64) -> Result<(), IndexerError> {
        self.data.lock().unwrap().set_tx_count(kind, count);
        Ok(())
    }

    async fn get_tx_count(&self, kind: TxCountKind) -> Result<u64, IndexerError> {
        Ok(self.data.lock().unwrap().tx_counts.get(kind))
    }

    async fn store_last_indexed_height(&self, height: u64) -> Result<(), IndexerError> {
        self.data.lock().unwrap().last_indexed_height = height;
        Ok(())
    }

    async fn get_last_indexed_height(&self) -> Result<u64, IndexerError> {
        Ok(self.data.lock().unwrap().last_indexed_height)
    }

    async fn commit_progress(&self, counts: &TxCounts, height: u64) -> Result<(), IndexerError> {
        self.data.lock().unwrap().commit_progress(counts, height);
        Ok(())
    }

    async fn store_chain_info(&self, info: &ChainInfo) -> Result<(), IndexerError> {
        self.data.lock().unwrap().chain_info = Some(info.clone());
        Ok(())
    }

    async fn get_chain_info(&self) -> Result<Option<ChainInfo>, IndexerError> {
        Ok(self.data.lock().unwrap().chain_info.clone())
    }

    async fn store_invalid_deploy(&self, scid: &str, fees: u64) -> Result<(), IndexerError> {
        self.data
            .lock()
            .unwrap()
            .invalid_deploys
            .insert(scid.to_string(), fees);
        Ok(())
    }

    async fn get_invalid_deploys(&self) -> Result<BTreeMap<String, u64>, IndexerError> {
        Ok(self.data.lock().unwrap().invalid_deploys.clone())
    }

    async fn store_block_details(
        &self,
        block_hash: &str,
        details: &serde_json::Value,
    ) -> Result<(), IndexerError> {
        self.data
            .lock()
            .unwrap()
            .block_details
            .insert(block_hash.to_string(), details.clone());
        Ok(())
    }

    async fn commit_group(&self, group: &CommitGroup) -> Result<(), IndexerError> {
        self.data.lock().unwrap().apply(group);
        Ok(())
    }

    async fn merge(&self, staged: IndexSnapshot) -> Result<(), IndexerError> {
        self.data.lock().unwrap().merge(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scindex_core::types::{ScMethod, ScValue};

    fn record(scid: &str, txid: &str, height: u64) -> ParsedTransaction {
        ParsedTransaction {
            txid: txid.into(),
            scid: scid.into(),
            scid_raw: scid.as_bytes().to_vec(),
            entrypoint: "Play".into(),
            method: ScMethod::Invoke,
            args: vec![],
            sender: String::new(),
            payloads: vec![],
            fees: 10,
            height,
        }
    }

    #[tokio::test]
    async fn owners_are_keyed_by_contract() {
        let store = InMemoryStorage::new();
        store.store_owner("sc1", "dero1a").await.unwrap();
        store.store_owner("sc1", "dero1a").await.unwrap();
        store.store_owner("sc2", "").await.unwrap();

        let owners = store.get_all_owners().await.unwrap();
        assert_eq!(owners.len(), 2);
        assert_eq!(store.get_owner("sc1").await.unwrap().unwrap(), "dero1a");
        assert!(store.get_owner("sc3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invoke_history_allows_many_per_height() {
        let store = InMemoryStorage::new();
        store.store_invoke_details(&record("sc", "t1", 10)).await.unwrap();
        store.store_invoke_details(&record("sc", "t2", 10)).await.unwrap();
        store.store_invoke_details(&record("sc", "t3", 11)).await.unwrap();
        assert_eq!(store.get_invoke_details("sc").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn repeated_invoke_is_stored_once() {
        let store = InMemoryStorage::new();
        store.store_invoke_details(&record("sc", "t2", 12)).await.unwrap();
        store.store_invoke_details(&record("sc", "t1", 11)).await.unwrap();
        store.store_invoke_details(&record("sc", "t2", 12)).await.unwrap();

        let txids: Vec<String> = store
            .get_invoke_details("sc")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.txid)
            .collect();
        assert_eq!(txids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn variables_nearest_height() {
        let store = InMemoryStorage::new();
        store
            .store_variables("sc", 100, &[ScVariable::new("C", 1u64)])
            .await
            .unwrap();
        store
            .store_variables("sc", 200, &[ScVariable::new("C", 2u64)])
            .await
            .unwrap();

        let (h, vars) = store.get_variables_at("sc", 150).await.unwrap().unwrap();
        assert_eq!(h, 100);
        assert_eq!(vars[0].value, ScValue::Uint64(1));
        assert!(store.get_variables_at("sc", 99).await.unwrap().is_none());
        assert_eq!(store.get_variable_heights("sc").await.unwrap(), vec![100, 200]);
    }

    #[tokio::test]
    async fn counters_and_scalars() {
        let store = InMemoryStorage::new();
        store.store_tx_count(TxCountKind::Normal, 12).await.unwrap();
        store.store_last_indexed_height(103).await.unwrap();
        store
            .store_chain_info(&ChainInfo {
                topoheight: 110,
                testnet: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.get_tx_count(TxCountKind::Normal).await.unwrap(), 12);
        assert_eq!(store.get_tx_count(TxCountKind::Burn).await.unwrap(), 0);
        assert_eq!(store.get_last_indexed_height().await.unwrap(), 103);
        assert!(store.get_chain_info().await.unwrap().unwrap().testnet);
    }

    #[tokio::test]
    async fn progress_adds_counts_and_moves_height() {
        let store = InMemoryStorage::new();
        store.store_tx_count(TxCountKind::Burn, 3).await.unwrap();
        let counts = TxCounts {
            burn: 2,
            normal: 1,
            ..Default::default()
        };
        store.commit_progress(&counts, 42).await.unwrap();

        assert_eq!(store.get_tx_count(TxCountKind::Burn).await.unwrap(), 5);
        assert_eq!(store.get_tx_count(TxCountKind::Normal).await.unwrap(), 1);
        assert_eq!(store.get_last_indexed_height().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn merge_staged_snapshot() {
        let store = InMemoryStorage::new();
        store.store_last_indexed_height(900).await.unwrap();

        let mut staged = IndexSnapshot::new();
        staged.set_owner("sc9", "dero1owner");
        staged.set_variables("sc9", 900, vec![ScVariable::new("owner", "dero1owner")]);
        staged.push_interaction_height("sc9", 900);
        store.merge(staged).await.unwrap();

        assert_eq!(store.get_owner("sc9").await.unwrap().unwrap(), "dero1owner");
        assert_eq!(store.get_interaction_heights("sc9").await.unwrap(), vec![900]);
        assert_eq!(store.get_last_indexed_height().await.unwrap(), 900);
    }
}
