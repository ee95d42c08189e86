//! Fastsync: skip historical replay by importing the on-chain registry of
//! previously indexed contracts.
//!
//! The registry contract carries a `signature` variable holding an armored
//! signature over its own code. Only when that signature verifies are its
//! key/value records trusted and bulk-admitted.

use std::collections::BTreeMap;

use serde::Serialize;

use scindex_core::daemon::{DaemonClient, ScQuery};
use scindex_core::error::IndexerError;
use scindex_core::indexer::IndexerConfig;
use scindex_core::network::{self, HEIGHT_SUFFIX, OWNER_SUFFIX, REGISTRY_SIGNATURE_KEY, SCID_LEN};
use scindex_core::query::values_by_key;
use scindex_core::signature::{validate_code_signature, SignatureVerifier};
use scindex_core::store::StoreHandle;
use scindex_core::types::{FastsyncImport, ScValue, ScVariable};

use crate::registry::ContractRegistry;

/// Decode registry variables into import records keyed by contract id.
///
/// Key shapes: `<scid>` holds the header string, `<scid>owner` the owner
/// address and `<scid>height` the deploy height. Anything else is ignored.
pub fn parse_registry(variables: &[ScVariable]) -> BTreeMap<String, FastsyncImport> {
    let mut records: BTreeMap<String, FastsyncImport> = BTreeMap::new();

    for var in variables {
        let ScValue::String(key) = &var.key else { continue };
        if !key.is_ascii() {
            continue;
        }
        match key.len() {
            n if n == SCID_LEN => {
                records.entry(key.clone()).or_default().headers = var.value.to_string();
            }
            n if n == SCID_LEN + OWNER_SUFFIX.len() && key.ends_with(OWNER_SUFFIX) => {
                records.entry(key[..SCID_LEN].to_string()).or_default().owner =
                    var.value.to_string();
            }
            n if n == SCID_LEN + HEIGHT_SUFFIX.len() && key.ends_with(HEIGHT_SUFFIX) => {
                let height = match &var.value {
                    ScValue::Uint64(h) => *h,
                    ScValue::String(s) => s.parse().unwrap_or(0),
                };
                records.entry(key[..SCID_LEN].to_string()).or_default().height = height;
            }
            _ => {}
        }
    }
    records
}

/// Outcome of a successful fastsync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FastsyncReport {
    pub registry_scid: String,
    /// Address that signed the registry code.
    pub signer: String,
    /// Records decoded from the registry, including the registry itself.
    pub records: usize,
    pub admitted: usize,
}

pub struct Fastsync<'a> {
    client: &'a dyn DaemonClient,
    store: &'a StoreHandle,
    registry: &'a ContractRegistry,
    config: &'a IndexerConfig,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> Fastsync<'a> {
    pub fn new(
        client: &'a dyn DaemonClient,
        store: &'a StoreHandle,
        registry: &'a ContractRegistry,
        config: &'a IndexerConfig,
        verifier: &'a dyn SignatureVerifier,
    ) -> Self {
        Self {
            client,
            store,
            registry,
            config,
            verifier,
        }
    }

    /// Authenticate the registry and bulk-admit its records at `chain_height`.
    ///
    /// Any error means the caller falls back to historical replay.
    pub async fn run(&self, chain_height: u64) -> Result<FastsyncReport, IndexerError> {
        let testnet = self
            .store
            .get_chain_info()
            .await?
            .map(|info| info.testnet)
            .unwrap_or(false);
        let scid = network::registry_scid(testnet);
        tracing::info!(scid, testnet, chain_height, "fastsync: fetching registry");

        let state = self.client.get_sc(scid, None, ScQuery::all()).await?;
        let signature = self.registry_signature(scid, &state.variables).await?;
        let signer = validate_code_signature(self.verifier, &state.code, &signature)?;
        tracing::info!(scid, signer = %signer, "fastsync: registry signature valid");

        let mut records = parse_registry(&state.variables);
        if !self.config.fastsync.skip_registry_index {
            records.entry(scid.to_string()).or_insert_with(|| FastsyncImport {
                owner: signer.clone(),
                height: chain_height,
                headers: String::new(),
            });
        }
        let total = records.len();

        let recheck = !(self.config.fastsync.skip_recheck && self.config.search_filter.is_empty());
        let admitted = self.registry.bulk_admit(records, chain_height, recheck).await?;

        tracing::info!(records = total, admitted, recheck, "fastsync: registry imported");
        Ok(FastsyncReport {
            registry_scid: scid.to_string(),
            signer,
            records: total,
            admitted,
        })
    }

    /// Signature from a full dump, or from a keyed query when the dump was
    /// truncated.
    async fn registry_signature(
        &self,
        scid: &str,
        variables: &[ScVariable],
    ) -> Result<String, IndexerError> {
        let key = ScValue::from(REGISTRY_SIGNATURE_KEY);
        if let Some(sig) = values_by_key(variables, &key).strings.into_iter().next() {
            return Ok(sig);
        }

        let keyed = self.client.get_sc(scid, None, ScQuery::keys(vec![key.clone()])).await?;
        values_by_key(&keyed.variables, &key)
            .strings
            .into_iter()
            .next()
            .ok_or_else(|| IndexerError::Signature("registry has no signature variable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use scindex_core::signature::{SignedMessage, UnavailableVerifier};
    use scindex_core::types::ChainInfo;
    use scindex_storage::InMemoryStorage;

    use crate::testutil::MockDaemon;

    const REGISTRY_CODE: &str = "Function InputSCID(scid String) Uint64\n10 RETURN 0\nEnd Function";

    struct AcceptAll;

    impl SignatureVerifier for AcceptAll {
        fn verify(&self, msg: &SignedMessage) -> Result<String, IndexerError> {
            Ok(msg.address.clone())
        }
    }

    fn armor(message: &str) -> String {
        format!(
            "-----BEGIN DERO SIGNED MESSAGE-----\nAddress: dero1qyregistry\nC: 0a\nS: 0b\n\n{}\n-----END DERO SIGNED MESSAGE-----\n",
            base64::encode(message)
        )
    }

    fn scid(c: char) -> String {
        std::iter::repeat(c).take(SCID_LEN).collect()
    }

    fn registry_vars() -> Vec<ScVariable> {
        let a = scid('a');
        let b = scid('b');
        vec![
            ScVariable::new(REGISTRY_SIGNATURE_KEY, armor(REGISTRY_CODE)),
            ScVariable::new(a.as_str(), "headers-a"),
            ScVariable::new(format!("{a}owner"), "dero1alice"),
            ScVariable::new(format!("{a}height"), 1200u64),
            ScVariable::new(format!("{b}owner"), "dero1bob"),
            ScVariable::new(format!("{b}height"), "900"),
        ]
    }

    fn setup(mock: MockDaemon, config: IndexerConfig) -> (Arc<MockDaemon>, StoreHandle, ContractRegistry, IndexerConfig) {
        let mock = Arc::new(mock);
        let store = StoreHandle::new(Arc::new(InMemoryStorage::new()));
        let registry = ContractRegistry::new(mock.clone(), store.clone(), Arc::new(config.clone()));
        (mock, store, registry, config)
    }

    #[test]
    fn parses_key_shapes() {
        let records = parse_registry(&registry_vars());
        assert_eq!(records.len(), 2);

        let a = &records[&scid('a')];
        assert_eq!(a.owner, "dero1alice");
        assert_eq!(a.height, 1200);
        assert_eq!(a.headers, "headers-a");

        let b = &records[&scid('b')];
        assert_eq!(b.owner, "dero1bob");
        assert_eq!(b.height, 900);
        assert!(b.headers.is_empty());
    }

    #[tokio::test]
    async fn imports_registry_with_valid_signature() {
        let registry_scid = network::registry_scid(false);
        let mock = MockDaemon::new(5_000)
            .with_contract(registry_scid, REGISTRY_CODE, registry_vars())
            .with_contract(&scid('a'), "code a", vec![ScVariable::new("x", 1u64)])
            .with_contract(&scid('b'), "code b", vec![ScVariable::new("y", 2u64)]);
        let (mock, store, registry, config) = setup(mock, IndexerConfig::default());

        let report = Fastsync::new(mock.as_ref(), &store, &registry, &config, &AcceptAll)
            .run(5_000)
            .await
            .unwrap();

        assert_eq!(report.registry_scid, registry_scid);
        assert_eq!(report.signer, "dero1qyregistry");
        assert_eq!(report.records, 3);
        assert_eq!(report.admitted, 3);
        assert!(registry.contains(&scid('a')));
        assert!(registry.contains(registry_scid));

        let owners = store.get_all_owners().await.unwrap();
        assert_eq!(owners[&scid('b')], "dero1bob");
        assert_eq!(owners[registry_scid], "dero1qyregistry");
    }

    #[tokio::test]
    async fn testnet_snapshot_selects_testnet_registry() {
        let registry_scid = network::registry_scid(true);
        let mock = MockDaemon::new(100).with_contract(registry_scid, REGISTRY_CODE, registry_vars());
        let config = IndexerConfig {
            fastsync: scindex_core::FastsyncConfig {
                skip_recheck: true,
                skip_registry_index: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (mock, store, registry, config) = setup(mock, config);
        store
            .store_chain_info(&ChainInfo { testnet: true, topoheight: 100, ..Default::default() })
            .await
            .unwrap();

        let report = Fastsync::new(mock.as_ref(), &store, &registry, &config, &AcceptAll)
            .run(100)
            .await
            .unwrap();

        assert_eq!(report.registry_scid, registry_scid);
        // No recheck: admitted straight from the records, registry itself skipped.
        assert_eq!(report.admitted, 2);
        assert!(!registry.contains(registry_scid));
        assert_eq!(store.get_interaction_heights(&scid('a')).await.unwrap(), vec![1200]);
    }

    #[tokio::test]
    async fn unverified_signature_imports_nothing() {
        let registry_scid = network::registry_scid(false);
        let mock = MockDaemon::new(100).with_contract(registry_scid, REGISTRY_CODE, registry_vars());
        let (mock, store, registry, config) = setup(mock, IndexerConfig::default());

        let err = Fastsync::new(mock.as_ref(), &store, &registry, &config, &UnavailableVerifier)
            .run(100)
            .await
            .unwrap_err();

        assert!(matches!(err, IndexerError::Signature(_)));
        assert!(registry.is_empty());
        assert!(store.get_all_owners().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn code_mismatch_is_rejected() {
        let registry_scid = network::registry_scid(false);
        let mock = MockDaemon::new(100).with_contract(registry_scid, "tampered code", registry_vars());
        let (mock, store, registry, config) = setup(mock, IndexerConfig::default());

        let result = Fastsync::new(mock.as_ref(), &store, &registry, &config, &AcceptAll)
            .run(100)
            .await;
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
