//! Transaction classifier.
//!
//! Turns each transaction of a block into a typed record: registration,
//! burn, normal (with per-ring-member asset records) or smart-contract
//! install/invoke. Transactions of one block are fetched and classified
//! concurrently; the results are merged under a lock.

use std::sync::Mutex;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::daemon::DaemonClient;
use crate::error::IndexerError;
use crate::types::{
    argument, BlockBatch, NormalTxWithScid, ParsedTransaction, ScMethod, ScValue,
    TransactionData, TxCounts, TxKind,
};

/// Registration transactions carry a proof-of-work id with three leading
/// zero bytes, so they can be recognised without fetching them.
pub fn is_registration_id(txid: &str) -> bool {
    txid.len() >= 6 && txid.as_bytes()[..6].iter().all(|b| *b == b'0')
}

/// Result of classifying one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxClass {
    Registration,
    Burn,
    /// A normal transfer, with one record per ring member for every payload
    /// that moves a contract asset.
    Normal { asset_records: Vec<(String, NormalTxWithScid)> },
    SmartContract(ParsedTransaction),
    /// Premine / coinbase; not counted.
    Ignored,
}

/// Classify a fetched transaction included at `height`.
pub fn classify_transaction(data: &TransactionData, height: u64) -> TxClass {
    let tx = &data.tx;
    match tx.kind {
        TxKind::Registration => TxClass::Registration,
        TxKind::Burn => TxClass::Burn,
        TxKind::Normal => {
            let mut asset_records = Vec::new();
            for (j, payload) in tx.payloads.iter().enumerate() {
                if !payload.has_scid() {
                    continue;
                }
                let members = data.ring.get(j).map(Vec::as_slice).unwrap_or(&[]);
                for address in members {
                    asset_records.push((
                        address.clone(),
                        NormalTxWithScid {
                            txid: data.txid.clone(),
                            scid: payload.scid.clone(),
                            fees: tx.fees,
                            height,
                        },
                    ));
                }
            }
            TxClass::Normal { asset_records }
        }
        TxKind::SmartContract => TxClass::SmartContract(parse_sc_transaction(data, height)),
        TxKind::Premine | TxKind::Coinbase => TxClass::Ignored,
    }
}

/// Extract the contract fields of an SC transaction.
///
/// `SC_ACTION == 1` installs a contract whose id is this transaction's id;
/// anything else invokes the contract named by the `SC_ID` argument. The
/// sender is only recoverable when the ring size is exactly 2.
pub fn parse_sc_transaction(data: &TransactionData, height: u64) -> ParsedTransaction {
    let args = &data.tx.sc_args;
    let entrypoint = argument(args, "entrypoint")
        .map(ScValue::to_string)
        .unwrap_or_default();

    let is_install = match argument(args, "SC_ACTION") {
        Some(ScValue::Uint64(n)) => *n == 1,
        Some(ScValue::String(s)) => s == "1",
        None => false,
    };

    let (method, scid) = if is_install {
        (ScMethod::Install, data.txid.clone())
    } else {
        let scid = argument(args, "SC_ID")
            .map(ScValue::to_string)
            .unwrap_or_default();
        (ScMethod::Invoke, scid)
    };

    let sender = match data.tx.payloads.first() {
        Some(p) if p.ring_size == 2 => data.signer.clone(),
        _ => String::new(),
    };

    ParsedTransaction {
        txid: data.txid.clone(),
        scid_raw: scid.as_bytes().to_vec(),
        scid,
        entrypoint,
        method,
        args: args.clone(),
        sender,
        payloads: data.tx.payloads.clone(),
        fees: data.tx.fees,
        height,
    }
}

/// Aggregate classification output of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedBlock {
    pub topoheight: u64,
    pub counts: TxCounts,
    /// SC transactions, in the block's transaction order.
    pub sc_txs: Vec<ParsedTransaction>,
    /// `(ring member address, record)` pairs for normal transfers of contract assets.
    pub asset_records: Vec<(String, NormalTxWithScid)>,
    /// Transactions that could not be fetched and were skipped.
    pub skipped: Vec<String>,
}

#[derive(Default)]
struct Accumulator {
    counts: TxCounts,
    sc_txs: Vec<(usize, ParsedTransaction)>,
    asset_records: Vec<(usize, String, NormalTxWithScid)>,
    skipped: Vec<String>,
    decode_error: Option<IndexerError>,
}

/// Fetch and classify every transaction of `batch` concurrently.
///
/// A transaction whose fetch fails after the client's retries is skipped and
/// logged. A decode failure fails the whole block so it is retried at the
/// same height. With `no_store`, asset records are not collected.
pub async fn classify_block<C: DaemonClient + ?Sized>(
    client: &C,
    batch: &BlockBatch,
    no_store: bool,
) -> Result<ClassifiedBlock, IndexerError> {
    let acc = Mutex::new(Accumulator::default());
    let height = batch.topoheight;

    let tasks = batch.tx_hashes.iter().enumerate().map(|(i, txid)| {
        let acc = &acc;
        async move {
            if is_registration_id(txid) {
                acc.lock().unwrap().counts.registration += 1;
                return;
            }

            let data = match client.get_transaction(txid).await {
                Ok(d) => d,
                Err(e @ IndexerError::Decode(_)) => {
                    tracing::error!(txid = %txid, height, error = %e, "transaction decode failed");
                    let mut acc = acc.lock().unwrap();
                    if acc.decode_error.is_none() {
                        acc.decode_error = Some(e);
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(txid = %txid, height, error = %e, "skipping transaction after failed fetch");
                    acc.lock().unwrap().skipped.push(txid.clone());
                    return;
                }
            };

            let class = classify_transaction(&data, height);
            let mut acc = acc.lock().unwrap();
            match class {
                TxClass::Registration => acc.counts.registration += 1,
                TxClass::Burn => acc.counts.burn += 1,
                TxClass::Normal { asset_records } => {
                    acc.counts.normal += 1;
                    if !no_store {
                        for (addr, rec) in asset_records {
                            acc.asset_records.push((i, addr, rec));
                        }
                    }
                }
                TxClass::SmartContract(parsed) => {
                    tracing::debug!(
                        txid = %parsed.txid,
                        scid = %parsed.scid,
                        method = %parsed.method,
                        entrypoint = %parsed.entrypoint,
                        "smart-contract transaction"
                    );
                    acc.sc_txs.push((i, parsed));
                }
                TxClass::Ignored => {}
            }
        }
    });
    join_all(tasks).await;

    let mut acc = acc.into_inner().unwrap();
    if let Some(e) = acc.decode_error.take() {
        return Err(e);
    }

    acc.sc_txs.sort_by_key(|(i, _)| *i);
    acc.asset_records.sort_by_key(|(i, _, _)| *i);

    Ok(ClassifiedBlock {
        topoheight: height,
        counts: acc.counts,
        sc_txs: acc.sc_txs.into_iter().map(|(_, tx)| tx).collect(),
        asset_records: acc
            .asset_records
            .into_iter()
            .map(|(_, addr, rec)| (addr, rec))
            .collect(),
        skipped: acc.skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::ScQuery;
    use crate::types::{BlockData, ChainInfo, DecodedTransaction, ScArgument, ScState, TxPayload};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn payload(scid: &str, ring_size: usize) -> TxPayload {
        TxPayload {
            scid: scid.into(),
            ring_size,
            burn_value: 0,
        }
    }

    fn sc_tx(txid: &str, args: Vec<ScArgument>, ring_size: usize) -> TransactionData {
        TransactionData {
            txid: txid.into(),
            tx: DecodedTransaction {
                kind: TxKind::SmartContract,
                fees: 120,
                payloads: vec![payload(&"0".repeat(64), ring_size)],
                sc_args: args,
            },
            signer: "dero1signer".into(),
            ring: vec![vec!["dero1signer".into(), "dero1other".into()]],
        }
    }

    #[test]
    fn registration_prefix() {
        assert!(is_registration_id(&format!("000000{}", "a".repeat(58))));
        assert!(!is_registration_id(&format!("00000a{}", "a".repeat(58))));
        assert!(!is_registration_id("000"));
    }

    #[test]
    fn install_uses_own_txid_as_scid() {
        let txid = "ab".repeat(32);
        let data = sc_tx(
            &txid,
            vec![
                ScArgument::new("SC_ACTION", 1u64),
                ScArgument::new("SC_CODE", "Function Initialize() Uint64"),
                ScArgument::new("entrypoint", "Initialize"),
            ],
            2,
        );
        let parsed = parse_sc_transaction(&data, 50);
        assert_eq!(parsed.method, ScMethod::Install);
        assert_eq!(parsed.scid, txid);
        assert_eq!(parsed.entrypoint, "Initialize");
        assert_eq!(parsed.sender, "dero1signer");
        assert_eq!(parsed.fees, 120);
        assert_eq!(parsed.height, 50);
    }

    #[test]
    fn invoke_with_large_ring_has_blank_sender() {
        let target = "cd".repeat(32);
        let data = sc_tx(
            &"ef".repeat(32),
            vec![
                ScArgument::new("SC_ACTION", 0u64),
                ScArgument::new("SC_ID", target.as_str()),
                ScArgument::new("entrypoint", "Deposit"),
            ],
            16,
        );
        let parsed = parse_sc_transaction(&data, 7);
        assert_eq!(parsed.method, ScMethod::Invoke);
        assert_eq!(parsed.scid, target);
        assert_eq!(parsed.sender, "");
    }

    #[test]
    fn normal_tx_emits_record_per_ring_member() {
        let asset = "11".repeat(32);
        let data = TransactionData {
            txid: "aa".repeat(32),
            tx: DecodedTransaction {
                kind: TxKind::Normal,
                fees: 90,
                payloads: vec![payload(&"0".repeat(64), 4), payload(&asset, 4)],
                sc_args: vec![],
            },
            signer: String::new(),
            ring: vec![
                vec!["r0".into(), "r1".into(), "r2".into(), "r3".into()],
                vec!["a0".into(), "a1".into(), "a2".into(), "a3".into()],
            ],
        };
        let TxClass::Normal { asset_records } = classify_transaction(&data, 9) else {
            panic!("expected normal transaction");
        };
        assert_eq!(asset_records.len(), 4);
        assert!(asset_records.iter().all(|(_, r)| r.scid == asset && r.height == 9));
        assert_eq!(asset_records[0].0, "a0");
    }

    struct FixedTxs {
        txs: HashMap<String, Result<TransactionData, String>>,
    }

    #[async_trait]
    impl DaemonClient for FixedTxs {
        async fn get_info(&self) -> Result<ChainInfo, IndexerError> {
            Ok(ChainInfo::default())
        }
        async fn get_block_hash(&self, _height: u64) -> Result<String, IndexerError> {
            Ok(String::new())
        }
        async fn get_block(&self, _hash: &str, _height: u64) -> Result<BlockData, IndexerError> {
            Ok(BlockData::default())
        }
        async fn get_transaction(&self, txid: &str) -> Result<TransactionData, IndexerError> {
            match self.txs.get(txid) {
                Some(Ok(d)) => Ok(d.clone()),
                Some(Err(msg)) if msg == "decode" => Err(IndexerError::Decode(msg.clone())),
                Some(Err(msg)) => Err(IndexerError::Rpc(msg.clone())),
                None => Err(IndexerError::Rpc("unknown tx".into())),
            }
        }
        async fn get_sc(
            &self,
            _scid: &str,
            _height: Option<u64>,
            _query: ScQuery,
        ) -> Result<ScState, IndexerError> {
            Ok(ScState::default())
        }
        async fn get_tx_pool(&self) -> Result<Vec<String>, IndexerError> {
            Ok(vec![])
        }
    }

    fn simple(txid: &str, kind: TxKind) -> TransactionData {
        TransactionData {
            txid: txid.into(),
            tx: DecodedTransaction {
                kind,
                fees: 1,
                payloads: vec![payload(&"0".repeat(64), 2)],
                sc_args: vec![],
            },
            signer: String::new(),
            ring: vec![],
        }
    }

    #[tokio::test]
    async fn block_counts_and_skips() {
        let reg = format!("000000{}", "1".repeat(58));
        let burn = "b1".repeat(32);
        let normal = "c1".repeat(32);
        let broken = "d1".repeat(32);
        let sc = "e1".repeat(32);

        let mut txs = HashMap::new();
        txs.insert(burn.clone(), Ok(simple(&burn, TxKind::Burn)));
        txs.insert(normal.clone(), Ok(simple(&normal, TxKind::Normal)));
        txs.insert(broken.clone(), Err("timeout".to_string()));
        txs.insert(
            sc.clone(),
            Ok(sc_tx(&sc, vec![ScArgument::new("SC_ACTION", 1u64)], 2)),
        );
        let client = FixedTxs { txs };

        let batch = BlockBatch {
            topoheight: 77,
            tx_hashes: vec![reg, burn, normal, broken.clone(), sc.clone()],
        };
        let out = classify_block(&client, &batch, false).await.unwrap();
        assert_eq!(out.counts, TxCounts { registration: 1, burn: 1, normal: 1 });
        assert_eq!(out.sc_txs.len(), 1);
        assert_eq!(out.sc_txs[0].scid, sc);
        assert_eq!(out.skipped, vec![broken]);
        assert_eq!(out.topoheight, 77);
    }

    #[tokio::test]
    async fn decode_failure_fails_block() {
        let bad = "f1".repeat(32);
        let mut txs = HashMap::new();
        txs.insert(bad.clone(), Err("decode".to_string()));
        let client = FixedTxs { txs };
        let batch = BlockBatch {
            topoheight: 5,
            tx_hashes: vec![bad],
        };
        let err = classify_block(&client, &batch, false).await.unwrap_err();
        assert!(matches!(err, IndexerError::Decode(_)));
    }
}
