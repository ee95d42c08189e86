//! [`DaemonClient`] over the DERO daemon's WebSocket JSON-RPC surface.
//!
//! Response shapes are parsed loosely (missing fields default) and daemon
//! errors are classified once here: height lookups surface
//! [`IndexerError::HeightUnavailable`], refused variable dumps fall back to a
//! code-only (or keyed) `DERO.GetSC`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use scindex_core::daemon::{DaemonClient, ScQuery, WireCodec};
use scindex_core::error::IndexerError;
use scindex_core::types::{BlockData, ChainInfo, ScState, ScValue, ScVariable, TransactionData};

use crate::client::WsRpcClient;
use crate::error::TransportError;
use crate::retry::RetryConfig;

/// Value the daemon returns for a requested key that does not exist.
const MISSING_LEAF: &str = "leaf not found";

// ─── Response shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct BlockHeader {
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct BlockHeaderResult {
    #[serde(default)]
    block_header: BlockHeader,
}

#[derive(Debug, Default, Deserialize)]
struct BlockJson {
    #[serde(default)]
    tx_hashes: Vec<String>,
    #[serde(default)]
    miniblocks: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TxRelated {
    #[serde(default)]
    signer: String,
    #[serde(default)]
    ring: Vec<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct GetTransactionResult {
    #[serde(default)]
    txs_as_hex: Vec<String>,
    #[serde(default)]
    txs: Vec<TxRelated>,
}

#[derive(Debug, Default, Deserialize)]
struct GetScResult {
    #[serde(default)]
    code: String,
    #[serde(default)]
    stringkeys: HashMap<String, Value>,
    #[serde(default)]
    uint64keys: HashMap<String, Value>,
    #[serde(default)]
    valuesuint64: Vec<String>,
    #[serde(default)]
    valuesstring: Vec<String>,
    #[serde(default)]
    balances: HashMap<String, u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GetTxPoolResult {
    #[serde(default)]
    txs: Vec<String>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// DERO daemon client.
pub struct DeroDaemonClient {
    endpoint: String,
    rpc: WsRpcClient,
    codec: Arc<dyn WireCodec>,
}

impl DeroDaemonClient {
    pub fn new(endpoint: impl Into<String>, codec: Arc<dyn WireCodec>) -> Self {
        Self::with_retry(endpoint, codec, RetryConfig::default())
    }

    pub fn with_retry(
        endpoint: impl Into<String>,
        codec: Arc<dyn WireCodec>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            rpc: WsRpcClient::new(retry),
            codec,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TransportError> {
        let value = self.rpc.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn sc_params(scid: &str, height: Option<u64>, query: &ScQuery, variables: bool) -> Value {
        let mut params = json!({
            "scid": scid,
            "code": query.code,
            "variables": variables,
        });
        if let Some(h) = height {
            params["topoheight"] = json!(h);
        }
        if !variables && !query.keys.is_empty() {
            let uints: Vec<u64> = query.keys.iter().filter_map(ScValue::as_u64).collect();
            let strings: Vec<&str> = query.keys.iter().filter_map(ScValue::as_str).collect();
            params["keysuint64"] = json!(uints);
            params["keysstring"] = json!(strings);
        }
        params
    }

    /// Convert a raw variable cell. String cells are hex; a cell that decodes
    /// to a compressed point becomes an address.
    fn decode_value(&self, raw: &Value) -> ScValue {
        match raw {
            Value::Number(n) => match n.as_u64() {
                Some(v) => ScValue::Uint64(v),
                None => ScValue::Uint64(n.as_f64().unwrap_or(0.0) as u64),
            },
            Value::String(s) => match hex::decode(s) {
                Ok(bytes) => match self.codec.decode_address(&bytes) {
                    Some(addr) => ScValue::String(addr),
                    None => ScValue::String(String::from_utf8_lossy(&bytes).into_owned()),
                },
                Err(_) => ScValue::String(s.clone()),
            },
            other => ScValue::String(other.to_string()),
        }
    }

    fn build_state(&self, result: GetScResult, query: &ScQuery) -> ScState {
        let mut variables = Vec::with_capacity(result.stringkeys.len() + result.uint64keys.len());

        for (key, raw) in &result.stringkeys {
            variables.push(ScVariable {
                key: ScValue::String(key.clone()),
                value: self.decode_value(raw),
            });
        }
        for (key, raw) in &result.uint64keys {
            let key = key
                .parse::<u64>()
                .map(ScValue::Uint64)
                .unwrap_or_else(|_| ScValue::String(key.clone()));
            variables.push(ScVariable {
                key,
                value: self.decode_value(raw),
            });
        }

        // Keyed lookups answer positionally, uint64 keys first.
        if variables.is_empty() && !query.keys.is_empty() {
            let uint_keys = query.keys.iter().filter(|k| k.as_u64().is_some());
            let str_keys = query.keys.iter().filter(|k| k.as_str().is_some());
            let pairs = uint_keys
                .zip(result.valuesuint64.iter())
                .chain(str_keys.zip(result.valuesstring.iter()));
            for (key, value) in pairs {
                if value.contains(MISSING_LEAF) {
                    continue;
                }
                variables.push(ScVariable {
                    key: key.clone(),
                    value: ScValue::String(value.clone()),
                });
            }
        }

        ScState {
            code: result.code,
            variables,
            balances: result.balances,
        }
    }
}

#[async_trait]
impl DaemonClient for DeroDaemonClient {
    async fn connect(&self) -> Result<(), IndexerError> {
        self.rpc.connect(&self.endpoint).await.map_err(IndexerError::from)
    }

    async fn close(&self) {
        self.rpc.close().await;
    }

    async fn get_info(&self) -> Result<ChainInfo, IndexerError> {
        Ok(self.call("DERO.GetInfo", Value::Null).await?)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, IndexerError> {
        let value = self
            .rpc
            .call_mapped(
                "DERO.GetBlockHeaderByTopoHeight",
                json!({ "topoheight": height }),
                |e| TransportError::for_height(e, height),
            )
            .await?;
        let result: BlockHeaderResult =
            serde_json::from_value(value).map_err(TransportError::from)?;
        if result.block_header.hash.is_empty() {
            return Err(IndexerError::HeightUnavailable { height });
        }
        Ok(result.block_header.hash)
    }

    async fn get_block(&self, hash: &str, height: u64) -> Result<BlockData, IndexerError> {
        let value = self
            .rpc
            .call_mapped("DERO.GetBlock", json!({ "hash": hash }), |e| {
                TransportError::for_height(e, height)
            })
            .await?;

        // `json` is the block serialized as a JSON string.
        let block: BlockJson = match value.get("json") {
            Some(Value::String(s)) => serde_json::from_str(s)
                .map_err(|e| IndexerError::Decode(format!("block {hash}: {e}")))?,
            Some(obj @ Value::Object(_)) => serde_json::from_value(obj.clone())
                .map_err(|e| IndexerError::Decode(format!("block {hash}: {e}")))?,
            _ => BlockJson::default(),
        };

        Ok(BlockData {
            hash: hash.to_string(),
            topoheight: height,
            tx_hashes: block.tx_hashes,
            details: block.miniblocks,
        })
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionData, IndexerError> {
        let result: GetTransactionResult = self
            .call("DERO.GetTransaction", json!({ "txs_hashes": [txid] }))
            .await?;

        let raw_hex = result
            .txs_as_hex
            .first()
            .ok_or_else(|| IndexerError::Rpc(format!("transaction {txid} not returned")))?;
        let raw = hex::decode(raw_hex)
            .map_err(|e| IndexerError::Decode(format!("tx {txid} hex: {e}")))?;
        let tx = self.codec.decode_transaction(&raw)?;
        let related = result.txs.into_iter().next().unwrap_or_default();

        Ok(TransactionData {
            txid: txid.to_string(),
            tx,
            signer: related.signer,
            ring: related.ring,
        })
    }

    async fn get_sc(
        &self,
        scid: &str,
        height: Option<u64>,
        query: ScQuery,
    ) -> Result<ScState, IndexerError> {
        let params = Self::sc_params(scid, height, &query, query.variables);
        let result: GetScResult = match self.call("DERO.GetSC", params).await {
            Ok(result) => result,
            Err(e) if e.is_variable_limit() && query.variables => {
                tracing::debug!(scid, "variable dump refused, retrying without variables");
                self.call("DERO.GetSC", Self::sc_params(scid, height, &query, false))
                    .await?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.build_state(result, &query))
    }

    async fn get_tx_pool(&self) -> Result<Vec<String>, IndexerError> {
        let result: GetTxPoolResult = self.call("DERO.GetTxPool", Value::Null).await?;
        Ok(result.txs)
    }
}
