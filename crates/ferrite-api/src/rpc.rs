//! # JSON-RPC Dispatch
//!
//! Request/response envelopes and the method table: the node's native
//! methods plus the web3-style aliases. Numeric returns on `eth_*`
//! methods are `0x`-prefixed hex; block tags accept
//! `latest | earliest | pending | 0x<hex-height>`.

use std::str::FromStr;
use std::sync::Arc;

use ferrite_types::{Address, Block, Digest, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::NodeBackend;
use crate::error::ApiError;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Must be "2.0".
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Caller correlation id, echoed back.
    #[serde(default)]
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Positional or named parameters.
    #[serde(default)]
    pub params: Value,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Echoed correlation id.
    pub id: Value,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    /// Success response.
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    pub fn err(id: Value, error: &ApiError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error.to_json()),
        }
    }
}

// =============================================================================
// PARAMETER HELPERS
// =============================================================================

fn param(params: &Value, index: usize) -> Result<&Value, ApiError> {
    params
        .get(index)
        .ok_or_else(|| ApiError::InvalidParams(format!("missing parameter {index}")))
}

fn param_str(params: &Value, index: usize) -> Result<&str, ApiError> {
    param(params, index)?
        .as_str()
        .ok_or_else(|| ApiError::InvalidParams(format!("parameter {index} must be a string")))
}

fn parse_digest(raw: &str) -> Result<Digest, ApiError> {
    Digest::from_str(raw).map_err(|_| ApiError::InvalidParams(format!("bad digest: {raw}")))
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Address::from_str(raw).map_err(|_| ApiError::InvalidParams(format!("bad address: {raw}")))
}

/// `0x`-prefixed hex quantity.
pub fn qty_hex(value: u64) -> String {
    format!("0x{value:x}")
}

/// `latest | earliest | pending | 0x<hex-height>` to a concrete height.
fn resolve_tag(tag: &str, latest: u64) -> Result<u64, ApiError> {
    match tag {
        "latest" | "pending" => Ok(latest),
        "earliest" => Ok(0),
        hex_height => {
            let stripped = hex_height
                .strip_prefix("0x")
                .ok_or_else(|| ApiError::InvalidParams(format!("bad block tag: {tag}")))?;
            u64::from_str_radix(stripped, 16)
                .map_err(|_| ApiError::InvalidParams(format!("bad block tag: {tag}")))
        }
    }
}

// =============================================================================
// JSON SHAPING
// =============================================================================

fn tx_to_json(tx: &Transaction) -> Value {
    json!({
        "identity": tx.identity().to_string(),
        "version": tx.version,
        "type": format!("{:?}", tx.tx_type).to_lowercase(),
        "inputs": tx.inputs.iter().map(|input| json!({
            "prev_tx": input.previous_output.tx.to_string(),
            "output_index": input.previous_output.index,
            "sequence": input.sequence,
        })).collect::<Vec<_>>(),
        "outputs": tx.outputs.iter().map(|output| json!({
            "value": output.value,
            "recipient": output.recipient.to_string(),
            "index": output.index,
        })).collect::<Vec<_>>(),
        "lock_time": tx.lock_time,
        "timestamp_ms": tx.timestamp_ms,
        "size": tx.size_bytes(),
    })
}

fn block_to_json(block: &Block, include_txs: bool) -> Value {
    let transactions: Value = if include_txs {
        block.transactions.iter().map(tx_to_json).collect()
    } else {
        block
            .transactions
            .iter()
            .map(|tx| Value::String(tx.identity().to_string()))
            .collect()
    };
    json!({
        "identity": block.identity().to_string(),
        "version": block.header.version,
        "prev_digest": block.header.prev_digest.to_string(),
        "merkle_root": block.header.merkle_root.to_string(),
        "timestamp": block.header.timestamp,
        "nonce": block.header.nonce,
        "difficulty": block.header.difficulty,
        "height": block.header.height,
        "tx_count": block.header.tx_count,
        "transactions": transactions,
    })
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Route one request to the backend.
pub fn dispatch(backend: &Arc<dyn NodeBackend>, request: &RpcRequest) -> Result<Value, ApiError> {
    if request.method.is_empty() {
        return Err(ApiError::InvalidRequest);
    }
    let params = &request.params;

    match request.method.as_str() {
        // =====================================================================
        // NODE AND CHAIN QUERIES
        // =====================================================================
        "get_node_info" => {
            let info = backend.node_info();
            let chain = backend.blockchain_info()?;
            Ok(json!({
                "node_id": info.node_id.to_string(),
                "user_agent": info.user_agent,
                "protocol_version": info.protocol_version,
                "consensus": info.consensus,
                "mining": info.mining,
                "height": chain.height,
                "tip": chain.tip_digest.to_string(),
            }))
        }
        "get_blockchain_info" => {
            let chain = backend.blockchain_info()?;
            Ok(json!({
                "height": chain.height,
                "tip": chain.tip_digest.to_string(),
                "genesis": chain.genesis_digest.to_string(),
                "total_work": chain.total_work.to_string(),
            }))
        }
        "get_block" => {
            // By digest string or by numeric height.
            let block = match param(params, 0)? {
                Value::Number(height) => {
                    let height = height
                        .as_u64()
                        .ok_or_else(|| ApiError::InvalidParams("bad height".to_string()))?;
                    backend.block_by_height(height)?
                }
                Value::String(raw) => backend.block_by_digest(&parse_digest(raw)?)?,
                _ => return Err(ApiError::InvalidParams("expected digest or height".to_string())),
            };
            Ok(block
                .map(|b| block_to_json(&b, true))
                .unwrap_or(Value::Null))
        }
        "get_transaction" => {
            let digest = parse_digest(param_str(params, 0)?)?;
            Ok(match backend.transaction(&digest)? {
                Some((tx, block, height)) => {
                    let mut body = tx_to_json(&tx);
                    body["block"] = Value::String(block.to_string());
                    body["height"] = json!(height);
                    body
                }
                None => Value::Null,
            })
        }
        "get_balance" => {
            let address = parse_address(param_str(params, 0)?)?;
            Ok(json!(backend.balance(&address)?))
        }
        "get_mempool_info" => Ok(serde_json::to_value(backend.mempool_info())
            .map_err(|e| ApiError::Internal(e.to_string()))?),
        "get_network_info" => Ok(serde_json::to_value(backend.network_info())
            .map_err(|e| ApiError::Internal(e.to_string()))?),
        "get_peers" => Ok(serde_json::to_value(backend.peers())
            .map_err(|e| ApiError::Internal(e.to_string()))?),
        "get_network_stats" => Ok(serde_json::to_value(backend.network_stats())
            .map_err(|e| ApiError::Internal(e.to_string()))?),

        // =====================================================================
        // CHAIN OPERATIONS
        // =====================================================================
        "broadcast_transaction" => {
            let tx: Transaction = serde_json::from_value(param(params, 0)?.clone())
                .map_err(|e| ApiError::InvalidParams(e.to_string()))?;
            Ok(json!(backend.broadcast_transaction(tx)?.to_string()))
        }
        "broadcast_block" => {
            let block: Block = serde_json::from_value(param(params, 0)?.clone())
                .map_err(|e| ApiError::InvalidParams(e.to_string()))?;
            Ok(json!(backend.broadcast_block(block)?.to_string()))
        }
        "replay_block" => {
            let digest = parse_digest(param_str(params, 0)?)?;
            let report = backend.replay_block(&digest)?;
            serde_json::to_value(report).map_err(|e| ApiError::Internal(e.to_string()))
        }
        "sync_chain" => Ok(serde_json::to_value(backend.sync_status())
            .map_err(|e| ApiError::Internal(e.to_string()))?),

        // =====================================================================
        // PEER OPERATIONS
        // =====================================================================
        "connect_peer" => {
            let addr = param_str(params, 0)?;
            let port = param(params, 1)?
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| ApiError::InvalidParams("bad port".to_string()))?;
            backend.connect_peer(addr, port)?;
            Ok(json!(true))
        }
        "disconnect_peer" => {
            let addr = param_str(params, 0)?;
            let port = param(params, 1)?
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| ApiError::InvalidParams("bad port".to_string()))?;
            backend.disconnect_peer(addr, port)?;
            Ok(json!(true))
        }

        // =====================================================================
        // CONTRACT / VM PASSTHROUGH
        // =====================================================================
        "get_contract_info" => {
            let address = parse_address(param_str(params, 0)?)?;
            Ok(match backend.account(&address)? {
                Some(record) => json!({
                    "address": address.to_string(),
                    "balance": record.balance,
                    "nonce": record.nonce,
                    "code_digest": record.code_digest.map(|d| d.to_string()),
                    "storage_root": record.storage_root.to_string(),
                }),
                None => Value::Null,
            })
        }
        "get_code" => {
            let address = parse_address(param_str(params, 0)?)?;
            Ok(backend
                .code_digest(&address)?
                .map(|digest| Value::String(digest.to_string()))
                .unwrap_or(Value::Null))
        }
        "get_storage_at" => {
            let address = parse_address(param_str(params, 0)?)?;
            let key = hex::decode(param_str(params, 1)?.trim_start_matches("0x"))
                .map_err(|_| ApiError::InvalidParams("bad storage key".to_string()))?;
            Ok(backend
                .storage_at(&address, &key)?
                .map(|value| Value::String(format!("0x{}", hex::encode(value))))
                .unwrap_or(Value::Null))
        }
        "estimate_gas" => {
            let payload_len = param(params, 0)
                .ok()
                .and_then(|p| p.as_str())
                .map(|s| s.len() / 2)
                .unwrap_or(0);
            Ok(json!(backend.estimate_gas(payload_len)))
        }
        "deploy_contract" | "call_contract" => Err(ApiError::Internal(
            "contract execution is not supported by the built-in transfer executor".to_string(),
        )),

        // =====================================================================
        // WEB3-STYLE ALIASES
        // =====================================================================
        "eth_blockNumber" => Ok(json!(qty_hex(backend.blockchain_info()?.height))),
        "eth_getBalance" => {
            let address = parse_address(param_str(params, 0)?)?;
            // The tag is accepted but only the latest state is served.
            if let Ok(tag) = param_str(params, 1) {
                resolve_tag(tag, backend.blockchain_info()?.height)?;
            }
            Ok(json!(qty_hex(backend.balance(&address)?)))
        }
        "eth_getBlockByNumber" => {
            let latest = backend.blockchain_info()?.height;
            let height = resolve_tag(param_str(params, 0)?, latest)?;
            let include_txs = param(params, 1)
                .ok()
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(backend
                .block_by_height(height)?
                .map(|b| block_to_json(&b, include_txs))
                .unwrap_or(Value::Null))
        }
        "eth_getBlockByHash" => {
            let digest = parse_digest(param_str(params, 0)?)?;
            let include_txs = param(params, 1)
                .ok()
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(backend
                .block_by_digest(&digest)?
                .map(|b| block_to_json(&b, include_txs))
                .unwrap_or(Value::Null))
        }
        "eth_getTransactionByHash" => {
            let digest = parse_digest(param_str(params, 0)?)?;
            Ok(match backend.transaction(&digest)? {
                Some((tx, block, height)) => {
                    let mut body = tx_to_json(&tx);
                    body["blockHash"] = Value::String(block.to_string());
                    body["blockNumber"] = Value::String(qty_hex(height));
                    body
                }
                None => Value::Null,
            })
        }
        "eth_getTransactionReceipt" => {
            let digest = parse_digest(param_str(params, 0)?)?;
            Ok(match backend.transaction(&digest)? {
                Some((tx, block, height)) => json!({
                    "transactionHash": digest.to_string(),
                    "blockHash": block.to_string(),
                    "blockNumber": qty_hex(height),
                    "gasUsed": qty_hex(backend.estimate_gas(tx.size_bytes())),
                    "status": "0x1",
                }),
                None => Value::Null,
            })
        }
        "eth_sendRawTransaction" => {
            let raw = hex::decode(param_str(params, 0)?.trim_start_matches("0x"))
                .map_err(|_| ApiError::InvalidParams("bad raw transaction hex".to_string()))?;
            let tx: Transaction = serde_json::from_slice(&raw)
                .map_err(|e| ApiError::InvalidParams(e.to_string()))?;
            Ok(json!(format!("0x{}", backend.broadcast_transaction(tx)?)))
        }
        "eth_call" => Err(ApiError::Internal(
            "contract execution is not supported by the built-in transfer executor".to_string(),
        )),
        "eth_estimateGas" => Ok(json!(qty_hex(backend.estimate_gas(0)))),
        "eth_gasPrice" => Ok(json!(qty_hex(backend.gas_price()))),
        "eth_getCode" => {
            let address = parse_address(param_str(params, 0)?)?;
            Ok(json!(backend
                .code_digest(&address)?
                .map(|digest| format!("0x{digest}"))
                .unwrap_or_else(|| "0x".to_string())))
        }
        "eth_getStorageAt" => {
            let address = parse_address(param_str(params, 0)?)?;
            let key = hex::decode(param_str(params, 1)?.trim_start_matches("0x"))
                .map_err(|_| ApiError::InvalidParams("bad storage key".to_string()))?;
            Ok(json!(backend
                .storage_at(&address, &key)?
                .map(|value| format!("0x{}", hex::encode(value)))
                .unwrap_or_else(|| "0x".to_string())))
        }
        "net_version" => Ok(json!(backend.node_info().network_id.to_string())),
        "net_listening" => Ok(json!(backend.node_info().listening)),
        "net_peerCount" => Ok(json!(qty_hex(backend.network_info().connected_peers as u64))),
        "web3_clientVersion" => Ok(json!(backend.node_info().user_agent)),

        other => Err(ApiError::MethodNotFound(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NodeInfo;
    use ferrite_chain::ReplayReport;
    use ferrite_gossip::{GossipStats, SyncStatus};
    use ferrite_mempool::MempoolStats;
    use ferrite_network::{PeerRecord, PeerStats};
    use ferrite_types::{AccountRecord, BlockHeader, ChainState, Seal};

    struct FixtureBackend {
        block: Block,
    }

    impl FixtureBackend {
        fn new() -> Self {
            Self {
                block: Block::assemble(
                    BlockHeader {
                        version: 1,
                        prev_digest: Digest::ZERO,
                        merkle_root: Digest::ZERO,
                        timestamp: 1_700_000_000,
                        nonce: 0,
                        difficulty: 1,
                        height: 0,
                        tx_count: 0,
                    },
                    Seal::Work,
                    vec![],
                ),
            }
        }
    }

    impl NodeBackend for FixtureBackend {
        fn node_info(&self) -> NodeInfo {
            NodeInfo {
                node_id: Digest([7; 32]),
                user_agent: "ferrite/0.1.0".to_string(),
                protocol_version: 1,
                consensus: "pow".to_string(),
                mining: false,
                network_id: 1337,
                listening: true,
            }
        }
        fn blockchain_info(&self) -> Result<ChainState, ApiError> {
            Ok(ChainState {
                tip_digest: self.block.identity(),
                height: 26,
                total_work: 27,
                genesis_digest: self.block.identity(),
            })
        }
        fn block_by_digest(&self, digest: &Digest) -> Result<Option<Block>, ApiError> {
            Ok((*digest == self.block.identity()).then(|| self.block.clone()))
        }
        fn block_by_height(&self, height: u64) -> Result<Option<Block>, ApiError> {
            Ok((height == 0).then(|| self.block.clone()))
        }
        fn transaction(
            &self,
            _digest: &Digest,
        ) -> Result<Option<(Transaction, Digest, u64)>, ApiError> {
            Ok(None)
        }
        fn balance(&self, _address: &Address) -> Result<u64, ApiError> {
            Ok(255)
        }
        fn account(&self, _address: &Address) -> Result<Option<AccountRecord>, ApiError> {
            Ok(None)
        }
        fn mempool_info(&self) -> MempoolStats {
            MempoolStats::default()
        }
        fn network_info(&self) -> PeerStats {
            PeerStats {
                connected_peers: 3,
                ..PeerStats::default()
            }
        }
        fn peers(&self) -> Vec<PeerRecord> {
            vec![]
        }
        fn network_stats(&self) -> GossipStats {
            GossipStats::default()
        }
        fn broadcast_transaction(&self, tx: Transaction) -> Result<Digest, ApiError> {
            Ok(tx.identity())
        }
        fn broadcast_block(&self, block: Block) -> Result<Digest, ApiError> {
            Ok(block.identity())
        }
        fn replay_block(&self, digest: &Digest) -> Result<ReplayReport, ApiError> {
            Ok(ReplayReport {
                block_digest: *digest,
                parent_digest: Digest::ZERO,
                gas_used: 0,
                receipts: vec![],
                state_deltas: vec![],
                verdict: true,
                error: None,
            })
        }
        fn sync_status(&self) -> SyncStatus {
            SyncStatus {
                syncing: false,
                target_height: 0,
                current_height: 26,
                source: None,
            }
        }
        fn connect_peer(&self, _addr: &str, _port: u16) -> Result<(), ApiError> {
            Ok(())
        }
        fn disconnect_peer(&self, _addr: &str, _port: u16) -> Result<(), ApiError> {
            Ok(())
        }
        fn code_digest(&self, _address: &Address) -> Result<Option<Digest>, ApiError> {
            Ok(None)
        }
        fn storage_at(&self, _address: &Address, _key: &[u8]) -> Result<Option<Vec<u8>>, ApiError> {
            Ok(None)
        }
        fn estimate_gas(&self, _payload_len: usize) -> u64 {
            21_000
        }
        fn gas_price(&self) -> u64 {
            1
        }
    }

    fn call(method: &str, params: Value) -> Result<Value, ApiError> {
        let backend: Arc<dyn NodeBackend> = Arc::new(FixtureBackend::new());
        dispatch(
            &backend,
            &RpcRequest {
                jsonrpc: Some("2.0".to_string()),
                id: json!(1),
                method: method.to_string(),
                params,
            },
        )
    }

    #[test]
    fn test_eth_block_number_is_hex() {
        assert_eq!(call("eth_blockNumber", json!([])).unwrap(), json!("0x1a"));
    }

    #[test]
    fn test_eth_get_balance_hex() {
        let result = call(
            "eth_getBalance",
            json!([format!("{}", Address([1; 20])), "latest"]),
        )
        .unwrap();
        assert_eq!(result, json!("0xff"));
    }

    #[test]
    fn test_block_tags() {
        assert!(call("eth_getBlockByNumber", json!(["earliest", false]))
            .unwrap()
            .is_object());
        assert!(call("eth_getBlockByNumber", json!(["0x0", true]))
            .unwrap()
            .is_object());
        // Height 26 has no block in the fixture.
        assert!(call("eth_getBlockByNumber", json!(["latest", false]))
            .unwrap()
            .is_null());
        assert!(matches!(
            call("eth_getBlockByNumber", json!(["not-a-tag", false])),
            Err(ApiError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_unknown_method() {
        assert!(matches!(
            call("definitely_not_a_method", json!([])),
            Err(ApiError::MethodNotFound(_))
        ));
    }

    #[test]
    fn test_get_balance_native() {
        let result = call("get_balance", json!([format!("{}", Address([1; 20]))])).unwrap();
        assert_eq!(result, json!(255));
    }

    #[test]
    fn test_get_block_by_digest_and_height() {
        let fixture = FixtureBackend::new();
        let digest = fixture.block.identity().to_string();
        assert!(call("get_block", json!([digest])).unwrap().is_object());
        assert!(call("get_block", json!([0])).unwrap().is_object());
        assert!(call("get_block", json!([9])).unwrap().is_null());
    }

    #[test]
    fn test_net_aliases() {
        assert_eq!(call("net_version", json!([])).unwrap(), json!("1337"));
        assert_eq!(call("net_listening", json!([])).unwrap(), json!(true));
        assert_eq!(call("net_peerCount", json!([])).unwrap(), json!("0x3"));
        assert_eq!(
            call("web3_clientVersion", json!([])).unwrap(),
            json!("ferrite/0.1.0")
        );
    }

    #[test]
    fn test_invalid_params_surface() {
        assert!(matches!(
            call("get_balance", json!([])),
            Err(ApiError::InvalidParams(_))
        ));
        assert!(matches!(
            call("get_balance", json!(["zzzz"])),
            Err(ApiError::InvalidParams(_))
        ));
    }
}
