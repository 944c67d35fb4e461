use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ResolverError, ValidationError, WatcherError};
use crate::logging::{LogContext, MetricsLogger, PerformanceMonitor};
use crate::models::{validate_address, BlockRef, Transaction};

use super::resolver::TransactionResolver;
use super::transfer_decoder::{address_topic, decode_transfer_log, is_transfer_log, TRANSFER_EVENT_SIGNATURE};

const DEFAULT_HISTORY_BLOCK_RANGE: u64 = 5_000;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct RpcBlock {
    pub number: String,
    /// Null for pending blocks
    pub hash: Option<String>,
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct RpcTransaction {
    pub hash: String,
    pub from: String,
    /// Null for contract creation
    pub to: Option<String>,
    pub value: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(rename = "fromBlock")]
    pub from_block: String,
    #[serde(rename = "toBlock")]
    pub to_block: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub topics: Option<Vec<Option<String>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EthLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

/// JSON-RPC client over HTTP. Every call is a single round-trip; retrying is
/// left to the caller.
#[derive(Clone)]
pub struct RpcClient {
    client: Client,
    endpoint: String,
    timeout_seconds: u64,
    history_block_range: u64,
    request_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(endpoint: String) -> Result<Self, ResolverError> {
        Self::new_with_config(endpoint, 30)
    }

    pub fn new_with_config(endpoint: String, timeout_seconds: u64) -> Result<Self, ResolverError> {
        LogContext::new("rpc_client", "initialization")
            .with_metadata("endpoint", serde_json::json!(endpoint))
            .with_metadata("timeout_seconds", serde_json::json!(timeout_seconds))
            .info("Initializing RPC client");

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResolverError::UpstreamUnavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            timeout_seconds,
            history_block_range: DEFAULT_HISTORY_BLOCK_RANGE,
            request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Number of most recent blocks searched by `fetch_address_history`
    pub fn with_history_block_range(mut self, blocks: u64) -> Self {
        self.history_block_range = blocks.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One JSON-RPC round-trip. A `null` result is returned as `Value::Null`.
    async fn make_request(&self, method: &str, params: Vec<Value>) -> Result<Value, ResolverError> {
        let context = LogContext::new("rpc_client", "make_request")
            .with_metadata("method", serde_json::json!(method))
            .with_metadata("endpoint", serde_json::json!(self.endpoint));

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        context.trace(&format!("Sending RPC request: {}", method));

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ResolverError::UpstreamUnavailable(format!("Timed out after {}s", self.timeout_seconds))
                } else {
                    ResolverError::UpstreamUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::UpstreamError {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ResolverError::UpstreamUnavailable(e.to_string()))?;

        let rpc_response: JsonRpcResponse =
            serde_json::from_slice(&body).map_err(|e| ResolverError::Decode(format!("Invalid JSON-RPC response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(ResolverError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }

    /// `make_request` wrapped with timing and metrics
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ResolverError> {
        let monitor = PerformanceMonitor::new(&format!("rpc_{}", method));
        let result = self.make_request(method, params).await;
        let duration = monitor.finish_with_result(&result);
        MetricsLogger::log_rpc_call(method, duration, result.is_ok());
        result
    }

    pub async fn get_latest_block_number(&self) -> Result<u64, ResolverError> {
        let value = self.call("eth_blockNumber", vec![]).await?;
        let hex_string = value
            .as_str()
            .ok_or_else(|| ResolverError::Decode("Block number is not a string".to_string()))?;
        parse_hex_to_u64(hex_string)
    }

    pub async fn get_block(&self, block: &BlockRef) -> Result<RpcBlock, ResolverError> {
        let params = vec![
            Value::String(block.hex_number()),
            Value::Bool(true), // Include full transaction objects
        ];

        let value = self.call("eth_getBlockByNumber", params).await?;
        if value.is_null() {
            return Err(ResolverError::Decode(format!("Block {} not found", block.number)));
        }

        let rpc_block: RpcBlock = serde_json::from_value(value)
            .map_err(|e| ResolverError::Decode(format!("Failed to parse block {}: {}", block.number, e)))?;

        LogContext::new("rpc_client", "get_block")
            .with_block(block)
            .with_metadata("transaction_count", serde_json::json!(rpc_block.transactions.len()))
            .debug(&format!(
                "Retrieved block {} with {} transactions",
                block.number,
                rpc_block.transactions.len()
            ));

        Ok(rpc_block)
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<EthLog>, ResolverError> {
        let params = vec![serde_json::to_value(filter).map_err(|e| ResolverError::Decode(e.to_string()))?];
        let value = self.call("eth_getLogs", params).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }

        let logs: Vec<EthLog> =
            serde_json::from_value(value).map_err(|e| ResolverError::Decode(format!("Failed to parse logs: {}", e)))?;

        LogContext::new("rpc_client", "get_logs")
            .with_metadata("log_count", serde_json::json!(logs.len()))
            .with_metadata("from_block", serde_json::json!(filter.from_block))
            .with_metadata("to_block", serde_json::json!(filter.to_block))
            .debug(&format!("Retrieved {} logs", logs.len()));

        Ok(logs)
    }
}

#[async_trait]
impl TransactionResolver for RpcClient {
    async fn fetch_block_transactions(&self, block: &BlockRef) -> Result<Vec<Transaction>, ResolverError> {
        let rpc_block = self.get_block(block).await?;

        if let (Some(expected), Some(actual)) = (&block.hash, &rpc_block.hash) {
            if !expected.eq_ignore_ascii_case(actual) {
                LogContext::new("rpc_client", "fetch_block_transactions")
                    .with_block(block)
                    .with_metadata("resolved_hash", serde_json::json!(actual))
                    .warn("Resolved block hash differs from announced hash, chain may have reorganized");
            }
        }

        let block_number = parse_hex_to_u64(&rpc_block.number).unwrap_or(block.number);

        rpc_block
            .transactions
            .into_iter()
            .map(|tx| {
                let tx_block = match &tx.block_number {
                    Some(hex) => parse_hex_to_u64(hex)?,
                    None => block_number,
                };
                Ok(Transaction {
                    hash: tx.hash,
                    from: tx.from,
                    to: tx.to.unwrap_or_default(),
                    value: tx.value,
                    block_number: tx_block,
                })
            })
            .collect()
    }

    async fn fetch_address_history(&self, address: &str) -> Result<Vec<Transaction>, WatcherError> {
        validate_address(address).map_err(|e| ValidationError::InvalidAddress(e.to_string()))?;
        let topic = address_topic(address).map_err(|e| ValidationError::InvalidAddress(e.to_string()))?;

        let latest = self.get_latest_block_number().await?;
        let from_block = latest.saturating_sub(self.history_block_range - 1);

        let outgoing = LogFilter {
            from_block: format!("0x{:x}", from_block),
            to_block: format!("0x{:x}", latest),
            address: None,
            topics: Some(vec![Some(TRANSFER_EVENT_SIGNATURE.to_string()), Some(topic.clone())]),
        };
        let incoming = LogFilter {
            from_block: outgoing.from_block.clone(),
            to_block: outgoing.to_block.clone(),
            address: None,
            topics: Some(vec![Some(TRANSFER_EVENT_SIGNATURE.to_string()), None, Some(topic)]),
        };

        let mut logs = self.get_logs(&outgoing).await?;
        logs.extend(self.get_logs(&incoming).await?);

        // A self-transfer shows up in both queries
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for log in logs.into_iter().filter(is_transfer_log) {
            let log_index = parse_hex_to_u64(&log.log_index)?;
            if !seen.insert((log.transaction_hash.to_lowercase(), log_index)) {
                continue;
            }
            entries.push((log_index, decode_transfer_log(&log)?));
        }
        entries.sort_by_key(|(log_index, tx)| (tx.block_number, *log_index));

        LogContext::new("rpc_client", "fetch_address_history")
            .with_address(address)
            .with_metadata("from_block", serde_json::json!(from_block))
            .with_metadata("to_block", serde_json::json!(latest))
            .with_metadata("transfer_count", serde_json::json!(entries.len()))
            .info(&format!("Found {} transfers for {}", entries.len(), address));

        Ok(entries.into_iter().map(|(_, tx)| tx).collect())
    }
}

pub(crate) fn parse_hex_to_u64(hex_str: &str) -> Result<u64, ResolverError> {
    let hex_without_prefix = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    u64::from_str_radix(hex_without_prefix, 16)
        .map_err(|e| ResolverError::Decode(format!("Failed to parse hex '{}' to u64: {}", hex_str, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const WATCHED: &str = "0xf977814e90da44bfa03b6295a0616a897441acec";

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
    }

    fn transfer_log(tx_hash: &str, block: &str, log_index: &str, from_topic: &str, to_topic: &str) -> Value {
        json!({
            "address": "0xdac17f958d2ee523a2206206994597c13d831ec7",
            "topics": [TRANSFER_EVENT_SIGNATURE, from_topic, to_topic],
            "data": "0x00000000000000000000000000000000000000000000000000000000000003e8",
            "blockNumber": block,
            "transactionHash": tx_hash,
            "logIndex": log_index
        })
    }

    #[test]
    fn test_rpc_client_creation() {
        let endpoint = "https://ethereum-rpc.publicnode.com".to_string();
        let client = RpcClient::new(endpoint.clone()).unwrap();
        assert_eq!(client.endpoint(), endpoint);
        assert_eq!(client.history_block_range, DEFAULT_HISTORY_BLOCK_RANGE);
        assert_eq!(client.with_history_block_range(0).history_block_range, 1);
    }

    #[test]
    fn test_json_rpc_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "eth_blockNumber",
            params: vec![],
            id: 1,
        };

        let serialized = serde_json::to_string(&request).unwrap();
        let expected = r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#;
        assert_eq!(serialized, expected);
    }

    #[test]
    fn test_json_rpc_response_deserialization_error() {
        let response_json = r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":1}"#;
        let response: JsonRpcResponse = serde_json::from_str(response_json).unwrap();

        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found");
    }

    #[test]
    fn test_parse_hex_to_u64() {
        assert_eq!(parse_hex_to_u64("0x1234").unwrap(), 0x1234u64);
        assert_eq!(parse_hex_to_u64("1234").unwrap(), 0x1234u64);
        assert_eq!(parse_hex_to_u64("0x0").unwrap(), 0u64);
        assert!(matches!(parse_hex_to_u64("invalid"), Err(ResolverError::Decode(_))));
    }

    #[test]
    fn test_log_filter_serialization() {
        let filter = LogFilter {
            from_block: "0x1234".to_string(),
            to_block: "0x1235".to_string(),
            address: None,
            topics: Some(vec![Some("0xdef456".to_string()), None, Some("0xabc".to_string())]),
        };

        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["fromBlock"], "0x1234");
        assert_eq!(json["toBlock"], "0x1235");
        assert!(json.get("address").is_none());
        assert_eq!(json["topics"], json!(["0xdef456", null, "0xabc"]));
    }

    #[tokio::test]
    async fn test_fetch_block_transactions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_getBlockByNumber", "params": ["0x64", true]})))
            .respond_with(rpc_result(json!({
                "number": "0x64",
                "hash": "0xh100",
                "transactions": [
                    {"hash": "0x1", "from": "0xaaa", "to": "0xbbb", "value": "0x10", "blockNumber": "0x64"},
                    {"hash": "0x2", "from": "0xccc", "to": null, "value": "0x0", "blockNumber": "0x64"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri()).unwrap();
        let txs = client.fetch_block_transactions(&BlockRef::new(100, "0xh100")).await.unwrap();

        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].hash, "0x1");
        assert_eq!(txs[0].to, "0xbbb");
        assert_eq!(txs[0].block_number, 100);
        // Contract creation
        assert_eq!(txs[1].to, "");
    }

    #[tokio::test]
    async fn test_missing_block_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(Value::Null))
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri()).unwrap();
        let result = client.fetch_block_transactions(&BlockRef::from_number(7)).await;
        assert!(matches!(result, Err(ResolverError::Decode(msg)) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_get_latest_block_number() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(rpc_result(json!("0x1b4")))
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri()).unwrap();
        assert_eq!(client.get_latest_block_number().await.unwrap(), 436);
    }

    #[tokio::test]
    async fn test_fetch_address_history_merges_both_directions() {
        let server = MockServer::start().await;
        let watched_topic = address_topic(WATCHED).unwrap();
        let other_topic = "0x000000000000000000000000e7804c37c13166ff0b37f5ae0bb07a3aebb6e245";

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_blockNumber"})))
            .respond_with(rpc_result(json!("0x2710")))
            .mount(&server)
            .await;

        // Outgoing: watched address as sender, including a self-transfer
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getLogs",
                "params": [{"fromBlock": "0x2701", "toBlock": "0x2710", "topics": [TRANSFER_EVENT_SIGNATURE, watched_topic]}]
            })))
            .respond_with(rpc_result(json!([
                transfer_log("0xout", "0x2705", "0x1", &watched_topic, other_topic),
                transfer_log("0xself", "0x2709", "0x0", &watched_topic, &watched_topic)
            ])))
            .expect(1)
            .mount(&server)
            .await;

        // Incoming: watched address as recipient
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getLogs",
                "params": [{"topics": [TRANSFER_EVENT_SIGNATURE, null, watched_topic]}]
            })))
            .respond_with(rpc_result(json!([
                transfer_log("0xin", "0x2702", "0x3", other_topic, &watched_topic),
                transfer_log("0xself", "0x2709", "0x0", &watched_topic, &watched_topic)
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri()).unwrap().with_history_block_range(16);
        let history = client.fetch_address_history(WATCHED).await.unwrap();

        let hashes: Vec<&str> = history.iter().map(|tx| tx.hash.as_str()).collect();
        assert_eq!(hashes, vec!["0xin", "0xout", "0xself"]);
        assert_eq!(history[0].to, WATCHED);
        assert_eq!(history[1].from, WATCHED);
        assert_eq!(history[1].value, "0x3e8");
    }

    #[tokio::test]
    async fn test_fetch_address_history_rejects_malformed_address() {
        // No upstream is contacted for an invalid address
        let client = RpcClient::new("http://127.0.0.1:1".to_string()).unwrap();
        let result = client.fetch_address_history("not-an-address").await;
        assert!(matches!(result, Err(WatcherError::Validation(ValidationError::InvalidAddress(_)))));
    }
}
