//! Chain access behind a trait so the synchronizer can run against the
//! real JSON-RPC endpoint or a scripted in-memory chain in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::errors::{NodeError, Result};

/// A contract event log as returned by the chain.
#[derive(Debug, Clone)]
pub struct EventLog {
    pub block_number: u64,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;
    async fn block_number(&self) -> Result<u64>;
    /// Event logs of the watched contract in `[from, to]`, ordered as the
    /// chain emitted them.
    async fn logs(&self, from: u64, to: u64) -> Result<Vec<EventLog>>;
}

/// Ethereum JSON-RPC client over HTTP.
pub struct EthRpcClient {
    http: reqwest::Client,
    url: String,
    contract_addr: String,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcLog {
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "logIndex", default)]
    log_index: Option<String>,
    data: String,
}

fn hex_to_u64(s: &str) -> Result<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| NodeError::ChainRpc(format!("invalid hex quantity {}: {}", s, e)))
}

impl EthRpcClient {
    pub fn new(url: &str, contract_addr: &str, timeout: Duration) -> Result<EthRpcClient> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::ChainRpc(e.to_string()))?;
        Ok(EthRpcClient {
            http,
            url: url.to_string(),
            contract_addr: contract_addr.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NodeError::ChainRpc(e.to_string()))?;
        let rpc: RpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| NodeError::ChainRpc(e.to_string()))?;
        if let Some(err) = rpc.error {
            return Err(NodeError::ChainRpc(format!(
                "{} (code {})",
                err.message, err.code
            )));
        }
        rpc.result
            .ok_or_else(|| NodeError::ChainRpc(format!("{}: empty result", method)))
    }
}

#[async_trait]
impl ChainClient for EthRpcClient {
    async fn chain_id(&self) -> Result<u64> {
        let id: String = self.call("eth_chainId", json!([])).await?;
        hex_to_u64(&id)
    }

    async fn block_number(&self) -> Result<u64> {
        let n: String = self.call("eth_blockNumber", json!([])).await?;
        hex_to_u64(&n)
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<EventLog>> {
        let filter = json!([{
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
            "address": self.contract_addr,
        }]);
        let raw: Vec<RpcLog> = self.call("eth_getLogs", filter).await?;

        let mut logs = Vec::with_capacity(raw.len());
        for l in &raw {
            let block_number = hex_to_u64(&l.block_number)?;
            let data = hex::decode(l.data.trim_start_matches("0x"))
                .map_err(|e| NodeError::ChainRpc(format!("invalid log data: {}", e)))?;
            let log_index = match &l.log_index {
                Some(i) => hex_to_u64(i)?,
                None => 0,
            };
            logs.push((block_number, log_index, data));
        }
        logs.sort_by_key(|(b, i, _)| (*b, *i));
        Ok(logs
            .into_iter()
            .map(|(block_number, _, data)| EventLog { block_number, data })
            .collect())
    }
}

/// Scripted chain for tests: blocks advance on demand and emit the events
/// they were configured with.
pub struct TestChainClient {
    chain_id: u64,
    state: parking_lot::Mutex<TestChainState>,
}

struct TestChainState {
    current_block: u64,
    logs: Vec<EventLog>,
}

impl TestChainClient {
    pub fn new(chain_id: u64, start_block: u64) -> TestChainClient {
        TestChainClient {
            chain_id,
            state: parking_lot::Mutex::new(TestChainState {
                current_block: start_block,
                logs: Vec::new(),
            }),
        }
    }

    pub fn advance_block(&self) {
        self.state.lock().current_block += 1;
    }

    pub fn advance_to_block(&self, block: u64) {
        let mut state = self.state.lock();
        if block > state.current_block {
            state.current_block = block;
        }
    }

    /// Emits an event log at the given block.
    pub fn add_event(&self, block_number: u64, data: Vec<u8>) {
        self.state.lock().logs.push(EventLog { block_number, data });
    }
}

#[async_trait]
impl ChainClient for TestChainClient {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.lock().current_block)
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<EventLog>> {
        Ok(self
            .state
            .lock()
            .logs
            .iter()
            .filter(|l| l.block_number >= from && l.block_number <= to)
            .cloned()
            .collect())
    }
}
