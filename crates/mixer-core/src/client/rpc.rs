//! ethereum json-rpc client

use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::Num;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::abi;
use crate::error::{MixerError, Result};

/// read access to a chain; the seam every network-touching component goes through
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<u64>;

    async fn chain_id(&self) -> Result<u64>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;

    /// eth_call against latest state, returns raw return data
    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>>;

    async fn get_balance(&self, address: &str) -> Result<BigUint>;

    async fn gas_price(&self) -> Result<BigUint>;

    async fn estimate_gas(&self, tx: &CallRequest) -> Result<BigUint>;

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>>;

    async fn block_timestamp(&self, number: u64) -> Result<u64>;
}

/// submits transactions from one account
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn address(&self) -> &str;

    async fn send_transaction(&self, tx: &CallRequest) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: String,
    pub topic0: String,
    pub from_block: u64,
    pub to_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
}

impl Log {
    pub fn block_number(&self) -> Result<u64> {
        parse_quantity_u64(&self.block_number)
    }

    pub fn data_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(abi::strip_0x(&self.data))
            .map_err(|e| MixerError::Rpc(format!("log data is not hex: {}", e)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<String>,
    pub to: String,
    pub data: Vec<u8>,
    pub value: BigUint,
}

impl CallRequest {
    fn to_json(&self) -> Value {
        let mut tx = json!({
            "to": self.to,
            "data": format!("0x{}", hex::encode(&self.data)),
            "value": format!("0x{}", self.value.to_str_radix(16)),
        });
        if let Some(from) = &self.from {
            tx["from"] = json!(from);
        }
        tx
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_number: Option<String>,
    pub from: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl Receipt {
    pub fn mined_block(&self) -> Option<u64> {
        self.block_number
            .as_deref()
            .and_then(|b| parse_quantity_u64(b).ok())
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

#[derive(Clone)]
pub struct RpcClient {
    url: String,
    client: Client,
}

impl RpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MixerError::Rpc(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call_raw(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MixerError::Rpc(e.to_string()))?;

        let json: RpcResponse = response
            .json()
            .await
            .map_err(|e| MixerError::Rpc(e.to_string()))?;

        if let Some(error) = json.error {
            return Err(MixerError::Rpc(format!(
                "{} failed with {}: {}",
                method, error.code, error.message
            )));
        }

        // null is a legal result (e.g. pending receipt)
        Ok(json.result.unwrap_or(Value::Null))
    }

    async fn quantity(&self, method: &str, params: Vec<Value>) -> Result<BigUint> {
        let result = self.call_raw(method, params).await?;
        let s = result
            .as_str()
            .ok_or_else(|| MixerError::Rpc(format!("{} returned a non-string", method)))?;
        parse_quantity(s)
    }
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn block_number(&self) -> Result<u64> {
        to_u64(self.quantity("eth_blockNumber", vec![]).await?)
    }

    async fn chain_id(&self) -> Result<u64> {
        to_u64(self.quantity("eth_chainId", vec![]).await?)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let result = self
            .call_raw(
                "eth_getLogs",
                vec![json!({
                    "address": filter.address,
                    "topics": [filter.topic0],
                    "fromBlock": format!("0x{:x}", filter.from_block),
                    "toBlock": format!("0x{:x}", filter.to_block),
                })],
            )
            .await?;
        serde_json::from_value(result).map_err(|e| MixerError::Rpc(e.to_string()))
    }

    async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let result = self
            .call_raw(
                "eth_call",
                vec![
                    json!({ "to": to, "data": format!("0x{}", hex::encode(data)) }),
                    json!("latest"),
                ],
            )
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| MixerError::Rpc("eth_call returned a non-string".into()))?;
        hex::decode(abi::strip_0x(s)).map_err(|e| MixerError::Rpc(e.to_string()))
    }

    async fn get_balance(&self, address: &str) -> Result<BigUint> {
        self.quantity("eth_getBalance", vec![json!(address), json!("latest")])
            .await
    }

    async fn gas_price(&self) -> Result<BigUint> {
        self.quantity("eth_gasPrice", vec![]).await
    }

    async fn estimate_gas(&self, tx: &CallRequest) -> Result<BigUint> {
        self.quantity("eth_estimateGas", vec![tx.to_json()]).await
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        let result = self
            .call_raw("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| MixerError::Rpc(e.to_string()))
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let result = self
            .call_raw(
                "eth_getBlockByNumber",
                vec![json!(format!("0x{:x}", number)), json!(false)],
            )
            .await?;
        if result.is_null() {
            return Err(MixerError::Rpc(format!("block {} not found", number)));
        }
        let header: BlockHeader =
            serde_json::from_value(result).map_err(|e| MixerError::Rpc(e.to_string()))?;
        parse_quantity_u64(&header.timestamp)
    }
}

/// account unlocked on the node; transactions go out via eth_sendTransaction
pub struct NodeSigner {
    client: RpcClient,
    from: String,
}

impl NodeSigner {
    pub fn new(client: RpcClient, from: &str) -> Result<Self> {
        if !abi::is_valid_address(from) {
            return Err(MixerError::Validation(format!("invalid signer address: {}", from)));
        }
        Ok(Self {
            client,
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl TransactionSigner for NodeSigner {
    fn address(&self) -> &str {
        &self.from
    }

    async fn send_transaction(&self, tx: &CallRequest) -> Result<String> {
        let mut tx = tx.clone();
        tx.from = Some(self.from.clone());
        let result = self
            .client
            .call_raw("eth_sendTransaction", vec![tx.to_json()])
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MixerError::Rpc("eth_sendTransaction returned no hash".into()))
    }
}

pub fn parse_quantity(s: &str) -> Result<BigUint> {
    let body = abi::strip_0x(s);
    if body.is_empty() {
        return Ok(BigUint::default());
    }
    BigUint::from_str_radix(body, 16).map_err(|_| MixerError::Rpc(format!("bad quantity: {}", s)))
}

pub fn parse_quantity_u64(s: &str) -> Result<u64> {
    to_u64(parse_quantity(s)?)
}

fn to_u64(value: BigUint) -> Result<u64> {
    u64::try_from(&value).map_err(|_| MixerError::Rpc(format!("quantity {} overflows u64", value)))
}
