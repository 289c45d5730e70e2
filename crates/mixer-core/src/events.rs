//! canonical event shapes shared by the cache, the indexer and chain logs

use num_bigint::BigUint;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::abi;
use crate::client::rpc::Log;
use crate::error::{MixerError, Result};

/// records per indexer page
pub const GRAPH_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deposit,
    Withdrawal,
    Relayer,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Deposit => "deposit",
            EventKind::Withdrawal => "withdrawal",
            EventKind::Relayer => "relayer",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "deposit" | "deposits" => Ok(EventKind::Deposit),
            "withdrawal" | "withdrawals" | "withdraw" => Ok(EventKind::Withdrawal),
            "relayer" | "relayers" => Ok(EventKind::Relayer),
            other => Err(MixerError::Validation(format!("unknown event type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    pub block_number: u64,
    pub transaction_hash: String,
    pub commitment: String,
    pub leaf_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalEvent {
    pub block_number: u64,
    pub transaction_hash: String,
    pub nullifier_hash: String,
    pub to: String,
    /// base units, decimal
    pub fee: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerRegistration {
    pub block_number: u64,
    pub ens_hash: String,
    pub ens_name: String,
    pub address: String,
}

/// comparison operator on the indexer's block field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFilter {
    After,
    At,
}

impl BlockFilter {
    fn suffix(&self) -> &'static str {
        match self {
            BlockFilter::After => "_gt",
            BlockFilter::At => "",
        }
    }
}

/// an event type the store and both sync sources know how to handle
pub trait PoolEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EventKind;

    /// solidity event signature, hashed into topic0
    const SIGNATURE: &'static str;

    /// indexer entity collection
    const GRAPH_ENTITY: &'static str;

    fn block_number(&self) -> u64;

    /// order applied to a freshly fetched batch before it is appended
    fn sort_batch(batch: &mut [Self]) {
        batch.sort_by_key(|e| e.block_number());
    }

    fn from_log(log: &Log) -> Result<Self>;

    fn from_graph(record: &Value) -> Result<Self>;

    /// paged query over `GRAPH_ENTITY` ordered by block
    fn graph_query(filter: BlockFilter) -> String;

    /// variables for `graph_query`; `scope` is (currency, amount) for pool events
    fn graph_variables(block: u64, scope: Option<(&str, &str)>) -> Value;

    /// cheap request proving an indexer actually serves this entity
    fn smoke_query() -> &'static str;

    fn topic() -> String {
        abi::event_topic(Self::SIGNATURE)
    }
}

fn pool_query(entity: &str, fields: &str, filter: BlockFilter) -> String {
    format!(
        "query($currency: String, $amount: String, $blockNumber: Int) {{\n  \
         {entity}(orderBy: blockNumber, first: {page}, where: {{currency: $currency, amount: $amount, blockNumber{op}: $blockNumber}}) {{\n    \
         {fields}\n  }}\n}}",
        entity = entity,
        page = GRAPH_PAGE_SIZE,
        op = filter.suffix(),
        fields = fields,
    )
}

fn pool_variables(block: u64, scope: Option<(&str, &str)>) -> Value {
    let (currency, amount) = scope.unwrap_or_default();
    serde_json::json!({
        "currency": currency.to_lowercase(),
        "amount": amount.to_lowercase(),
        "blockNumber": block,
    })
}

impl PoolEvent for DepositEvent {
    const KIND: EventKind = EventKind::Deposit;
    const SIGNATURE: &'static str = "Deposit(bytes32,uint32,uint256)";
    const GRAPH_ENTITY: &'static str = "deposits";

    fn block_number(&self) -> u64 {
        self.block_number
    }

    fn sort_batch(batch: &mut [Self]) {
        batch.sort_by_key(|e| e.leaf_index);
    }

    fn from_log(log: &Log) -> Result<Self> {
        let commitment = log
            .topics
            .get(1)
            .ok_or_else(|| MixerError::Serialization("deposit log without commitment topic".into()))?;
        let data = log.data_bytes()?;
        let leaf_index = u32::try_from(abi::read_usize(&data, 0)?)
            .map_err(|_| MixerError::Serialization("leaf index overflows u32".into()))?;
        let timestamp = abi::read_usize(&data, 32)? as u64;

        Ok(Self {
            block_number: log.block_number()?,
            transaction_hash: log.transaction_hash.clone(),
            commitment: abi::word_hex(&abi::parse_word(commitment)?),
            leaf_index,
            timestamp: Some(timestamp),
        })
    }

    fn from_graph(record: &Value) -> Result<Self> {
        Ok(Self {
            block_number: graph_u64(record, "blockNumber")?,
            transaction_hash: graph_str(record, "transactionHash")?,
            commitment: graph_str(record, "commitment")?,
            leaf_index: u32::try_from(graph_u64(record, "index")?)
                .map_err(|_| MixerError::Indexer("leaf index overflows u32".into()))?,
            timestamp: None,
        })
    }

    fn graph_query(filter: BlockFilter) -> String {
        pool_query(
            Self::GRAPH_ENTITY,
            "blockNumber, transactionHash, commitment, index",
            filter,
        )
    }

    fn graph_variables(block: u64, scope: Option<(&str, &str)>) -> Value {
        pool_variables(block, scope)
    }

    fn smoke_query() -> &'static str {
        "{ deposits(first: 1, orderBy: timestamp) { blockNumber, index } }"
    }
}

impl PoolEvent for WithdrawalEvent {
    const KIND: EventKind = EventKind::Withdrawal;
    const SIGNATURE: &'static str = "Withdrawal(address,bytes32,address,uint256)";
    const GRAPH_ENTITY: &'static str = "withdrawals";

    fn block_number(&self) -> u64 {
        self.block_number
    }

    fn from_log(log: &Log) -> Result<Self> {
        let data = log.data_bytes()?;
        Ok(Self {
            block_number: log.block_number()?,
            transaction_hash: log.transaction_hash.clone(),
            to: abi::to_checksum(&abi::read_address(&data, 0)?),
            nullifier_hash: abi::word_hex(&abi::read_word(&data, 32)?),
            fee: abi::read_uint(&data, 64)?.to_string(),
        })
    }

    fn from_graph(record: &Value) -> Result<Self> {
        Ok(Self {
            block_number: graph_u64(record, "blockNumber")?,
            transaction_hash: graph_str(record, "transactionHash")?,
            nullifier_hash: graph_str(record, "nullifier")?,
            to: graph_str(record, "to")?,
            fee: graph_str(record, "fee")?,
        })
    }

    fn graph_query(filter: BlockFilter) -> String {
        pool_query(
            Self::GRAPH_ENTITY,
            "blockNumber, transactionHash, nullifier, to, fee",
            filter,
        )
    }

    fn graph_variables(block: u64, scope: Option<(&str, &str)>) -> Value {
        pool_variables(block, scope)
    }

    fn smoke_query() -> &'static str {
        "{ withdrawals(first: 1, orderBy: timestamp) { timestamp } }"
    }
}

impl WithdrawalEvent {
    pub fn fee_units(&self) -> Result<BigUint> {
        self.fee
            .parse::<BigUint>()
            .map_err(|_| MixerError::Serialization(format!("invalid fee: {}", self.fee)))
    }
}

impl PoolEvent for RelayerRegistration {
    const KIND: EventKind = EventKind::Relayer;
    const SIGNATURE: &'static str = "RelayerRegistered(bytes32,string,address,uint256)";
    const GRAPH_ENTITY: &'static str = "relayers";

    fn block_number(&self) -> u64 {
        self.block_number
    }

    fn from_log(log: &Log) -> Result<Self> {
        let data = log.data_bytes()?;
        let name_at = abi::read_usize(&data, 32)?;
        Ok(Self {
            block_number: log.block_number()?,
            ens_hash: abi::word_hex(&abi::read_word(&data, 0)?),
            ens_name: abi::read_string(&data, name_at)?,
            address: abi::to_checksum(&abi::read_address(&data, 64)?),
        })
    }

    fn from_graph(record: &Value) -> Result<Self> {
        Ok(Self {
            block_number: graph_u64(record, "blockRegistration")?,
            ens_hash: graph_str(record, "ensHash")?,
            ens_name: graph_str(record, "ensName")?,
            address: graph_str(record, "address")?,
        })
    }

    fn graph_query(filter: BlockFilter) -> String {
        format!(
            "query($blockRegistration: Int) {{\n  \
             relayers(orderBy: blockRegistration, first: {page}, where: {{blockRegistration{op}: $blockRegistration}}) {{\n    \
             address, ensName, ensHash, blockRegistration\n  }}\n}}",
            page = GRAPH_PAGE_SIZE,
            op = filter.suffix(),
        )
    }

    fn graph_variables(block: u64, _scope: Option<(&str, &str)>) -> Value {
        serde_json::json!({ "blockRegistration": block })
    }

    fn smoke_query() -> &'static str {
        "{ relayers(first: 10) { address, ensName, ensHash, blockRegistration } }"
    }
}

fn graph_str(record: &Value, field: &str) -> Result<String> {
    match record.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(MixerError::Indexer(format!("record missing {}", field))),
    }
}

/// the graph renders BigInt fields as strings
fn graph_u64(record: &Value, field: &str) -> Result<u64> {
    match record.get(field) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| MixerError::Indexer(format!("record has no numeric {}", field)))
}
