//! in-memory collaborators shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use mixer_core::abi::{self, Token};
use mixer_core::client::{CallRequest, ChainReader, GraphQuery, Log, LogFilter, Receipt, TransactionSigner};
use mixer_core::fees::{FeeOracle, FeeQuote};
use mixer_core::prover::{ProofInput, Prover};
use mixer_core::relayer::{JobStatus, RelayerApi, RelayerStatus, WithdrawalRequest};
use mixer_core::{Deployments, DepositEvent, MixerError, PoolEvent, Result, WithdrawalEvent};
use mixer_merkle::Hash;
use num_bigint::BigUint;
use serde_json::{json, Value};

/// poseidon pools on mainnet and gnosis behind the live registry
pub const DEPLOYMENTS: &str = r#"
[registry]
address = "0x58E8dCC13BE9780fC42E8723D8EaD4CF46943dF2"
aggregator = "0xE8F47A78A6D52D317D0D2FFFac56739fE14D1b49"
deployed_block = 14173129
subdomains = ["mainnet-tornado", "bsc-tornado", "gnosis-tornado"]

[networks.1]
name = "mainnet"
ens_subdomain_key = "mainnet-tornado"
proxy = "0x00000000000000000000000000000000000001c1"

[networks.1.tokens.eth]
symbol = "ETH"
decimals = 18

[networks.1.tokens.eth.pools."0.1"]
address = "0x00000000000000000000000000000000000001e1"
deployed_block = 9116966

[networks.100]
name = "gnosis"
ens_subdomain_key = "gnosis-tornado"
proxy = "0x00000000000000000000000000000000000064c1"

[networks.100.tokens.xdai]
symbol = "xDAI"
decimals = 18

[networks.100.tokens.xdai.pools."100"]
address = "0x00000000000000000000000000000000000064e1"
deployed_block = 17754566
"#;

pub fn deployments() -> Deployments {
    Deployments::from_toml(DEPLOYMENTS).unwrap()
}

pub fn word(n: u64) -> Hash {
    abi::u64_word(n)
}

pub fn deposit_log(pool: &str, block: u64, leaf: u32, commitment: &Hash) -> Log {
    let mut data = abi::u64_word(leaf as u64).to_vec();
    data.extend(abi::u64_word(1_600_000_000 + block));
    Log {
        address: pool.to_string(),
        topics: vec![DepositEvent::topic(), abi::word_hex(commitment)],
        data: format!("0x{}", hex::encode(data)),
        block_number: format!("0x{:x}", block),
        transaction_hash: format!("0x{:064x}", 0xd000_0000u64 + leaf as u64),
    }
}

pub fn withdrawal_log(pool: &str, block: u64, nullifier_hash: &Hash, to: &[u8; 20], fee: u64) -> Log {
    let data = abi::encode(&[
        Token::Word(abi::address_word(to)),
        Token::Word(*nullifier_hash),
        Token::Word(abi::u64_word(fee)),
    ]);
    Log {
        address: pool.to_string(),
        topics: vec![WithdrawalEvent::topic()],
        data: format!("0x{}", hex::encode(data)),
        block_number: format!("0x{:x}", block),
        transaction_hash: format!("0x{:064x}", 0xe000_0000u64 + block),
    }
}

pub struct FakeChain {
    pub chain_id: u64,
    pub head: u64,
    pub logs: Mutex<Vec<Log>>,
    /// (from, to) of every eth_getLogs call
    pub windows: Mutex<Vec<(u64, u64)>>,
    /// eth_getLogs fails for windows starting at or after this block
    pub fail_from: Mutex<Option<u64>>,
    /// roots the pool accepts; `None` accepts any
    pub known_roots: Mutex<Option<Vec<Hash>>>,
    pub spent: Mutex<Vec<Hash>>,
    pub balance: Mutex<BigUint>,
    pub receipts: Mutex<HashMap<String, Receipt>>,
}

impl FakeChain {
    pub fn new(chain_id: u64, head: u64) -> Self {
        Self {
            chain_id,
            head,
            logs: Mutex::new(Vec::new()),
            windows: Mutex::new(Vec::new()),
            fail_from: Mutex::new(None),
            known_roots: Mutex::new(None),
            spent: Mutex::new(Vec::new()),
            balance: Mutex::new(BigUint::from(10u64).pow(18)),
            receipts: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn mine(&self, tx_hash: &str, block: u64) {
        self.receipts.lock().unwrap().insert(
            tx_hash.to_string(),
            Receipt {
                transaction_hash: tx_hash.to_string(),
                block_number: Some(format!("0x{:x}", block)),
                from: "0x00000000000000000000000000000000000000aa".into(),
                status: Some("0x1".into()),
            },
        );
    }

    pub fn windows(&self) -> Vec<(u64, u64)> {
        self.windows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.head)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        self.windows.lock().unwrap().push((filter.from_block, filter.to_block));
        if let Some(from) = *self.fail_from.lock().unwrap() {
            if filter.from_block >= from {
                return Err(MixerError::Rpc("query returned more than 10000 results".into()));
            }
        }
        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|l| l.address.eq_ignore_ascii_case(&filter.address))
            .filter(|l| l.topics.first() == Some(&filter.topic0))
            .filter(|l| {
                let b = l.block_number().unwrap();
                b >= filter.from_block && b <= filter.to_block
            })
            .cloned()
            .collect())
    }

    async fn call(&self, _to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let selector = &data[..4];
        let arg = abi::read_word(&data[4..], 0)?;
        let answer = if selector == abi::selector(abi::IS_KNOWN_ROOT_SIG) {
            match &*self.known_roots.lock().unwrap() {
                Some(roots) => roots.contains(&arg),
                None => true,
            }
        } else if selector == abi::selector(abi::IS_SPENT_SIG) {
            self.spent.lock().unwrap().contains(&arg)
        } else {
            return Err(MixerError::Rpc("execution reverted".into()));
        };
        Ok(abi::u64_word(answer as u64).to_vec())
    }

    async fn get_balance(&self, _address: &str) -> Result<BigUint> {
        Ok(self.balance.lock().unwrap().clone())
    }

    async fn gas_price(&self) -> Result<BigUint> {
        Ok(BigUint::from(20_000_000_000u64))
    }

    async fn estimate_gas(&self, _tx: &CallRequest) -> Result<BigUint> {
        Ok(BigUint::from(400_000u64))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>> {
        Ok(self.receipts.lock().unwrap().get(tx_hash).cloned())
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        Ok(1_600_000_000 + number)
    }
}

/// serves `records` for one entity the way the graph does
pub struct FakeIndexer {
    pub entity: &'static str,
    pub block_field: &'static str,
    pub records: Vec<Value>,
    /// paged queries answered before every later one fails
    pub fail_after: Option<usize>,
    pub paged_calls: AtomicUsize,
}

impl FakeIndexer {
    pub fn deposits(records: Vec<Value>) -> Self {
        Self {
            entity: "deposits",
            block_field: "blockNumber",
            records,
            fail_after: None,
            paged_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn deposit_record(block: u64, leaf: u32, commitment: &Hash) -> Value {
        json!({
            "blockNumber": block.to_string(),
            "transactionHash": format!("0x{:064x}", 0xd000_0000u64 + leaf as u64),
            "commitment": abi::word_hex(commitment),
            "index": leaf.to_string(),
        })
    }

    fn block_of(&self, record: &Value) -> u64 {
        record[self.block_field].as_str().unwrap().parse().unwrap()
    }
}

#[async_trait]
impl GraphQuery for FakeIndexer {
    fn endpoint(&self) -> &str {
        "fake-indexer"
    }

    async fn query(&self, query: &str, variables: Value) -> Result<Value> {
        let Some(block) = variables.get(self.block_field).and_then(|b| b.as_u64()) else {
            let first: Vec<Value> = self.records.iter().take(1).cloned().collect();
            return Ok(json!({ self.entity: first }));
        };

        let n = self.paged_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.map_or(false, |limit| n >= limit) {
            return Err(MixerError::Indexer("bad gateway".into()));
        }

        let after = query.contains(&format!("{}_gt", self.block_field));
        let mut page: Vec<Value> = self
            .records
            .iter()
            .filter(|r| {
                let b = self.block_of(r);
                if after {
                    b > block
                } else {
                    b == block
                }
            })
            .cloned()
            .collect();
        page.sort_by_key(|r| self.block_of(r));
        page.truncate(mixer_core::events::GRAPH_PAGE_SIZE);
        Ok(json!({ self.entity: page }))
    }
}

/// echoes the fee into the proof so tests can see which fee was proved
pub struct CountingProver {
    pub calls: AtomicUsize,
    pub fees: Mutex<Vec<BigUint>>,
}

impl CountingProver {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fees: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Prover for CountingProver {
    fn prove(&self, input: &ProofInput) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fees.lock().unwrap().push(input.fee.clone());
        Ok(format!("0x{}", "ab".repeat(256)))
    }
}

pub struct FixedFee(pub BigUint);

#[async_trait]
impl FeeOracle for FixedFee {
    async fn withdrawal_fee(&self, _quote: &FeeQuote<'_>) -> Result<BigUint> {
        Ok(self.0.clone())
    }
}

pub struct FakeRelayer {
    pub status: Mutex<Option<RelayerStatus>>,
    pub jobs: Mutex<VecDeque<Result<JobStatus>>>,
    pub submitted: Mutex<Vec<WithdrawalRequest>>,
    pub status_calls: Mutex<Vec<String>>,
}

impl FakeRelayer {
    pub fn new(status: Option<RelayerStatus>) -> Self {
        Self {
            status: Mutex::new(status),
            jobs: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_job(&self, body: Value) {
        self.jobs.lock().unwrap().push_back(JobStatus::from_json(body));
    }

    pub fn push_job_error(&self) {
        self.jobs
            .lock()
            .unwrap()
            .push_back(Err(MixerError::Relayer("502 bad gateway".into())));
    }
}

pub fn relayer_status(net_id: Value, fee: f64, healthy: bool) -> RelayerStatus {
    RelayerStatus::from_json(json!({
        "rewardAccount": "0x00000000000000000000000000000000000000bb",
        "netId": net_id,
        "tornadoServiceFee": fee,
        "ethPrices": { "dai": "500000000000000" },
        "health": { "status": if healthy { "true" } else { "false" } }
    }))
    .unwrap()
}

#[async_trait]
impl RelayerApi for FakeRelayer {
    async fn status(&self, origin: &str) -> Result<RelayerStatus> {
        self.status_calls.lock().unwrap().push(origin.to_string());
        self.status
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MixerError::Relayer("connection refused".into()))
    }

    async fn submit_withdrawal(&self, _origin: &str, request: &WithdrawalRequest) -> Result<String> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok("job-1".into())
    }

    async fn job(&self, _origin: &str, _id: &str) -> Result<JobStatus> {
        self.jobs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| JobStatus::from_json(json!({ "status": "QUEUED" })))
    }
}

pub struct FakeSigner {
    pub address: String,
    pub sent: Mutex<Vec<CallRequest>>,
    pub tx_hash: String,
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send_transaction(&self, tx: &CallRequest) -> Result<String> {
        self.sent.lock().unwrap().push(tx.clone());
        Ok(self.tx_hash.clone())
    }
}

/// assert leaf indices are exactly 0..n
pub fn assert_contiguous(deposits: &[DepositEvent]) {
    for (i, d) in deposits.iter().enumerate() {
        assert_eq!(d.leaf_index as usize, i, "leaf gap or duplicate at position {}", i);
    }
}
