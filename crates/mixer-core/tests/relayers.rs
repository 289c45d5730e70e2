mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{deposit_log, relayer_status, CountingProver, FakeChain, FixedFee};
use mixer_core::abi::{self, RelayerData, Token, Word};
use mixer_core::client::Log;
use mixer_core::relayer::{
    JobStatus, RegistryReader, RelayerApi, RelayerDirectory, RelayerStatus, WithdrawalRequest, MIN_STAKE_WEI,
};
use mixer_core::session::registry_target;
use mixer_core::{
    Deposit, EventStore, MixerError, Note, PoolEvent, RelayerRegistration, Result, Session,
    SessionOptions, SyncEngine, WithdrawRequest, WithdrawalCoordinator, WithdrawalOutcome,
};
use num_bigint::BigUint;
use serde_json::json;
use tempfile::tempdir;

fn registration_log(registry: &str, block: u64, name: &str, owner: u8) -> Log {
    let data = abi::encode(&[
        Token::Word(ens_hash(name)),
        Token::String(name.to_string()),
        Token::Word(abi::address_word(&[owner; 20])),
        Token::Word(abi::uint_word(&BigUint::from(MIN_STAKE_WEI)).unwrap()),
    ]);
    Log {
        address: registry.to_string(),
        topics: vec![RelayerRegistration::topic()],
        data: format!("0x{}", hex::encode(data)),
        block_number: format!("0x{:x}", block),
        transaction_hash: format!("0x{:064x}", block),
    }
}

fn ens_hash(name: &str) -> Word {
    let mut word = [0u8; 32];
    word[..name.len()].copy_from_slice(name.as_bytes());
    word
}

/// aggregator rows keyed by ens hash; unknown names come back unregistered
struct FakeRegistry {
    rows: HashMap<Word, RelayerData>,
}

impl FakeRegistry {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
        }
    }

    fn with(mut self, name: &str, owner: u8, stake: u128, host: &str) -> Self {
        let mut records = vec![format!("main.{}", host), host.to_string()];
        records.resize(abi::RELAYER_RECORDS, String::new());
        self.rows.insert(
            ens_hash(name),
            RelayerData {
                owner: [owner; 20],
                balance: BigUint::from(stake),
                is_registered: true,
                records,
            },
        );
        self
    }
}

#[async_trait]
impl RegistryReader for FakeRegistry {
    async fn relayers_data(&self, ens_hashes: &[Word], _subdomains: &[String]) -> Result<Vec<RelayerData>> {
        Ok(ens_hashes
            .iter()
            .map(|h| {
                self.rows.get(h).cloned().unwrap_or(RelayerData {
                    owner: [0; 20],
                    balance: BigUint::default(),
                    is_registered: false,
                    records: vec![String::new(); abi::RELAYER_RECORDS],
                })
            })
            .collect())
    }
}

enum Probe {
    Up(RelayerStatus),
    Down,
    Hang,
}

/// status endpoint per origin
struct Hosts {
    probes: HashMap<String, Probe>,
    submitted: Mutex<Vec<(String, WithdrawalRequest)>>,
}

impl Hosts {
    fn new(probes: Vec<(&str, Probe)>) -> Self {
        Self {
            probes: probes
                .into_iter()
                .map(|(host, p)| (format!("https://{}", host), p))
                .collect(),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RelayerApi for Hosts {
    async fn status(&self, origin: &str) -> Result<RelayerStatus> {
        match self.probes.get(origin) {
            Some(Probe::Up(status)) => Ok(status.clone()),
            Some(Probe::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(MixerError::Relayer("hung".into()))
            }
            Some(Probe::Down) | None => Err(MixerError::Relayer("connection refused".into())),
        }
    }

    async fn submit_withdrawal(&self, origin: &str, request: &WithdrawalRequest) -> Result<String> {
        self.submitted
            .lock()
            .unwrap()
            .push((origin.to_string(), request.clone()));
        Ok("job-7".into())
    }

    async fn job(&self, _origin: &str, _id: &str) -> Result<JobStatus> {
        JobStatus::from_json(json!({ "status": "CONFIRMED", "txHash": "0xbeef", "confirmations": 2 }))
    }
}

struct Registry {
    chain: Arc<FakeChain>,
    deployed_block: u64,
}

impl Registry {
    fn new(names: &[(&str, u8)]) -> Self {
        let deployments = common::deployments();
        let registry = &deployments.registry;
        let chain = Arc::new(FakeChain::new(1, registry.deployed_block + 200));
        for (i, (name, owner)) in names.iter().enumerate() {
            chain.push_log(registration_log(
                &registry.address,
                registry.deployed_block + 1 + i as u64,
                name,
                *owner,
            ));
        }
        Self {
            chain,
            deployed_block: registry.deployed_block,
        }
    }

    fn directory(&self, dir: &std::path::Path, registry: FakeRegistry, hosts: Arc<Hosts>) -> RelayerDirectory {
        let deployments = common::deployments();
        RelayerDirectory::new(
            SyncEngine::new(EventStore::open(dir), self.chain.clone()),
            registry_target(&deployments.registry),
            Arc::new(registry),
            hosts,
            deployments.registry.subdomains.clone(),
            1,
        )
        .with_probe_timeout(Duration::from_secs(2))
    }
}

#[tokio::test]
async fn test_discover_drops_reregistrations() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(&[("a.eth", 1), ("b.eth", 2), ("a.eth", 3)]);
    let hosts = Arc::new(Hosts::new(vec![]));

    let found = registry
        .directory(dir.path(), FakeRegistry::new(), hosts)
        .discover()
        .await
        .unwrap();

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].ens_name, "a.eth");
    assert_eq!(found[0].block_number, registry.deployed_block + 1);
    assert_eq!(found[0].address, abi::to_checksum(&[1; 20]));
    assert_eq!(found[1].ens_name, "b.eth");
    assert_eq!(
        registry.chain.windows(),
        vec![(registry.deployed_block, registry.deployed_block + 200)]
    );
}

#[tokio::test]
async fn test_validate_empty_skips_aggregator() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(&[]);
    let directory = registry.directory(dir.path(), FakeRegistry::new(), Arc::new(Hosts::new(vec![])));

    let candidates = directory.validate(&[]).await.unwrap();

    assert!(candidates.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_available_keeps_healthy_responders() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(&[
        ("good.eth", 1),
        ("sick.eth", 2),
        ("dead.eth", 3),
        ("slow.eth", 4),
        ("poor.eth", 5),
    ]);
    let aggregator = FakeRegistry::new()
        .with("good.eth", 1, MIN_STAKE_WEI, "good.relay")
        .with("sick.eth", 2, MIN_STAKE_WEI, "sick.relay")
        .with("dead.eth", 3, MIN_STAKE_WEI, "dead.relay")
        .with("slow.eth", 4, MIN_STAKE_WEI, "slow.relay")
        .with("poor.eth", 5, MIN_STAKE_WEI - 1, "poor.relay");
    let hosts = Arc::new(Hosts::new(vec![
        ("good.relay", Probe::Up(relayer_status(json!(1), 0.4, true))),
        ("sick.relay", Probe::Up(relayer_status(json!(1), 0.4, false))),
        ("dead.relay", Probe::Down),
        ("slow.relay", Probe::Hang),
        ("poor.relay", Probe::Up(relayer_status(json!(1), 0.4, true))),
    ]));

    let records = registry
        .directory(dir.path(), aggregator, hosts)
        .available()
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hostname(), "good.relay");
    assert_eq!(records[0].origin(), "https://good.relay");
    assert_eq!(records[0].candidate.relayer_address, format!("0x{}", "01".repeat(20)));
}

#[tokio::test]
async fn test_withdraw_through_discovered_relayer() {
    let dir = tempdir().unwrap();
    let deployments = common::deployments();
    let pool = deployments.pool(1, "eth", "0.1").unwrap();

    let chain = Arc::new(FakeChain::new(1, pool.deployed_block + 100));
    let deposits: Vec<Deposit> = (0..3u8)
        .map(|i| Deposit::new([i + 1; 31], [i + 50; 31]).unwrap())
        .collect();
    for (leaf, d) in deposits.iter().enumerate() {
        chain.push_log(deposit_log(&pool.address, pool.deployed_block + 1, leaf as u32, &d.commitment));
    }
    chain.mine("0xbeef", pool.deployed_block + 90);

    let registry = Registry::new(&[("good.eth", 1), ("down.eth", 2)]);
    let aggregator = FakeRegistry::new()
        .with("good.eth", 1, MIN_STAKE_WEI, "good.relay")
        .with("down.eth", 2, MIN_STAKE_WEI, "down.relay");
    let hosts = Arc::new(Hosts::new(vec![
        ("good.relay", Probe::Up(relayer_status(json!("1"), 0.4, true))),
        ("down.relay", Probe::Down),
    ]));
    let directory = registry.directory(&dir.path().join("registry"), aggregator, hosts.clone());

    let options = SessionOptions {
        prompt_confirmation: false,
        cache_dir: dir.path().join("pools"),
        ..SessionOptions::default()
    };
    let session = Arc::new(Session::new(&deployments, 1, "eth", "0.1", chain.clone(), options).unwrap());
    let engine = SyncEngine::new(EventStore::open(dir.path().join("pools")), chain.clone());
    let prover = Arc::new(CountingProver::new());
    let coordinator = WithdrawalCoordinator::new(
        session,
        engine,
        prover.clone(),
        Arc::new(FixedFee(BigUint::from(1_000_000_000_000_000u64))),
        hosts.clone(),
    )
    .with_directory(Arc::new(directory));

    let request = WithdrawRequest {
        note: Note::new("eth", "0.1", 1, deposits[0].clone()),
        recipient: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into(),
        refund: String::new(),
        relayer: None,
    };
    let outcome = coordinator.withdraw(&request).await.unwrap();

    assert!(matches!(
        outcome,
        WithdrawalOutcome::Relayed { ref tx_hash, .. } if tx_hash == "0xbeef"
    ));
    let submitted = hosts.submitted.lock().unwrap();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, "https://good.relay");
    assert_eq!(prover.calls(), 2);
}

#[tokio::test]
async fn test_no_live_relayer_is_reported() {
    let dir = tempdir().unwrap();
    let deployments = common::deployments();
    let pool = deployments.pool(1, "eth", "0.1").unwrap();
    let chain = Arc::new(FakeChain::new(1, pool.deployed_block + 100));
    let deposit = Deposit::new([9; 31], [10; 31]).unwrap();
    chain.push_log(deposit_log(&pool.address, pool.deployed_block + 1, 0, &deposit.commitment));

    let registry = Registry::new(&[("down.eth", 2)]);
    let aggregator = FakeRegistry::new().with("down.eth", 2, MIN_STAKE_WEI, "down.relay");
    let hosts = Arc::new(Hosts::new(vec![("down.relay", Probe::Down)]));
    let directory = registry.directory(&dir.path().join("registry"), aggregator, hosts.clone());

    let options = SessionOptions {
        prompt_confirmation: false,
        cache_dir: dir.path().join("pools"),
        ..SessionOptions::default()
    };
    let session = Arc::new(Session::new(&deployments, 1, "eth", "0.1", chain.clone(), options).unwrap());
    let prover = Arc::new(CountingProver::new());
    let coordinator = WithdrawalCoordinator::new(
        session,
        SyncEngine::new(EventStore::open(dir.path().join("pools")), chain.clone()),
        prover.clone(),
        Arc::new(FixedFee(BigUint::default())),
        hosts,
    )
    .with_directory(Arc::new(directory));

    let request = WithdrawRequest {
        note: Note::new("eth", "0.1", 1, deposit),
        recipient: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into(),
        refund: "0".into(),
        relayer: None,
    };
    let err = coordinator.withdraw(&request).await.unwrap_err();

    assert!(matches!(err, MixerError::NoEligibleRelayer), "{}", err);
    assert_eq!(prover.calls(), 0);
}
