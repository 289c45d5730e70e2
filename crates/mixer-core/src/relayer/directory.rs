//! relayer discovery: registry events, on-chain validation, liveness probes

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use num_bigint::BigUint;
use tracing::{debug, info};

use super::api::{RelayerApi, RelayerStatus};
use crate::abi::{self, RelayerData, Token, Word};
use crate::client::ChainReader;
use crate::error::Result;
use crate::events::RelayerRegistration;
use crate::sync::{SyncEngine, SyncTarget};

/// 500 governance tokens
pub const MIN_STAKE_WEI: u128 = 500_000_000_000_000_000_000;

/// registration that passed the on-chain checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerCandidate {
    pub ens_name: String,
    pub hostname: String,
    pub stake_balance: BigUint,
    /// registering address, lowercase
    pub relayer_address: String,
}

/// candidate that also answered its status probe
#[derive(Debug, Clone, PartialEq)]
pub struct RelayerRecord {
    pub candidate: RelayerCandidate,
    pub status: RelayerStatus,
}

impl RelayerRecord {
    pub fn origin(&self) -> String {
        format!("https://{}", self.candidate.hostname)
    }

    pub fn hostname(&self) -> &str {
        &self.candidate.hostname
    }

    pub fn stake_balance(&self) -> &BigUint {
        &self.candidate.stake_balance
    }

    pub fn service_fee(&self) -> f64 {
        self.status.service_fee
    }
}

/// batched per-relayer state from the aggregator contract
#[async_trait]
pub trait RegistryReader: Send + Sync {
    async fn relayers_data(&self, ens_hashes: &[Word], subdomains: &[String]) -> Result<Vec<RelayerData>>;
}

pub struct AggregatorReader {
    chain: Arc<dyn ChainReader>,
    aggregator: String,
}

impl AggregatorReader {
    pub fn new(chain: Arc<dyn ChainReader>, aggregator: &str) -> Self {
        Self {
            chain,
            aggregator: aggregator.to_string(),
        }
    }
}

#[async_trait]
impl RegistryReader for AggregatorReader {
    async fn relayers_data(&self, ens_hashes: &[Word], subdomains: &[String]) -> Result<Vec<RelayerData>> {
        let data = abi::encode_call(
            abi::RELAYERS_DATA_SIG,
            &[
                Token::WordArray(ens_hashes.to_vec()),
                Token::StringArray(subdomains.to_vec()),
            ],
        );
        let out = self.chain.call(&self.aggregator, &data).await?;
        abi::decode_relayers_data(&out)
    }
}

/// keep the first registration seen for each ens name
pub fn dedup_first_seen(registrations: Vec<RelayerRegistration>) -> Vec<RelayerRegistration> {
    let mut seen = std::collections::HashSet::new();
    registrations
        .into_iter()
        .filter(|r| seen.insert(r.ens_name.clone()))
        .collect()
}

/// apply the listing rules to aggregator rows aligned with `registrations`
pub fn filter_eligible(
    registrations: &[RelayerRegistration],
    data: &[RelayerData],
    subdomain_index: usize,
) -> Vec<RelayerCandidate> {
    let min_stake = BigUint::from(MIN_STAKE_WEI);
    registrations
        .iter()
        .zip(data)
        .filter_map(|(reg, row)| {
            let hostname = row.records.get(subdomain_index)?.trim();
            let primary = row.records.first()?;
            let owner = abi::to_checksum(&row.owner);

            let eligible = !hostname.is_empty()
                && !hostname.contains("http")
                && !primary.is_empty()
                && owner.eq_ignore_ascii_case(&reg.address)
                && row.is_registered
                && row.balance >= min_stake;
            if !eligible {
                debug!("relayer {} not eligible", reg.ens_name);
                return None;
            }

            Some(RelayerCandidate {
                ens_name: reg.ens_name.clone(),
                hostname: hostname.to_string(),
                stake_balance: row.balance.clone(),
                relayer_address: reg.address.to_lowercase(),
            })
        })
        .collect()
}

pub struct RelayerDirectory {
    engine: SyncEngine,
    target: SyncTarget,
    registry: Arc<dyn RegistryReader>,
    api: Arc<dyn RelayerApi>,
    subdomains: Vec<String>,
    subdomain_index: usize,
    probe_timeout: Duration,
}

impl RelayerDirectory {
    /// `engine` must read the network the registry lives on
    pub fn new(
        engine: SyncEngine,
        target: SyncTarget,
        registry: Arc<dyn RegistryReader>,
        api: Arc<dyn RelayerApi>,
        subdomains: Vec<String>,
        subdomain_index: usize,
    ) -> Self {
        Self {
            engine,
            target,
            registry,
            api,
            subdomains,
            subdomain_index,
            probe_timeout: Duration::from_secs(3),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// sync registrations and drop re-registrations
    pub async fn discover(&self) -> Result<Vec<RelayerRegistration>> {
        let registrations = self.engine.sync::<RelayerRegistration>(&self.target).await?;
        let total = registrations.len();
        let unique = dedup_first_seen(registrations);
        debug!("{} registrations, {} unique names", total, unique.len());
        Ok(unique)
    }

    pub async fn validate(&self, registrations: &[RelayerRegistration]) -> Result<Vec<RelayerCandidate>> {
        if registrations.is_empty() {
            return Ok(Vec::new());
        }
        let hashes = registrations
            .iter()
            .map(|r| abi::parse_word(&r.ens_hash))
            .collect::<Result<Vec<_>>>()?;
        let data = self.registry.relayers_data(&hashes, &self.subdomains).await?;
        Ok(filter_eligible(registrations, &data, self.subdomain_index))
    }

    /// concurrent status probes; failures and unhealthy relayers are dropped
    pub async fn probe(&self, candidates: Vec<RelayerCandidate>) -> Vec<RelayerRecord> {
        let probes = candidates.into_iter().map(|candidate| async move {
            let origin = format!("https://{}", candidate.hostname);
            match tokio::time::timeout(self.probe_timeout, self.api.status(&origin)).await {
                Ok(Ok(status)) if status.healthy => Some(RelayerRecord { candidate, status }),
                Ok(Ok(_)) => {
                    debug!("relayer {} unhealthy", candidate.hostname);
                    None
                }
                Ok(Err(e)) => {
                    debug!("relayer {} probe failed: {}", candidate.hostname, e);
                    None
                }
                Err(_) => {
                    debug!("relayer {} probe timed out", candidate.hostname);
                    None
                }
            }
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    /// discover, validate and probe
    pub async fn available(&self) -> Result<Vec<RelayerRecord>> {
        info!("fetching relayers");
        let registrations = self.discover().await?;
        let candidates = self.validate(&registrations).await?;
        let records = self.probe(candidates).await;
        info!("found {} available relayers", records.len());
        Ok(records)
    }
}
