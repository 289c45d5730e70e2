//! immutable per-invocation context

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::client::ChainReader;
use crate::config::{Deployments, NetworkConfig, PoolDeployment, RegistryDeployment};
use crate::error::Result;
use crate::events::EventKind;
use crate::store::{CacheKey, EventStore};
use crate::sync::SyncTarget;

/// where the anonymity-set warning reads deposits from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnonymityCheck {
    /// after syncing deposits to head
    #[default]
    Fresh,
    /// against whatever was cached before this invocation synced
    Cached,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// ask before risky or irreversible steps
    pub prompt_confirmation: bool,
    /// when false the direct path prepares the transaction but does not send it
    pub submit_transactions: bool,
    /// skip indexers entirely
    pub only_rpc: bool,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub job_poll_interval: Duration,
    /// no limit when unset; polling then ends only on a terminal status or cancellation
    pub job_timeout: Option<Duration>,
    pub receipt_attempts: u32,
    pub receipt_delay: Duration,
    pub merkle_tree_height: usize,
    pub cache_dir: PathBuf,
    pub anonymity_check: AnonymityCheck,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            prompt_confirmation: true,
            submit_transactions: true,
            only_rpc: false,
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            job_poll_interval: Duration::from_secs(3),
            job_timeout: None,
            receipt_attempts: 60,
            receipt_delay: Duration::from_secs(1),
            merkle_tree_height: mixer_merkle::DEFAULT_HEIGHT,
            cache_dir: PathBuf::from("./cache"),
            anonymity_check: AnonymityCheck::Fresh,
        }
    }
}

impl SessionOptions {
    /// apply `MERKLE_TREE_HEIGHT` when set
    pub fn with_env(mut self) -> Self {
        if let Ok(value) = std::env::var("MERKLE_TREE_HEIGHT") {
            match value.parse::<usize>() {
                Ok(h) if h > 0 && h <= mixer_merkle::MAX_HEIGHT => self.merkle_tree_height = h,
                _ => warn!("ignoring invalid MERKLE_TREE_HEIGHT={}", value),
            }
        }
        self
    }
}

/// one pool on one chain, plus the registry used for relayer discovery
pub struct Session {
    pub chain_id: u64,
    pub network: NetworkConfig,
    pub pool: PoolDeployment,
    pub registry: RegistryDeployment,
    /// index of this network's hostname in relayer records
    pub subdomain_index: usize,
    pub chain: Arc<dyn ChainReader>,
    pub store: EventStore,
    pub options: SessionOptions,
}

impl Session {
    pub fn new(
        deployments: &Deployments,
        chain_id: u64,
        currency: &str,
        amount: &str,
        chain: Arc<dyn ChainReader>,
        options: SessionOptions,
    ) -> Result<Self> {
        let pool = deployments.pool(chain_id, currency, amount)?;
        Ok(Self {
            chain_id,
            network: deployments.network(chain_id)?.clone(),
            subdomain_index: deployments.subdomain_index(chain_id)?,
            registry: deployments.registry.clone(),
            store: EventStore::open(&options.cache_dir),
            pool,
            chain,
            options,
        })
    }

    pub fn deposits_target(&self) -> SyncTarget {
        self.pool_target(EventKind::Deposit)
    }

    pub fn withdrawals_target(&self) -> SyncTarget {
        self.pool_target(EventKind::Withdrawal)
    }

    fn pool_target(&self, kind: EventKind) -> SyncTarget {
        SyncTarget {
            key: CacheKey::pool(&self.network.name, kind, &self.pool.currency, &self.pool.amount),
            contract: self.pool.address.clone(),
            start_block: self.pool.deployed_block,
            scope: Some((self.pool.currency.clone(), self.pool.amount.clone())),
        }
    }

    /// registry events always live on mainnet
    pub fn registry_target(&self) -> SyncTarget {
        registry_target(&self.registry)
    }

    pub fn is_mainnet(&self) -> bool {
        self.chain_id == crate::PRIMARY_CHAIN_ID
    }
}

pub fn registry_target(registry: &RegistryDeployment) -> SyncTarget {
    SyncTarget {
        key: CacheKey::Relayers,
        contract: registry.address.clone(),
        start_block: registry.deployed_block,
        scope: None,
    }
}
