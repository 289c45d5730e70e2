//! deployment tables: networks, pools, relayer registry

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{MixerError, Result};

/// table shipped with the client
pub const BUILTIN_DEPLOYMENTS: &str = include_str!("../config/deployments.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct Deployments {
    pub registry: RegistryDeployment,
    pub networks: BTreeMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryDeployment {
    pub address: String,
    pub aggregator: String,
    pub deployed_block: u64,
    #[serde(default)]
    pub indexers: Vec<String>,
    /// ens subdomain keys in the order the aggregator returns records
    pub subdomains: Vec<String>,
}

/// node hash of a pool's on-chain commitment tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TreeHash {
    #[default]
    Poseidon,
    /// pedersen commitments under a mimc-sponge tree
    MimcSponge,
}

impl TreeHash {
    /// whether this client can rebuild the pool's root
    pub fn is_supported(self) -> bool {
        matches!(self, TreeHash::Poseidon)
    }
}

impl std::fmt::Display for TreeHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeHash::Poseidon => f.write_str("poseidon"),
            TreeHash::MimcSponge => f.write_str("mimc-sponge"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub ens_subdomain_key: String,
    pub proxy: String,
    #[serde(default)]
    pub tree_hash: TreeHash,
    #[serde(default)]
    pub explorer: Option<String>,
    #[serde(default)]
    pub rpc: Vec<String>,
    #[serde(default)]
    pub indexers: Vec<String>,
    pub tokens: BTreeMap<String, TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub decimals: u32,
    /// absent for the network's native coin
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    pub pools: BTreeMap<String, PoolConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub address: String,
    pub deployed_block: u64,
    /// overrides the network's `tree_hash`
    #[serde(default)]
    pub tree_hash: Option<TreeHash>,
}

/// everything needed to talk to one (chain, currency, amount) pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDeployment {
    pub chain_id: u64,
    pub network: String,
    pub currency: String,
    pub amount: String,
    pub symbol: String,
    pub decimals: u32,
    pub token_address: Option<String>,
    pub gas_limit: Option<u64>,
    pub address: String,
    pub deployed_block: u64,
    pub proxy: String,
    pub tree_hash: TreeHash,
}

impl PoolDeployment {
    pub fn is_native(&self) -> bool {
        self.token_address.is_none()
    }
}

impl Deployments {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_DEPLOYMENTS)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MixerError::Configuration(format!("deployments: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn network(&self, chain_id: u64) -> Result<&NetworkConfig> {
        self.networks
            .get(&chain_id.to_string())
            .ok_or_else(|| MixerError::Configuration(format!("no deployments for chain {}", chain_id)))
    }

    pub fn pool(&self, chain_id: u64, currency: &str, amount: &str) -> Result<PoolDeployment> {
        let network = self.network(chain_id)?;
        let currency = currency.to_lowercase();
        let token = network.tokens.get(&currency).ok_or_else(|| {
            MixerError::Configuration(format!("no {} pools on {}", currency, network.name))
        })?;
        let pool = token.pools.get(amount).ok_or_else(|| {
            MixerError::Configuration(format!(
                "no {} {} pool on {}",
                amount, currency, network.name
            ))
        })?;
        let tree_hash = pool.tree_hash.unwrap_or(network.tree_hash);
        if !tree_hash.is_supported() {
            return Err(MixerError::Configuration(format!(
                "{} {} pool on {} uses a {} tree, which this client cannot rebuild",
                amount, currency, network.name, tree_hash
            )));
        }

        Ok(PoolDeployment {
            chain_id,
            network: network.name.clone(),
            currency,
            amount: amount.to_string(),
            symbol: token.symbol.clone(),
            decimals: token.decimals,
            token_address: token.token_address.clone(),
            gas_limit: token.gas_limit,
            address: pool.address.clone(),
            deployed_block: pool.deployed_block,
            proxy: network.proxy.clone(),
            tree_hash,
        })
    }

    /// position of the network's record in the aggregator's `records` array
    pub fn subdomain_index(&self, chain_id: u64) -> Result<usize> {
        let key = &self.network(chain_id)?.ens_subdomain_key;
        self.registry
            .subdomains
            .iter()
            .position(|s| s == key)
            .ok_or_else(|| MixerError::Configuration(format!("subdomain {} not registered", key)))
    }
}
