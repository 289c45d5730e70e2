//! append-only json event cache
//!
//! one pretty-printed array per (event type, pool) key. unreadable files load
//! as empty; the root check downstream is what surfaces a damaged cache.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{MixerError, Result};
use crate::events::{EventKind, PoolEvent};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Pool {
        network: String,
        kind: EventKind,
        currency: String,
        amount: String,
    },
    Relayers,
}

impl CacheKey {
    pub fn pool(network: &str, kind: EventKind, currency: &str, amount: &str) -> Self {
        CacheKey::Pool {
            network: network.to_lowercase(),
            kind,
            currency: currency.to_lowercase(),
            amount: amount.to_string(),
        }
    }

    /// path relative to the cache root
    pub fn relative_path(&self) -> PathBuf {
        match self {
            CacheKey::Pool {
                network,
                kind,
                currency,
                amount,
            } => Path::new(network).join(format!("{}s_{}_{}.json", kind.as_str(), currency, amount)),
            CacheKey::Relayers => Path::new("relayer").join("register.json"),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.relative_path().display())
    }
}

#[derive(Debug, Clone)]
pub struct EventStore {
    root: PathBuf,
}

impl EventStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// cached events in stored order; empty when missing or unparsable
    pub fn load<E: PoolEvent>(&self, key: &CacheKey) -> Vec<E> {
        let path = self.path(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("cannot read cache {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        match serde_json::from_slice::<Vec<E>>(&bytes) {
            Ok(events) => events,
            Err(e) => {
                warn!("ignoring corrupt cache {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    pub fn last_block<E: PoolEvent>(&self, key: &CacheKey) -> Option<u64> {
        self.load::<E>(key).last().map(|e| e.block_number())
    }

    /// sort `batch` by the event rule, place it after the cached events, rewrite
    pub fn append<E: PoolEvent>(&self, key: &CacheKey, mut batch: Vec<E>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        E::sort_batch(&mut batch);

        let mut events = self.load::<E>(key);
        let added = batch.len();
        events.extend(batch);
        self.write_all(key, &events)?;

        debug!("appended {} {} events to {}", added, E::KIND, key);
        Ok(added)
    }

    fn write_all<E: PoolEvent>(&self, key: &CacheKey, events: &[E]) -> Result<()> {
        let path = self.path(key);
        let dir = path
            .parent()
            .ok_or_else(|| MixerError::Configuration(format!("bad cache path {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, events)?;
            writer.flush()?;
        }
        tmp.persist(&path).map_err(|e| MixerError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DepositEvent, RelayerRegistration};
    use tempfile::tempdir;

    fn deposit(block: u64, leaf: u32) -> DepositEvent {
        DepositEvent {
            block_number: block,
            transaction_hash: format!("0x{:x}", block),
            commitment: format!("0x{:064x}", leaf),
            leaf_index: leaf,
            timestamp: None,
        }
    }

    fn key() -> CacheKey {
        CacheKey::pool("Mainnet", EventKind::Deposit, "ETH", "0.1")
    }

    #[test]
    fn test_paths() {
        assert_eq!(
            key().relative_path(),
            Path::new("mainnet").join("deposits_eth_0.1.json")
        );
        assert_eq!(
            CacheKey::Relayers.relative_path(),
            Path::new("relayer").join("register.json")
        );
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path());
        assert!(store.load::<DepositEvent>(&key()).is_empty());
        assert_eq!(store.last_block::<DepositEvent>(&key()), None);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path());
        let path = store.path(&key());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"[{\"blockNumber\": 1,").unwrap();

        assert!(store.load::<DepositEvent>(&key()).is_empty());
    }

    #[test]
    fn test_append_sorts_batch_and_preserves_prefix() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path());

        store.append(&key(), vec![deposit(10, 1), deposit(10, 0)]).unwrap();
        store.append(&key(), vec![deposit(12, 3), deposit(11, 2)]).unwrap();

        let events = store.load::<DepositEvent>(&key());
        let leaves: Vec<u32> = events.iter().map(|e| e.leaf_index).collect();
        assert_eq!(leaves, vec![0, 1, 2, 3]);
        assert_eq!(store.last_block::<DepositEvent>(&key()), Some(12));
    }

    #[test]
    fn test_empty_batch_does_not_create_file() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path());
        assert_eq!(store.append::<DepositEvent>(&key(), vec![]).unwrap(), 0);
        assert!(!store.path(&key()).exists());
    }

    #[test]
    fn test_file_is_pretty_json_array() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path());
        let reg = RelayerRegistration {
            block_number: 5,
            ens_hash: "0x01".into(),
            ens_name: "r.eth".into(),
            address: "0x02".into(),
        };
        store.append(&CacheKey::Relayers, vec![reg]).unwrap();

        let text = fs::read_to_string(store.path(&CacheKey::Relayers)).unwrap();
        assert!(text.starts_with("[\n"));
        assert!(text.contains("\"ensName\": \"r.eth\""));
    }
}
