//! on-chain pool reads and merkle proofs over cached deposits

use mixer_merkle::{CommitmentTree, Hash, MerkleProof, PoseidonHasher};
use tracing::{debug, info};

use crate::abi::{self, Token};
use crate::client::ChainReader;
use crate::config::TreeHash;
use crate::error::{MixerError, Result};
use crate::events::DepositEvent;

pub async fn is_known_root(chain: &dyn ChainReader, pool: &str, root: &Hash) -> Result<bool> {
    let data = abi::encode_call(abi::IS_KNOWN_ROOT_SIG, &[Token::Word(*root)]);
    abi::read_bool(&chain.call(pool, &data).await?, 0)
}

pub async fn is_spent(chain: &dyn ChainReader, pool: &str, nullifier_hash: &Hash) -> Result<bool> {
    let data = abi::encode_call(abi::IS_SPENT_SIG, &[Token::Word(*nullifier_hash)]);
    abi::read_bool(&chain.call(pool, &data).await?, 0)
}

/// tree over cached deposits; leaf indices must be exactly 0..n
pub fn build_tree(hash: TreeHash, height: usize, deposits: &[DepositEvent]) -> Result<CommitmentTree> {
    let leaves = deposits
        .iter()
        .map(|d| Ok((d.leaf_index, abi::parse_word(&d.commitment)?)))
        .collect::<Result<Vec<_>>>()?;
    match hash {
        TreeHash::Poseidon => {
            let mut hasher = PoseidonHasher::new()?;
            Ok(CommitmentTree::from_indexed_leaves_with(&mut hasher, height, leaves)?)
        }
        other => Err(MixerError::Configuration(format!("no {} tree hasher", other))),
    }
}

/// outcome of rebuilding a cached tree and asking the pool about its root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheCheck {
    pub root: Hash,
    pub leaves: usize,
    pub known: bool,
}

pub async fn check_cache(
    chain: &dyn ChainReader,
    pool: &str,
    hash: TreeHash,
    height: usize,
    deposits: &[DepositEvent],
) -> Result<CacheCheck> {
    let tree = build_tree(hash, height, deposits)?;
    let root = tree.root();
    let known = is_known_root(chain, pool, &root).await?;
    Ok(CacheCheck {
        root,
        leaves: tree.len(),
        known,
    })
}

/// inclusion proof for `commitment`
///
/// Checks run in a fixed order: the rebuilt root must be known to the pool,
/// the nullifier must be unspent, and the commitment must be among the leaves.
pub async fn merkle_proof(
    chain: &dyn ChainReader,
    pool: &str,
    hash: TreeHash,
    height: usize,
    deposits: &[DepositEvent],
    commitment: &Hash,
    nullifier_hash: &Hash,
) -> Result<MerkleProof> {
    info!("computing merkle proof over {} deposits", deposits.len());
    let tree = build_tree(hash, height, deposits)?;
    let root = tree.root();

    if !is_known_root(chain, pool, &root).await? {
        return Err(MixerError::CorruptedCache(abi::word_hex(&root)));
    }
    if is_spent(chain, pool, nullifier_hash).await? {
        return Err(MixerError::AlreadySpent);
    }
    let index = tree
        .index_of(commitment)
        .ok_or_else(|| MixerError::DepositNotFound(abi::word_hex(commitment)))?;

    debug!("leaf {} under root {}", index, abi::word_hex(&root));
    Ok(tree.path(index)?)
}

/// cached deposit event for `commitment`
pub fn find_deposit<'a>(deposits: &'a [DepositEvent], commitment: &Hash) -> Option<&'a DepositEvent> {
    deposits
        .iter()
        .find(|d| abi::parse_word(&d.commitment).map_or(false, |c| &c == commitment))
}
