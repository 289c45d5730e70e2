//! fixed-height commitment tree for shielded-pool deposits
//!
//! Leaves are deposit commitments in leaf-index order. Empty slots hold the
//! zero value and every internal node is poseidon(left, right) over BN254.

mod hasher;
mod tree;

pub use hasher::{field_to_hash, is_field_element, zero_value, PoseidonHasher, TreeHasher, ZERO_VALUE_SEED};
pub use tree::{verify_path, CommitmentTree, MerkleProof};

use thiserror::Error;

/// big-endian field element
pub type Hash = [u8; 32];

/// levels in a deployed pool tree
pub const DEFAULT_HEIGHT: usize = 20;

/// deepest tree we are willing to build (leaf indices are u32)
pub const MAX_HEIGHT: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("leaf index gap: expected {expected}, found {found}")]
    Gap { expected: u32, found: u32 },

    #[error("duplicate leaf index {0}")]
    Duplicate(u32),

    #[error("tree full: {leaves} leaves exceed capacity of height {height}")]
    TreeFull { leaves: usize, height: usize },

    #[error("invalid tree height {0}")]
    InvalidHeight(usize),

    #[error("leaf {0} not in tree")]
    LeafOutOfRange(u32),

    #[error("value is not a field element: {0}")]
    NotFieldElement(String),

    #[error("poseidon error: {0}")]
    Hash(String),
}
