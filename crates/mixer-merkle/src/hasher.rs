//! node hashing for the commitment tree

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use light_poseidon::{Poseidon, PoseidonBytesHasher, PoseidonError};
use sha3::{Digest, Keccak256};

use crate::{Hash, MerkleError};

/// seed hashed into the empty-leaf value
pub const ZERO_VALUE_SEED: &[u8] = b"tornado";

/// two-to-one compression used at every tree level
pub trait TreeHasher {
    fn hash_pair(&mut self, left: &Hash, right: &Hash) -> Result<Hash, MerkleError>;

    /// value of an empty leaf slot
    fn zero_leaf(&self) -> Hash;
}

/// circom-compatible poseidon over the BN254 scalar field
///
/// Inputs and outputs are big-endian field elements. An input that is not
/// reduced modulo the field order is rejected rather than silently wrapped.
pub struct PoseidonHasher {
    inner: Poseidon<Fr>,
    zero: Hash,
}

impl PoseidonHasher {
    pub fn new() -> Result<Self, MerkleError> {
        let inner = Poseidon::<Fr>::new_circom(2).map_err(poseidon_err)?;
        Ok(Self {
            inner,
            zero: zero_value(),
        })
    }
}

impl TreeHasher for PoseidonHasher {
    fn hash_pair(&mut self, left: &Hash, right: &Hash) -> Result<Hash, MerkleError> {
        for input in [left, right] {
            if !is_field_element(input) {
                return Err(MerkleError::NotFieldElement(hex::encode(input)));
            }
        }
        self.inner
            .hash_bytes_be(&[left.as_slice(), right.as_slice()])
            .map_err(poseidon_err)
    }

    fn zero_leaf(&self) -> Hash {
        self.zero
    }
}

/// keccak256("tornado") reduced into the scalar field
pub fn zero_value() -> Hash {
    let digest = Keccak256::digest(ZERO_VALUE_SEED);
    field_to_hash(Fr::from_be_bytes_mod_order(&digest))
}

/// big-endian 32 byte encoding of a field element
pub fn field_to_hash(value: Fr) -> Hash {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    // to_bytes_be is exactly 32 bytes for BN254 but stay right-aligned regardless
    let start = 32usize.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
    out
}

/// true when `bytes` encodes a canonical (reduced) field element
pub fn is_field_element(bytes: &Hash) -> bool {
    field_to_hash(Fr::from_be_bytes_mod_order(bytes)) == *bytes
}

fn poseidon_err(e: PoseidonError) -> MerkleError {
    MerkleError::Hash(e.to_string())
}
