//! deposit secrets, notes and invoices
//!
//! A note is `mixer-<currency>-<amount>-<netId>-0x<preimage>` where the
//! preimage is nullifier ‖ secret, each 31 bytes little-endian. An invoice is
//! `mixerInvoice-<currency>-<amount>-<netId>-0x<commitment>` and carries only
//! the public commitment.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonBytesHasher};
use mixer_merkle::Hash;
use rand::RngCore;

use crate::error::{MixerError, Result};

pub const NOTE_PREFIX: &str = "mixer";
pub const INVOICE_PREFIX: &str = "mixerInvoice";

/// byte length of the nullifier and the secret
pub const SCALAR_LEN: usize = 31;

const PREIMAGE_HEX_LEN: usize = SCALAR_LEN * 4;
const COMMITMENT_HEX_LEN: usize = 64;

#[derive(Clone, PartialEq, Eq)]
pub struct Deposit {
    pub nullifier: [u8; SCALAR_LEN],
    pub secret: [u8; SCALAR_LEN],
    pub preimage: [u8; SCALAR_LEN * 2],
    pub commitment: Hash,
    pub nullifier_hash: Hash,
}

impl fmt::Debug for Deposit {
    // secrets stay out of logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deposit")
            .field("commitment", &self.commitment_hex())
            .field("nullifier_hash", &self.nullifier_hex())
            .finish()
    }
}

impl Deposit {
    pub fn new(nullifier: [u8; SCALAR_LEN], secret: [u8; SCALAR_LEN]) -> Result<Self> {
        let mut preimage = [0u8; SCALAR_LEN * 2];
        preimage[..SCALAR_LEN].copy_from_slice(&nullifier);
        preimage[SCALAR_LEN..].copy_from_slice(&secret);

        let commitment = poseidon_le(&[&nullifier, &secret])?;
        let nullifier_hash = poseidon_le(&[&nullifier])?;

        Ok(Self {
            nullifier,
            secret,
            preimage,
            commitment,
            nullifier_hash,
        })
    }

    pub fn random() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let mut nullifier = [0u8; SCALAR_LEN];
        let mut secret = [0u8; SCALAR_LEN];
        rng.fill_bytes(&mut nullifier);
        rng.fill_bytes(&mut secret);
        Self::new(nullifier, secret)
    }

    pub fn from_preimage(preimage: &[u8]) -> Result<Self> {
        if preimage.len() != SCALAR_LEN * 2 {
            return Err(MixerError::Validation("preimage must be 62 bytes".into()));
        }
        let mut nullifier = [0u8; SCALAR_LEN];
        let mut secret = [0u8; SCALAR_LEN];
        nullifier.copy_from_slice(&preimage[..SCALAR_LEN]);
        secret.copy_from_slice(&preimage[SCALAR_LEN..]);
        Self::new(nullifier, secret)
    }

    pub fn commitment_hex(&self) -> String {
        format!("0x{}", hex::encode(self.commitment))
    }

    pub fn nullifier_hex(&self) -> String {
        format!("0x{}", hex::encode(self.nullifier_hash))
    }

    pub fn preimage_hex(&self) -> String {
        format!("0x{}", hex::encode(self.preimage))
    }
}

/// poseidon over little-endian inputs, returned big-endian
fn poseidon_le(inputs: &[&[u8]]) -> Result<Hash> {
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|e| MixerError::Validation(format!("poseidon: {}", e)))?;
    let mut out = hasher
        .hash_bytes_le(inputs)
        .map_err(|e| MixerError::Validation(format!("poseidon: {}", e)))?;
    out.reverse();
    Ok(out)
}

/// the parts shared by notes and invoices
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolRef {
    pub currency: String,
    pub amount: String,
    pub net_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    pub pool: PoolRef,
    pub deposit: Deposit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invoice {
    pub pool: PoolRef,
    pub commitment: Hash,
}

impl Note {
    pub fn new(currency: &str, amount: &str, net_id: u64, deposit: Deposit) -> Self {
        Self {
            pool: PoolRef {
                currency: currency.to_lowercase(),
                amount: amount.to_string(),
                net_id,
            },
            deposit,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (pool, payload) = split_encoded(s, NOTE_PREFIX, PREIMAGE_HEX_LEN)
            .ok_or_else(|| MixerError::Validation("the note has invalid format".into()))?;
        let preimage = hex::decode(payload)
            .map_err(|_| MixerError::Validation("the note has invalid format".into()))?;
        Ok(Self {
            pool,
            deposit: Deposit::from_preimage(&preimage)?,
        })
    }

    pub fn invoice(&self) -> Invoice {
        Invoice {
            pool: self.pool.clone(),
            commitment: self.deposit.commitment,
        }
    }

    /// `backup-mixer-<currency>-<amount>-<netId>-<first 10 preimage hex>.txt`
    pub fn backup_file_name(&self) -> String {
        let hex = hex::encode(self.deposit.preimage);
        format!(
            "backup-{}-{}-{}-{}-{}.txt",
            NOTE_PREFIX,
            self.pool.currency,
            self.pool.amount,
            self.pool.net_id,
            &hex[..10]
        )
    }
}

impl Invoice {
    pub fn parse(s: &str) -> Result<Self> {
        let (pool, payload) = split_encoded(s, INVOICE_PREFIX, COMMITMENT_HEX_LEN)
            .ok_or_else(|| MixerError::Validation("the invoice has invalid format".into()))?;
        let bytes = hex::decode(payload)
            .map_err(|_| MixerError::Validation("the invoice has invalid format".into()))?;
        let mut commitment = [0u8; 32];
        commitment.copy_from_slice(&bytes);
        Ok(Self { pool, commitment })
    }

    pub fn commitment_hex(&self) -> String {
        format!("0x{}", hex::encode(self.commitment))
    }

    pub fn backup_file_name(&self) -> String {
        let hex = hex::encode(self.commitment);
        format!(
            "backup-{}-{}-{}-{}-{}.txt",
            INVOICE_PREFIX,
            self.pool.currency,
            self.pool.amount,
            self.pool.net_id,
            &hex[..10]
        )
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            NOTE_PREFIX,
            self.pool.currency,
            self.pool.amount,
            self.pool.net_id,
            self.deposit.preimage_hex()
        )
    }
}

impl fmt::Display for Invoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            INVOICE_PREFIX,
            self.pool.currency,
            self.pool.amount,
            self.pool.net_id,
            self.commitment_hex()
        )
    }
}

impl FromStr for Note {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self> {
        Note::parse(s)
    }
}

impl FromStr for Invoice {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self> {
        Invoice::parse(s)
    }
}

/// `<prefix>-<currency>-<amount>-<netId>-0x<hex of hex_len>`
fn split_encoded<'a>(s: &'a str, prefix: &str, hex_len: usize) -> Option<(PoolRef, &'a str)> {
    let rest = s.trim().strip_prefix(prefix)?.strip_prefix('-')?;
    let mut parts = rest.splitn(4, '-');
    let currency = parts.next()?;
    let amount = parts.next()?;
    let net_id = parts.next()?;
    let payload = parts.next()?.strip_prefix("0x")?;

    let currency_ok =
        !currency.is_empty() && currency.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    let amount_ok = !amount.is_empty() && amount.chars().all(|c| c.is_ascii_digit() || c == '.');
    let net_ok = !net_id.is_empty() && net_id.chars().all(|c| c.is_ascii_digit());
    let payload_ok = payload.len() == hex_len && payload.chars().all(|c| c.is_ascii_hexdigit());
    if !(currency_ok && amount_ok && net_ok && payload_ok) {
        return None;
    }

    Some((
        PoolRef {
            currency: currency.to_lowercase(),
            amount: amount.to_string(),
            net_id: net_id.parse().ok()?,
        },
        payload,
    ))
}
