//! mixer-core - withdrawal client for a shielded-pool mixer
//!
//! Keeps a local, append-only mirror of pool and relayer-registry events,
//! rebuilds the commitment tree from it, picks relayers and drives a
//! withdrawal to completion.
//!
//! - `sync`: indexer-first event sync with fallback to chain logs
//! - `pool`: tree reconstruction and on-chain root/nullifier checks
//! - `relayer`: registry discovery, validation, probing, weighted selection
//! - `withdraw`: direct and relayed withdrawal flows

pub mod abi;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod fees;
pub mod note;
pub mod pool;
pub mod prover;
pub mod relayer;
pub mod report;
pub mod session;
pub mod store;
pub mod sync;
pub mod units;
pub mod withdraw;

pub use error::{ErrorCategory, MixerError, Result};
pub use config::{Deployments, PoolDeployment, TreeHash};
pub use events::{DepositEvent, EventKind, PoolEvent, RelayerRegistration, WithdrawalEvent};
pub use note::{Deposit, Invoice, Note};
pub use session::{AnonymityCheck, Session, SessionOptions};
pub use store::{CacheKey, EventStore};
pub use sync::{SyncEngine, SyncTarget};
pub use withdraw::{
    Confirmation, WithdrawRequest, WithdrawalCoordinator, WithdrawalOutcome, WithdrawalState,
};

/// chain whose fee bounds and relayer registry differ from the rest
pub const PRIMARY_CHAIN_ID: u64 = 1;
