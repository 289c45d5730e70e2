//! third-party relayers: api, directory, selection

pub mod api;
pub mod directory;
pub mod selection;

pub use api::{relayer_origin, JobState, JobStatus, NetId, RelayerApi, RelayerClient, RelayerStatus, WithdrawalRequest};
pub use directory::{
    dedup_first_seen, filter_eligible, AggregatorReader, RegistryReader, RelayerCandidate, RelayerDirectory,
    RelayerRecord, MIN_STAKE_WEI,
};
pub use selection::{fee_coefficient, pick_index, select, FeeBounds};
