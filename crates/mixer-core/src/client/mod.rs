//! network clients: json-rpc node and graphql indexer
//!
//! both sit behind traits so sync and withdrawal logic can run against fakes

pub mod indexer;
pub mod rpc;

pub use indexer::{GraphQuery, IndexerClient};
pub use rpc::{CallRequest, ChainReader, Log, LogFilter, NodeSigner, Receipt, RpcClient, TransactionSigner};
