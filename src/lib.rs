//! blocksync - Ethereum block synchronizer
//!
//! Follows a node over JSON-RPC and ingests every block, its transactions and
//! its ERC20 Transfer events into a RocksDB store. Each block is written
//! together with the sync cursor in one atomic batch, so a restart resumes
//! exactly after the last fully stored block.

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod keys;
pub mod reader;
pub mod records;
pub mod rpc;
pub mod store;
pub mod sync;
pub mod types;

// Re-export the main types for convenience
pub use config::{LogPolicy, SyncOptions};
pub use error::{ExtractionError, SyncError, TickError};
pub use reader::ChainReader;
pub use records::{BlockRecord, TokenTransfer, TransactionRecord, TransferRecord};
pub use store::{RocksSyncStore, SyncStore};
pub use sync::{Synchronizer, SyncOutcome, TickReport};
