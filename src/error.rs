//! Error taxonomy for the sync pipeline
//!
//! The synchronizer branches on these variants: some pause a pass, some are
//! recorded and skipped, the rest abort the pass until the next tick.

use alloy_primitives::B256;
use thiserror::Error;

/// Failure of one step of the sync pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure, timeout, or node-side error talking to the node.
    #[error("node unavailable during {method}: {reason}")]
    RemoteUnavailable { method: String, reason: String },

    /// The node has no block at this position yet.
    #[error("block {0} not found")]
    BlockNotFound(BlockRef),

    /// The node answered with data that does not decode into the expected shape.
    #[error("malformed response from {method}({args}): {reason}")]
    MalformedResponse {
        method: String,
        args: String,
        reason: String,
    },

    /// A single log could not be decoded into a token transfer.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The atomic block write did not complete.
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),
}

impl SyncError {
    /// Whether retrying the same request shortly may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::RemoteUnavailable { .. })
    }
}

/// Block identifier used in `BlockNotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Hash(B256),
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockRef::Number(n) => write!(f, "#{}", n),
            BlockRef::Hash(h) => write!(f, "0x{:x}", h),
        }
    }
}

/// A log that matched the transfer signature but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot decode transfer log {log_index} of tx 0x{transaction_hash:x} in block {block_number}: {kind}")]
pub struct ExtractionError {
    pub transaction_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub kind: ExtractionErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionErrorKind {
    #[error("topic {index} is not a 32-byte hex word")]
    MalformedTopic { index: usize },

    #[error("data is not valid hex: {0}")]
    MalformedData(String),

    #[error("data holds {len} bytes, expected one 32-byte word")]
    DataLength { len: usize },
}

/// A sync pass that stopped on a non-transient failure.
///
/// Blocks persisted before the failure stay persisted; the cursor already
/// reflects them.
#[derive(Debug, Error)]
#[error("sync pass failed at {} after {blocks_synced} block(s): {source}", describe_block(.block))]
pub struct TickError {
    /// Block in progress when the failure happened, if the pass got that far.
    pub block: Option<u64>,
    /// Blocks fully persisted earlier in the same pass.
    pub blocks_synced: u64,
    #[source]
    pub source: SyncError,
}

fn describe_block(block: &Option<u64>) -> String {
    match block {
        Some(n) => format!("block {}", n),
        None => "pass start".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_remote_unavailable_is_transient() {
        let remote = SyncError::RemoteUnavailable {
            method: "eth_blockNumber".into(),
            reason: "connection refused".into(),
        };
        assert!(remote.is_transient());
        assert!(!SyncError::BlockNotFound(BlockRef::Number(7)).is_transient());
        assert!(!SyncError::Persistence(anyhow::anyhow!("disk full")).is_transient());
    }

    #[test]
    fn test_tick_error_mentions_block() {
        let err = TickError {
            block: Some(102),
            blocks_synced: 1,
            source: SyncError::Persistence(anyhow::anyhow!("disk full")),
        };
        let msg = err.to_string();
        assert!(msg.contains("block 102"));
        assert!(msg.contains("disk full"));
    }
}
