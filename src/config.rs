//! Sync configuration and token filter loading
//!
//! `SyncOptions` drives the synchronizer. The optional token filter is read
//! from a file with one ERC20 contract address per line.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Polling interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// What to do with a Transfer log that cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogPolicy {
    /// Record the failure and keep ingesting the block.
    #[default]
    Skip,
    /// Fail the block; the pass stops and the block is retried next tick.
    Abort,
}

/// Settings of the synchronizer.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// First block to ingest when the store has no cursor yet.
    pub start_block: u64,
    /// Time between sync passes.
    pub poll_interval: Duration,
    /// Extra attempts for a block or log fetch that failed in transport.
    pub fetch_retries: usize,
    pub log_policy: LogPolicy,
    /// When set, only transfers of these token contracts are kept.
    pub token_filter: Option<HashSet<Address>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            start_block: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_retries: 3,
            log_policy: LogPolicy::Skip,
            token_filter: None,
        }
    }
}

impl SyncOptions {
    /// Check that the options describe a runnable synchronizer.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            anyhow::bail!("Poll interval must be greater than zero");
        }
        if let Some(filter) = &self.token_filter {
            if filter.is_empty() {
                anyhow::bail!("Token filter is set but contains no addresses");
            }
        }
        Ok(())
    }

    /// Whether transfers of `token` should be kept.
    pub fn keeps_token(&self, token: &Address) -> bool {
        self.token_filter
            .as_ref()
            .map_or(true, |filter| filter.contains(token))
    }
}

/// Load a token filter from a file.
///
/// Each line should contain one contract address in hex format (with or without 0x prefix).
/// Empty lines and lines starting with '#' are ignored.
///
/// # Example file format:
/// ```text
/// 0xdAC17F958D2ee523a2206206994597C13D831ec7
/// # USDC
/// 0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48
/// ```
pub fn load_token_filter(path: &Path) -> Result<HashSet<Address>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read token filter file: {:?}", path))?;

    let mut tokens = HashSet::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let addr = parse_address(line)
            .with_context(|| format!("Invalid address on line {}: {}", line_num + 1, line))?;

        tokens.insert(addr);
    }

    if tokens.is_empty() {
        anyhow::bail!("Token filter is empty (no valid addresses found)");
    }

    Ok(tokens)
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix.
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!(
            "Address must be 20 bytes (40 hex chars), got {} bytes",
            bytes.len()
        );
    }

    Ok(Address::from_slice(&bytes))
}
