//! CLI implementation for syncctl
//!
//! Inspects and seeds the sync store. All commands output pretty JSON.

use crate::reader::ChainReader;
use crate::records::{BlockRecord, TransactionRecord, TransferRecord};
use crate::rpc::RpcClient;
use crate::{RocksSyncStore, SyncStore};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Sync store CLI tool
#[derive(Parser)]
#[command(name = "syncctl")]
#[command(about = "Inspect and seed the block sync store")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./sync_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get the highest fully synced block
    GetCursor,
    /// Start syncing after the given block on the next run
    SeedCursor {
        /// Block number
        block: u64,
    },
    /// Get a stored block summary
    GetBlock {
        /// Block number
        number: u64,
    },
    /// Get a stored transaction
    GetTx {
        /// Transaction hash (64 hex chars, with or without 0x prefix)
        hash: String,
    },
    /// List the token transfers of a block
    Transfers {
        /// Block number
        number: u64,
    },
    /// Check a stored block's parent against the node
    CheckParent {
        /// Block number
        number: u64,
        /// RPC endpoint URL
        #[arg(short, long, default_value = "http://127.0.0.1:8545")]
        rpc_url: String,
    },
}

/// Parse a hex string into a 32-byte hash.
fn parse_hash(s: &str) -> Result<B256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).with_context(|| format!("Invalid hex hash: {}", s))?;
    if bytes.len() != 32 {
        anyhow::bail!("Hash must be 32 bytes (64 hex chars), got {} bytes", bytes.len());
    }
    Ok(B256::from_slice(&bytes))
}

fn block_json(block: &BlockRecord) -> Value {
    json!({
        "number": block.number,
        "hash": format!("0x{:x}", block.hash),
        "parent_hash": format!("0x{:x}", block.parent_hash),
        "timestamp": block.timestamp,
        "transactions": block
            .transactions
            .iter()
            .map(|hash| format!("0x{:x}", hash))
            .collect::<Vec<_>>(),
    })
}

fn transaction_json(tx: &TransactionRecord) -> Value {
    json!({
        "hash": format!("0x{:x}", tx.hash),
        "block_number": tx.block_number,
        "block_timestamp": tx.block_timestamp,
        "from": format!("0x{:x}", tx.from),
        "to": tx.to.map(|to| format!("0x{:x}", to)),
        "value": tx.value.to_string(),
        "gas": tx.gas,
        "gas_price": tx.gas_price.map(|price| price.to_string()),
    })
}

fn transfer_json(record: &TransferRecord) -> Value {
    let transfer = &record.transfer;
    json!({
        "token": format!("0x{:x}", transfer.token),
        "from": format!("0x{:x}", transfer.from),
        "to": format!("0x{:x}", transfer.to),
        "amount": transfer.amount.to_string(),
        "transaction_hash": format!("0x{:x}", transfer.transaction_hash),
        "log_index": transfer.log_index,
        "block_timestamp": record.block_timestamp,
    })
}

/// Run the CLI command and print JSON output.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = RocksSyncStore::open(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = execute(&store, cli.command).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn execute<S: SyncStore>(store: &S, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::GetCursor => json!({ "cursor": store.read_cursor()? }),
        Commands::SeedCursor { block } => {
            store.seed_cursor(block)?;
            json!({ "status": "ok", "cursor": block })
        }
        Commands::GetBlock { number } => match store.get_block(number)? {
            Some(block) => json!({ "block": block_json(&block) }),
            None => json!({ "number": number, "block": null }),
        },
        Commands::GetTx { hash } => {
            let hash = parse_hash(&hash)?;
            match store.get_transaction(hash)? {
                Some(tx) => json!({ "transaction": transaction_json(&tx) }),
                None => json!({ "hash": format!("0x{:x}", hash), "transaction": null }),
            }
        }
        Commands::Transfers { number } => {
            let transfers = store.transfers_in_block(number)?;
            json!({
                "block": number,
                "count": transfers.len(),
                "transfers": transfers.iter().map(transfer_json).collect::<Vec<_>>(),
            })
        }
        Commands::CheckParent { number, rpc_url } => {
            let rpc = RpcClient::new(rpc_url, Duration::from_secs(30))?;
            check_parent(store, &rpc, number).await?
        }
    };
    Ok(result)
}

/// Fetch the parent of a stored block from the node by hash and verify the
/// number/hash linkage, against the stored parent too when there is one.
async fn check_parent<S: SyncStore, R: ChainReader>(
    store: &S,
    reader: &R,
    number: u64,
) -> Result<Value> {
    let block = store
        .get_block(number)?
        .with_context(|| format!("Block {} is not in the store", number))?;
    let parent = reader
        .block_by_hash(block.parent_hash)
        .await
        .with_context(|| format!("Failed to fetch parent of block {}", number))?;

    let number_matches = parent.number.checked_add(1) == Some(number);
    let stored_parent = store.get_block(parent.number)?;
    let stored_parent_matches = stored_parent.as_ref().map(|p| p.hash == parent.hash);

    Ok(json!({
        "block": number,
        "parent_hash": format!("0x{:x}", block.parent_hash),
        "remote_parent_number": parent.number,
        "number_matches": number_matches,
        "stored_parent_matches": stored_parent_matches,
        "linked": number_matches && stored_parent_matches.unwrap_or(true),
    }))
}
