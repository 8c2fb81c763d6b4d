//! Block synchronizer daemon
//!
//! Polls an Ethereum node and ingests blocks, transactions and ERC20
//! transfers into the local store until interrupted.

use anyhow::{Context, Result};
use blocksync::config::{load_token_filter, LogPolicy, SyncOptions};
use blocksync::rpc::RpcClient;
use blocksync::store::RocksSyncStore;
use blocksync::sync::Synchronizer;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Ethereum block synchronizer
#[derive(Parser)]
#[command(name = "blocksync")]
#[command(about = "Ingest Ethereum blocks and ERC20 transfers into a local store")]
struct Args {
    /// RPC endpoint URL (e.g., https://eth.llamarpc.com)
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Path to RocksDB database directory
    #[arg(short, long, default_value = "./sync_db")]
    db_path: PathBuf,

    /// Seconds between sync passes
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,

    /// First block to ingest when the store is empty
    #[arg(long, default_value_t = 0)]
    start_block: u64,

    /// Timeout of a single RPC request, in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// Extra attempts for a fetch that failed in transport
    #[arg(long, default_value_t = 3)]
    fetch_retries: usize,

    /// Fail the block instead of skipping a Transfer log that cannot be decoded
    #[arg(long)]
    abort_on_bad_log: bool,

    /// Path to token filter file (one ERC20 contract address per line, optional)
    #[arg(short, long)]
    tokens: Option<PathBuf>,
}

impl Args {
    fn sync_options(&self) -> Result<SyncOptions> {
        let token_filter = match &self.tokens {
            Some(path) => Some(load_token_filter(path)?),
            None => None,
        };
        let options = SyncOptions {
            start_block: self.start_block,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            fetch_retries: self.fetch_retries,
            log_policy: if self.abort_on_bad_log {
                LogPolicy::Abort
            } else {
                LogPolicy::Skip
            },
            token_filter,
        };
        options.validate()?;
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let options = args.sync_options().context("Invalid configuration")?;

    let rpc = RpcClient::new(args.rpc_url, Duration::from_secs(args.request_timeout_secs))
        .context("Failed to create RPC client")?;

    info!("Starting block synchronizer");
    info!("RPC URL: {}", rpc.url());
    info!("Database: {:?}", args.db_path);
    if let Some(filter) = &options.token_filter {
        info!("Token filter: {} contract(s)", filter.len());
    }

    let store = RocksSyncStore::open(&args.db_path)
        .with_context(|| format!("Failed to open database at {:?}", args.db_path))?;

    let synchronizer = Synchronizer::new(rpc, store, options);

    // Handle Ctrl+C gracefully
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        signal_token.cancel();
    });

    synchronizer.run(shutdown).await;

    info!("Synchronizer stopped");
    Ok(())
}
