//! syncctl - block sync store CLI tool
//!
//! Inspects the blocks, transactions and token transfers written by the
//! `blocksync` daemon, and seeds its starting cursor.

use blocksync::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
