//! Block synchronizer
//!
//! Drives the catch-up loop: reads the chain head and the stored cursor,
//! then ingests every missing block in order. Each block is fetched with its
//! logs, its Transfer events are extracted, and everything is written to the
//! store together with the cursor advance.

use crate::config::{LogPolicy, SyncOptions};
use crate::error::{ExtractionError, SyncError, TickError};
use crate::extract::extract_transfer;
use crate::reader::ChainReader;
use crate::store::SyncStore;
use crate::types::{format_hex_u64, Block, Log};
use alloy_primitives::B256;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a sync pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cursor was already at the head; nothing to do.
    Idle,
    /// Every block up to the head observed at pass start was ingested.
    CaughtUp,
    /// The node did not have block `at` yet. The next pass resumes there.
    Paused { at: u64 },
    /// Shutdown was requested before block `at` was started.
    Cancelled { at: u64 },
}

/// Summary of one sync pass.
#[derive(Debug, Clone)]
pub struct TickReport {
    /// First block the pass tried to ingest.
    pub from: u64,
    /// Chain head observed at pass start.
    pub head: u64,
    pub blocks_synced: u64,
    pub transfers: u64,
    /// Transfer logs that could not be decoded and were skipped.
    pub extraction_failures: Vec<ExtractionError>,
    pub outcome: SyncOutcome,
}

impl TickReport {
    fn new(from: u64, head: u64) -> Self {
        Self {
            from,
            head,
            blocks_synced: 0,
            transfers: 0,
            extraction_failures: Vec::new(),
            outcome: SyncOutcome::Idle,
        }
    }

    fn log(&self) {
        match self.outcome {
            SyncOutcome::Idle => debug!(head = self.head, "Up to date"),
            outcome => info!(
                from = self.from,
                head = self.head,
                blocks = self.blocks_synced,
                transfers = self.transfers,
                skipped_logs = self.extraction_failures.len(),
                ?outcome,
                "Sync pass finished"
            ),
        }
    }
}

struct BlockSync {
    transfers: u64,
    extraction_failures: Vec<ExtractionError>,
}

/// Ingests blocks from a chain reader into a sync store.
pub struct Synchronizer<R, S> {
    reader: R,
    store: S,
    options: SyncOptions,
}

impl<R: ChainReader, S: SyncStore> Synchronizer<R, S> {
    /// Create a new synchronizer.
    pub fn new(reader: R, store: S, options: SyncOptions) -> Self {
        Self {
            reader,
            store,
            options,
        }
    }

    #[cfg(test)]
    fn reader(&self) -> &R {
        &self.reader
    }

    #[cfg(test)]
    fn store(&self) -> &S {
        &self.store
    }

    /// Run sync passes on a fixed interval until `shutdown` is cancelled.
    ///
    /// Passes never overlap: a tick that comes due while a pass is running is
    /// skipped rather than queued. Failed passes are logged and retried on
    /// the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.options.poll_interval.as_secs_f64(),
            start_block = self.options.start_block,
            "Starting sync loop"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Dropping an in-flight pass is safe: block writes are synchronous
            // and atomic, so there is no await point inside one.
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.tick(&shutdown) => match result {
                    Ok(report) => report.log(),
                    Err(e) => error!(error = %e, "Sync pass failed"),
                },
            }
        }

        info!("Sync loop stopped");
    }

    /// Run one sync pass from the stored cursor up to the current head.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<TickReport, TickError> {
        let head = self
            .reader
            .latest_block_number()
            .await
            .map_err(|source| TickError {
                block: None,
                blocks_synced: 0,
                source,
            })?;

        // Always read the cursor from the store so a restart never diverges
        // from what is durable.
        let cursor = self.store.read_cursor().map_err(|e| TickError {
            block: None,
            blocks_synced: 0,
            source: SyncError::Persistence(e),
        })?;

        let from = match cursor {
            Some(c) => c.saturating_add(1),
            None => self.options.start_block,
        };
        let mut report = TickReport::new(from, head);
        if from > head {
            return Ok(report);
        }

        info!(from, head, "New blocks available");

        for number in from..=head {
            if shutdown.is_cancelled() {
                report.outcome = SyncOutcome::Cancelled { at: number };
                return Ok(report);
            }

            match self.sync_block(number).await {
                Ok(synced) => {
                    report.blocks_synced += 1;
                    report.transfers += synced.transfers;
                    report.extraction_failures.extend(synced.extraction_failures);
                }
                Err(SyncError::BlockNotFound(_)) => {
                    info!(block = number, "Block not available yet, pausing until next tick");
                    report.outcome = SyncOutcome::Paused { at: number };
                    return Ok(report);
                }
                Err(source) => {
                    return Err(TickError {
                        block: Some(number),
                        blocks_synced: report.blocks_synced,
                        source,
                    });
                }
            }
        }

        report.outcome = SyncOutcome::CaughtUp;
        Ok(report)
    }

    /// Fetch, extract and persist a single block.
    async fn sync_block(&self, number: u64) -> Result<BlockSync, SyncError> {
        let (block, logs) = tokio::try_join!(self.fetch_block(number), self.fetch_logs(number))?;
        check_consistency(number, &block, &logs)?;

        let mut transfers = Vec::new();
        let mut extraction_failures = Vec::new();
        for log in &logs {
            match extract_transfer(log) {
                Ok(Some(transfer)) => {
                    if self.options.keeps_token(&transfer.token) {
                        transfers.push(transfer);
                    }
                }
                Ok(None) => {}
                Err(e) => match self.options.log_policy {
                    LogPolicy::Skip => {
                        warn!(block = number, error = %e, "Skipping undecodable transfer log");
                        extraction_failures.push(e);
                    }
                    LogPolicy::Abort => return Err(e.into()),
                },
            }
        }

        self.store
            .write_block(&block, &transfers)
            .map_err(SyncError::Persistence)?;

        info!(
            block = number,
            txs = block.transactions.len(),
            logs = logs.len(),
            transfers = transfers.len(),
            "Synced block"
        );

        Ok(BlockSync {
            transfers: transfers.len() as u64,
            extraction_failures,
        })
    }

    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        // 200ms, 400ms, 800ms, ... capped at 10s
        ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.options.fetch_retries)
    }

    async fn fetch_block(&self, number: u64) -> Result<Block, SyncError> {
        RetryIf::spawn(
            self.retry_strategy(),
            || self.reader.block_by_number(number),
            |e: &SyncError| retry_if_transient(number, e),
        )
        .await
    }

    async fn fetch_logs(&self, number: u64) -> Result<Vec<Log>, SyncError> {
        RetryIf::spawn(
            self.retry_strategy(),
            || self.reader.logs_in_range(number, number),
            |e: &SyncError| retry_if_transient(number, e),
        )
        .await
    }
}

fn retry_if_transient(number: u64, e: &SyncError) -> bool {
    let transient = e.is_transient();
    if transient {
        warn!(block = number, error = %e, "Fetch failed, retrying");
    }
    transient
}

/// The node must answer with the block and logs that were asked for, and
/// every log must come from a transaction of that block.
fn check_consistency(number: u64, block: &Block, logs: &[Log]) -> Result<(), SyncError> {
    if block.number != number {
        return Err(SyncError::MalformedResponse {
            method: "eth_getBlockByNumber".to_string(),
            args: format_hex_u64(number),
            reason: format!("node returned block {}", block.number),
        });
    }

    let logs_error = |reason: String| SyncError::MalformedResponse {
        method: "eth_getLogs".to_string(),
        args: format!("{0}..{0}", format_hex_u64(number)),
        reason,
    };
    if let Some(log) = logs.iter().find(|log| log.block_number != number) {
        return Err(logs_error(format!(
            "log {} of tx 0x{:x} belongs to block {}",
            log.log_index, log.transaction_hash, log.block_number
        )));
    }

    let tx_hashes: HashSet<B256> = block.transactions.iter().map(|tx| tx.hash).collect();
    if let Some(log) = logs
        .iter()
        .find(|log| !tx_hashes.contains(&log.transaction_hash))
    {
        return Err(logs_error(format!(
            "log {} references tx 0x{:x}, which is not in block 0x{:x}",
            log.log_index, log.transaction_hash, block.hash
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockRef;
    use crate::extract::TRANSFER_TOPIC;
    use crate::records::{BlockRecord, TokenTransfer, TransactionRecord, TransferRecord};
    use crate::store::RocksSyncStore;
    use crate::types::Transaction;
    use alloy_primitives::{Address, U256};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const TOKEN: Address = Address::repeat_byte(0xaa);

    /// In-memory chain with failure injection.
    #[derive(Default)]
    struct MockChain {
        head: Mutex<u64>,
        blocks: Mutex<HashMap<u64, Block>>,
        logs: Mutex<HashMap<u64, Vec<Log>>>,
        transport_failures: Mutex<usize>,
        fetched: Mutex<Vec<u64>>,
        cancel_after: Mutex<Option<(u64, CancellationToken)>>,
    }

    impl MockChain {
        fn set_head(&self, head: u64) {
            *self.head.lock().unwrap() = head;
        }

        fn add_block(&self, block: Block, logs: Vec<Log>) {
            self.logs.lock().unwrap().insert(block.number, logs);
            self.blocks.lock().unwrap().insert(block.number, block);
        }

        fn fail_next_fetches(&self, count: usize) {
            *self.transport_failures.lock().unwrap() = count;
        }

        fn fetched(&self) -> Vec<u64> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainReader for MockChain {
        async fn latest_block_number(&self) -> Result<u64, SyncError> {
            Ok(*self.head.lock().unwrap())
        }

        async fn block_by_number(&self, number: u64) -> Result<Block, SyncError> {
            self.fetched.lock().unwrap().push(number);
            {
                let mut failures = self.transport_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(SyncError::RemoteUnavailable {
                        method: "eth_getBlockByNumber".into(),
                        reason: "connection reset".into(),
                    });
                }
            }
            if let Some((at, token)) = self.cancel_after.lock().unwrap().as_ref() {
                if *at == number {
                    token.cancel();
                }
            }
            self.blocks
                .lock()
                .unwrap()
                .get(&number)
                .cloned()
                .ok_or(SyncError::BlockNotFound(BlockRef::Number(number)))
        }

        async fn block_by_hash(&self, hash: B256) -> Result<Block, SyncError> {
            self.blocks
                .lock()
                .unwrap()
                .values()
                .find(|b| b.hash == hash)
                .cloned()
                .ok_or(SyncError::BlockNotFound(BlockRef::Hash(hash)))
        }

        async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<Log>, SyncError> {
            let logs = self.logs.lock().unwrap();
            Ok((from..=to)
                .flat_map(|n| logs.get(&n).cloned().unwrap_or_default())
                .collect())
        }
    }

    /// Store wrapper whose block write fails at a chosen height.
    struct FlakyStore {
        inner: RocksSyncStore,
        fail_at: Mutex<Option<u64>>,
    }

    impl SyncStore for FlakyStore {
        fn read_cursor(&self) -> anyhow::Result<Option<u64>> {
            self.inner.read_cursor()
        }

        fn write_block(&self, block: &Block, transfers: &[TokenTransfer]) -> anyhow::Result<()> {
            if *self.fail_at.lock().unwrap() == Some(block.number) {
                anyhow::bail!("simulated I/O error");
            }
            self.inner.write_block(block, transfers)
        }

        fn seed_cursor(&self, block: u64) -> anyhow::Result<()> {
            self.inner.seed_cursor(block)
        }

        fn get_block(&self, number: u64) -> anyhow::Result<Option<BlockRecord>> {
            self.inner.get_block(number)
        }

        fn get_transaction(&self, hash: B256) -> anyhow::Result<Option<TransactionRecord>> {
            self.inner.get_transaction(hash)
        }

        fn transfers_in_block(&self, number: u64) -> anyhow::Result<Vec<TransferRecord>> {
            self.inner.transfers_in_block(number)
        }
    }

    fn hash_of(tag: u8, number: u64) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        bytes[24..].copy_from_slice(&number.to_be_bytes());
        B256::from(bytes)
    }

    fn tx_hash(number: u64) -> B256 {
        hash_of(0x7a, number)
    }

    /// A block with one plain value transfer.
    fn plain_block(number: u64) -> Block {
        Block {
            number,
            hash: hash_of(0xb0, number),
            parent_hash: hash_of(0xb0, number.saturating_sub(1)),
            timestamp: 1_700_000_000 + number * 12,
            transactions: vec![Transaction {
                hash: tx_hash(number),
                from: Address::repeat_byte(0x01),
                to: Some(Address::repeat_byte(0x02)),
                value: U256::from(1_000u64),
                gas: 21000,
                gas_price: Some(U256::from(1_000_000_000u64)),
            }],
        }
    }

    fn topic_for(addr: Address) -> String {
        format!("0x{:0>64}", format!("{:x}", addr))
    }

    fn transfer_log(number: u64, log_index: u64, token: Address, data: String) -> Log {
        Log {
            address: token,
            topics: vec![
                format!("0x{:x}", TRANSFER_TOPIC),
                topic_for(Address::repeat_byte(0x01)),
                topic_for(Address::repeat_byte(0x03)),
            ],
            data,
            transaction_hash: tx_hash(number),
            block_number: number,
            log_index,
        }
    }

    fn amount_data(amount: u64) -> String {
        format!("0x{:064x}", amount)
    }

    fn approval_log(number: u64) -> Log {
        let mut log = transfer_log(number, 0, TOKEN, amount_data(1));
        log.topics[0] =
            "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925".to_string();
        log
    }

    fn synchronizer(
        options: SyncOptions,
    ) -> (Synchronizer<MockChain, RocksSyncStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksSyncStore::open(temp_dir.path()).unwrap();
        (
            Synchronizer::new(MockChain::default(), store, options),
            temp_dir,
        )
    }

    fn fast_options() -> SyncOptions {
        SyncOptions {
            fetch_retries: 0,
            poll_interval: Duration::from_millis(20),
            ..SyncOptions::default()
        }
    }

    fn add_plain_blocks(chain: &MockChain, range: std::ops::RangeInclusive<u64>) {
        for n in range {
            chain.add_block(plain_block(n), Vec::new());
        }
    }

    #[tokio::test]
    async fn test_catch_up_from_cursor_to_head() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(100).unwrap();

        let chain = sync.reader();
        chain.set_head(103);
        chain.add_block(plain_block(101), vec![approval_log(101)]);
        chain.add_block(plain_block(102), vec![transfer_log(102, 1, TOKEN, amount_data(500))]);
        chain.add_block(plain_block(103), Vec::new());

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::CaughtUp);
        assert_eq!(report.from, 101);
        assert_eq!(report.blocks_synced, 3);
        assert_eq!(report.transfers, 1);

        let store = sync.store();
        assert_eq!(store.read_cursor().unwrap(), Some(103));
        for n in 101..=103 {
            let tx = store.get_transaction(tx_hash(n)).unwrap().unwrap();
            assert_eq!(tx.block_number, n);
        }

        let transfers = store.transfers_in_block(102).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].transfer.amount, U256::from(500u64));
        assert_eq!(transfers[0].transfer.block_number, 102);
        assert_eq!(transfers[0].transfer.token, TOKEN);
        assert_eq!(transfers[0].block_timestamp, plain_block(102).timestamp);
        assert!(store.transfers_in_block(101).unwrap().is_empty());
        assert!(store.transfers_in_block(103).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idle_when_cursor_at_head() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(50).unwrap();
        sync.reader().set_head(50);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Idle);
        assert_eq!(report.blocks_synced, 0);
        assert!(sync.reader().fetched().is_empty());
    }

    #[tokio::test]
    async fn test_first_run_starts_at_start_block() {
        let options = SyncOptions {
            start_block: 5,
            ..fast_options()
        };
        let (sync, _dir) = synchronizer(options);
        sync.reader().set_head(6);
        add_plain_blocks(sync.reader(), 0..=6);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.from, 5);
        assert_eq!(sync.reader().fetched(), vec![5, 6]);
        assert_eq!(sync.store().read_cursor().unwrap(), Some(6));
        assert!(sync.store().get_block(4).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_block_pauses_and_resumes_there() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(100).unwrap();
        sync.reader().set_head(103);
        add_plain_blocks(sync.reader(), 101..=102);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Paused { at: 103 });
        assert_eq!(sync.store().read_cursor().unwrap(), Some(102));

        sync.reader().add_block(plain_block(103), Vec::new());
        let before = sync.reader().fetched().len();
        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::CaughtUp);
        assert_eq!(sync.reader().fetched()[before], 103);
        assert_eq!(sync.store().read_cursor().unwrap(), Some(103));
    }

    #[tokio::test]
    async fn test_cursor_moves_by_blocks_synced() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(0).unwrap();
        add_plain_blocks(sync.reader(), 1..=12);

        let mut previous = 0;
        for head in [3, 3, 7, 12] {
            sync.reader().set_head(head);
            let report = sync.tick(&CancellationToken::new()).await.unwrap();
            let cursor = sync.store().read_cursor().unwrap().unwrap();
            assert!(cursor >= previous);
            assert_eq!(cursor - previous, report.blocks_synced);
            previous = cursor;
        }
        assert_eq!(previous, 12);
    }

    #[tokio::test]
    async fn test_bad_log_is_skipped_and_recorded() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(9).unwrap();
        sync.reader().set_head(10);
        sync.reader().add_block(
            plain_block(10),
            vec![
                transfer_log(10, 0, TOKEN, "0x64".to_string()),
                transfer_log(10, 1, TOKEN, amount_data(7)),
            ],
        );

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::CaughtUp);
        assert_eq!(report.extraction_failures.len(), 1);
        assert_eq!(report.extraction_failures[0].log_index, 0);

        let transfers = sync.store().transfers_in_block(10).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].transfer.amount, U256::from(7u64));
        assert_eq!(sync.store().read_cursor().unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_bad_log_aborts_block_under_abort_policy() {
        let options = SyncOptions {
            log_policy: LogPolicy::Abort,
            ..fast_options()
        };
        let (sync, _dir) = synchronizer(options);
        sync.store().seed_cursor(9).unwrap();
        sync.reader().set_head(11);
        sync.reader().add_block(plain_block(10), Vec::new());
        sync.reader().add_block(
            plain_block(11),
            vec![transfer_log(11, 0, TOKEN, "0xzz".to_string())],
        );

        let err = sync.tick(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.block, Some(11));
        assert_eq!(err.blocks_synced, 1);
        assert!(matches!(err.source, SyncError::Extraction(_)));
        assert_eq!(sync.store().read_cursor().unwrap(), Some(10));
        assert!(sync.store().get_transaction(tx_hash(11)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_cursor_and_retries() {
        let temp_dir = TempDir::new().unwrap();
        let store = FlakyStore {
            inner: RocksSyncStore::open(temp_dir.path()).unwrap(),
            fail_at: Mutex::new(Some(102)),
        };
        let sync = Synchronizer::new(MockChain::default(), store, fast_options());
        sync.store().seed_cursor(100).unwrap();
        sync.reader().set_head(103);
        add_plain_blocks(sync.reader(), 101..=103);

        let err = sync.tick(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.block, Some(102));
        assert_eq!(err.blocks_synced, 1);
        assert!(matches!(err.source, SyncError::Persistence(_)));
        assert_eq!(sync.store().read_cursor().unwrap(), Some(101));

        *sync.store().fail_at.lock().unwrap() = None;
        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.from, 102);
        assert_eq!(sync.store().read_cursor().unwrap(), Some(103));
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_is_retried() {
        let options = SyncOptions {
            fetch_retries: 2,
            ..fast_options()
        };
        let (sync, _dir) = synchronizer(options);
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(1);
        add_plain_blocks(sync.reader(), 1..=1);
        sync.reader().fail_next_fetches(1);

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::CaughtUp);
        assert_eq!(sync.reader().fetched(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_transport_failure_without_retries_fails_pass() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(1);
        add_plain_blocks(sync.reader(), 1..=1);
        sync.reader().fail_next_fetches(1);

        let err = sync.tick(&CancellationToken::new()).await.unwrap_err();
        assert!(err.source.is_transient());
        assert_eq!(sync.store().read_cursor().unwrap(), Some(0));

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::CaughtUp);
        assert_eq!(sync.store().read_cursor().unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_blocks() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(10);
        add_plain_blocks(sync.reader(), 1..=10);

        let token = CancellationToken::new();
        *sync.reader().cancel_after.lock().unwrap() = Some((3, token.clone()));

        let report = sync.tick(&token).await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Cancelled { at: 4 });
        assert_eq!(report.blocks_synced, 3);
        assert_eq!(sync.store().read_cursor().unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_token_filter_drops_unlisted_tokens() {
        let other = Address::repeat_byte(0xbb);
        let options = SyncOptions {
            token_filter: Some(HashSet::from([TOKEN])),
            ..fast_options()
        };
        let (sync, _dir) = synchronizer(options);
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(1);
        sync.reader().add_block(
            plain_block(1),
            vec![
                transfer_log(1, 0, TOKEN, amount_data(1)),
                transfer_log(1, 1, other, amount_data(2)),
            ],
        );

        let report = sync.tick(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.transfers, 1);
        let transfers = sync.store().transfers_in_block(1).unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].transfer.token, TOKEN);
    }

    #[tokio::test]
    async fn test_wrong_block_from_node_is_malformed() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(1);
        sync.reader().add_block(plain_block(1), Vec::new());
        // The node answers the request for block 1 with block 2.
        sync.reader().blocks.lock().unwrap().insert(1, plain_block(2));

        let err = sync.tick(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err.source, SyncError::MalformedResponse { .. }));
        assert_eq!(sync.store().read_cursor().unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_log_from_other_block_is_malformed() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(1);
        let mut stray = transfer_log(1, 0, TOKEN, amount_data(5));
        stray.block_number = 2;
        sync.reader().add_block(plain_block(1), vec![stray]);

        let err = sync.tick(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.block, Some(1));
        match err.source {
            SyncError::MalformedResponse { method, .. } => assert_eq!(method, "eth_getLogs"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sync.store().read_cursor().unwrap(), Some(0));
        assert!(sync.store().get_block(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_of_unknown_transaction_is_malformed() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(1);
        let mut orphan = transfer_log(1, 0, TOKEN, amount_data(5));
        orphan.transaction_hash = tx_hash(99);
        sync.reader().add_block(plain_block(1), vec![orphan]);

        let err = sync.tick(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err.source, SyncError::MalformedResponse { .. }));
        assert_eq!(sync.store().read_cursor().unwrap(), Some(0));
        assert!(sync.store().transfers_in_block(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sync, _dir) = synchronizer(fast_options());
        sync.store().seed_cursor(0).unwrap();
        sync.reader().set_head(5);
        add_plain_blocks(sync.reader(), 1..=5);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), sync.run(token))
            .await
            .expect("sync loop did not stop");
        assert_eq!(sync.store().read_cursor().unwrap(), Some(5));
    }
}
