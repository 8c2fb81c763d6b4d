//! SyncStore trait and RocksDB implementation
//!
//! Persists ingested blocks, transactions, token transfers and the sync
//! cursor. Uses RocksDB with one column family per logical table.

use crate::keys::{
    decode_transfer_key, encode_block_key, encode_meta_key, encode_transaction_key,
    encode_transfer_block_prefix, encode_transfer_key, CURSOR_META_ID,
};
use crate::records::{BlockRecord, TokenTransfer, TransactionRecord, TransferRecord};
use crate::types::Block;
use alloy_primitives::B256;
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::path::Path;

const CF_BLOCKS: &str = "blocks";
const CF_TRANSACTIONS: &str = "transactions";
const CF_TOKEN_TRANSFERS: &str = "token_transfers";
const CF_SYNC_INFO: &str = "sync_info";

/// Trait defining the persistence contract of the sync pipeline.
///
/// The cursor is only ever moved by `write_block` (or seeded once through
/// `seed_cursor`), and never backwards.
pub trait SyncStore {
    /// Get the highest fully synced block number.
    ///
    /// Returns None before the first block is written (genesis).
    fn read_cursor(&self) -> Result<Option<u64>>;

    /// Persist a block, its transactions and its token transfers, and advance
    /// the cursor to the block number, as one atomic write.
    ///
    /// Replaying a block at or below the cursor rewrites the same rows and
    /// leaves the cursor where it is. A block past `cursor + 1` is rejected.
    fn write_block(&self, block: &Block, transfers: &[TokenTransfer]) -> Result<()>;

    /// Set the cursor without writing a block, e.g. to start from a recent height.
    ///
    /// Fails if it would move an existing cursor backwards.
    fn seed_cursor(&self, block: u64) -> Result<()>;

    /// Get a stored block summary by number.
    fn get_block(&self, number: u64) -> Result<Option<BlockRecord>>;

    /// Get a stored transaction by hash.
    fn get_transaction(&self, hash: B256) -> Result<Option<TransactionRecord>>;

    /// Get all token transfers of a block, ordered by (tx hash, log index).
    fn transfers_in_block(&self, number: u64) -> Result<Vec<TransferRecord>>;
}

/// RocksDB-backed implementation of SyncStore.
///
/// Column families:
/// - blocks: block summaries
/// - transactions: transaction rows keyed by hash
/// - token_transfers: transfers keyed by (block, tx hash, log index)
/// - sync_info: the sync cursor
pub struct RocksSyncStore {
    db: DB,
}

impl RocksSyncStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_TOKEN_TRANSFERS, Options::default()),
            ColumnFamilyDescriptor::new(CF_SYNC_INFO, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn put_cursor(&self, block: u64) -> Result<()> {
        let cf = self.get_cf(CF_SYNC_INFO)?;
        self.db
            .put_cf(cf, encode_meta_key(CURSOR_META_ID), block.to_be_bytes())
            .context("Failed to write sync cursor")
    }
}

impl SyncStore for RocksSyncStore {
    fn read_cursor(&self) -> Result<Option<u64>> {
        let cf = self.get_cf(CF_SYNC_INFO)?;
        let key = encode_meta_key(CURSOR_META_ID);
        match self.db.get_cf(cf, &key).context("Failed to read sync cursor")? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    anyhow::anyhow!("Sync cursor must be 8 bytes (u64), got {}", bytes.len())
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    fn write_block(&self, block: &Block, transfers: &[TokenTransfer]) -> Result<()> {
        let cursor = self.read_cursor()?;
        if let Some(cursor) = cursor {
            if block.number > cursor.saturating_add(1) {
                anyhow::bail!(
                    "Refusing to write block {}: cursor is at {}, blocks in between are missing",
                    block.number,
                    cursor
                );
            }
        }
        if let Some(stray) = transfers.iter().find(|t| t.block_number != block.number) {
            anyhow::bail!(
                "Transfer from block {} cannot be written with block {}",
                stray.block_number,
                block.number
            );
        }

        let blocks_cf = self.get_cf(CF_BLOCKS)?;
        let txs_cf = self.get_cf(CF_TRANSACTIONS)?;
        let transfers_cf = self.get_cf(CF_TOKEN_TRANSFERS)?;
        let sync_cf = self.get_cf(CF_SYNC_INFO)?;

        let mut batch = WriteBatch::default();

        let record = BlockRecord::from(block);
        let value = postcard::to_allocvec(&record).context("Failed to serialize block record")?;
        batch.put_cf(blocks_cf, encode_block_key(block.number), value);

        for tx in &block.transactions {
            let record = TransactionRecord::from_transaction(tx, block);
            let value =
                postcard::to_allocvec(&record).context("Failed to serialize transaction record")?;
            batch.put_cf(txs_cf, encode_transaction_key(tx.hash), value);
        }

        for transfer in transfers {
            let key =
                encode_transfer_key(transfer.block_number, transfer.transaction_hash, transfer.log_index);
            let record = TransferRecord::from_transfer(transfer, block);
            let value =
                postcard::to_allocvec(&record).context("Failed to serialize token transfer")?;
            batch.put_cf(transfers_cf, key, value);
        }

        let new_cursor = cursor.map_or(block.number, |c| c.max(block.number));
        batch.put_cf(sync_cf, encode_meta_key(CURSOR_META_ID), new_cursor.to_be_bytes());

        self.db
            .write(batch)
            .with_context(|| format!("Failed to write block {}", block.number))?;
        Ok(())
    }

    fn seed_cursor(&self, block: u64) -> Result<()> {
        if let Some(cursor) = self.read_cursor()? {
            if block < cursor {
                anyhow::bail!(
                    "Refusing to move sync cursor backwards from {} to {}",
                    cursor,
                    block
                );
            }
        }
        self.put_cursor(block)
    }

    fn get_block(&self, number: u64) -> Result<Option<BlockRecord>> {
        let cf = self.get_cf(CF_BLOCKS)?;
        match self
            .db
            .get_cf(cf, encode_block_key(number))
            .context("Failed to get block")?
        {
            Some(bytes) => {
                let record =
                    postcard::from_bytes(&bytes).context("Failed to deserialize block record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn get_transaction(&self, hash: B256) -> Result<Option<TransactionRecord>> {
        let cf = self.get_cf(CF_TRANSACTIONS)?;
        match self
            .db
            .get_cf(cf, encode_transaction_key(hash))
            .context("Failed to get transaction")?
        {
            Some(bytes) => {
                let record = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize transaction record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn transfers_in_block(&self, number: u64) -> Result<Vec<TransferRecord>> {
        let cf = self.get_cf(CF_TOKEN_TRANSFERS)?;
        let prefix = encode_transfer_block_prefix(number);

        let mut transfers = Vec::new();
        let iter = self.db.iterator_cf(
            cf,
            rocksdb::IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;

            // Stop once we've left this block's key range
            if !key.starts_with(&prefix) {
                break;
            }

            decode_transfer_key(&key).context("Failed to decode transfer key")?;
            let record: TransferRecord =
                postcard::from_bytes(&value).context("Failed to deserialize token transfer")?;
            transfers.push(record);
        }

        Ok(transfers)
    }
}
