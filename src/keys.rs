//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Numbers are big-endian so keys sort by block in RocksDB.

use alloy_primitives::B256;

/// Meta id of the sync cursor in the `sync_info` column family.
pub const CURSOR_META_ID: u8 = 0x01;

/// Encode a block key.
///
/// Format: byte 'B' (0x42) + block_number (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_block_key(block: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'B');
    key.extend_from_slice(&block.to_be_bytes());
    key
}

/// Encode a transaction key.
///
/// Format: byte 'T' (0x54) + tx_hash (32 bytes)
/// Total length: 33 bytes
pub fn encode_transaction_key(tx_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b'T');
    key.extend_from_slice(tx_hash.as_slice());
    key
}

/// Encode a token transfer key.
///
/// Format: byte 'X' (0x58) + block_number (8 bytes, big-endian) + tx_hash (32 bytes)
///         + log_index (8 bytes, big-endian)
/// Total length: 49 bytes
///
/// A transaction belongs to exactly one block, so the key is unique per
/// (tx_hash, log_index). The block prefix groups a block's transfers together.
pub fn encode_transfer_key(block: u64, tx_hash: B256, log_index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(49);
    key.push(b'X');
    key.extend_from_slice(&block.to_be_bytes());
    key.extend_from_slice(tx_hash.as_slice());
    key.extend_from_slice(&log_index.to_be_bytes());
    key
}

/// Prefix shared by every transfer key of a block.
pub fn encode_transfer_block_prefix(block: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'X');
    key.extend_from_slice(&block.to_be_bytes());
    key
}

/// Decode a token transfer key into (block, tx_hash, log_index).
pub fn decode_transfer_key(key: &[u8]) -> Option<(u64, B256, u64)> {
    if key.len() != 49 || key[0] != b'X' {
        return None;
    }
    let block = u64::from_be_bytes(key[1..9].try_into().ok()?);
    let tx_hash = B256::from_slice(&key[9..41]);
    let log_index = u64::from_be_bytes(key[41..49].try_into().ok()?);
    Some((block, tx_hash, log_index))
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
///
/// Meta IDs:
/// - 0x01: sync cursor
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}
