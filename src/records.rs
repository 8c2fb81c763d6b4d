//! Record types for ingested chain data
//!
//! These structs represent the rows written to the store.
//! They use postcard for binary serialization, which is compact and deterministic.

use crate::types::{Block, Transaction};
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Summary of an ingested block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    /// Unix epoch seconds
    pub timestamp: u64,
    /// Transaction hashes in block order
    pub transactions: Vec<B256>,
}

impl From<&Block> for BlockRecord {
    fn from(block: &Block) -> Self {
        Self {
            number: block.number,
            hash: block.hash,
            parent_hash: block.parent_hash,
            timestamp: block.timestamp,
            transactions: block.transactions.iter().map(|tx| tx.hash).collect(),
        }
    }
}

/// A transaction row, keyed by its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: B256,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub from: Address,
    /// None for contract creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: U256,
    pub gas: u64,
    pub gas_price: Option<U256>,
}

impl TransactionRecord {
    pub fn from_transaction(tx: &Transaction, block: &Block) -> Self {
        Self {
            hash: tx.hash,
            block_number: block.number,
            block_timestamp: block.timestamp,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            gas: tx.gas,
            gas_price: tx.gas_price,
        }
    }
}

/// An ERC20 `Transfer` event decoded from a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    /// Contract that emitted the event
    pub token: Address,
    pub from: Address,
    pub to: Address,
    /// Raw amount in the token's smallest unit
    pub amount: U256,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

/// A stored token transfer, stamped with the time of its block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer: TokenTransfer,
    /// Unix epoch seconds
    pub block_timestamp: u64,
}

impl TransferRecord {
    pub fn from_transfer(transfer: &TokenTransfer, block: &Block) -> Self {
        Self {
            transfer: transfer.clone(),
            block_timestamp: block.timestamp,
        }
    }
}
