//! ERC20 Transfer event extraction
//!
//! Turns a raw log into a `TokenTransfer` when it is a standard
//! `Transfer(address indexed, address indexed, uint256)` event.

use crate::error::{ExtractionError, ExtractionErrorKind};
use crate::records::TokenTransfer;
use crate::types::Log;
use alloy_primitives::{b256, Address, B256, U256};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Decode a Transfer log.
///
/// Returns `Ok(None)` for logs that are not a 3-topic Transfer event. A log
/// that is one but cannot be decoded is an error; the amount never falls
/// back to zero.
pub fn extract_transfer(log: &Log) -> Result<Option<TokenTransfer>, ExtractionError> {
    if log.topics.len() != 3 {
        return Ok(None);
    }
    match parse_word(&log.topics[0]) {
        Some(topic0) if topic0 == TRANSFER_TOPIC => {}
        _ => return Ok(None),
    }

    let fail = |kind| ExtractionError {
        transaction_hash: log.transaction_hash,
        block_number: log.block_number,
        log_index: log.log_index,
        kind,
    };

    let from = address_from_topic(&log.topics[1])
        .ok_or_else(|| fail(ExtractionErrorKind::MalformedTopic { index: 1 }))?;
    let to = address_from_topic(&log.topics[2])
        .ok_or_else(|| fail(ExtractionErrorKind::MalformedTopic { index: 2 }))?;
    let amount = decode_amount(&log.data).map_err(fail)?;

    Ok(Some(TokenTransfer {
        token: log.address,
        from,
        to,
        amount,
        transaction_hash: log.transaction_hash,
        block_number: log.block_number,
        log_index: log.log_index,
    }))
}

/// Parse a 32-byte topic word (64 hex chars, optional 0x prefix).
fn parse_word(topic: &str) -> Option<B256> {
    let digits = topic.strip_prefix("0x").unwrap_or(topic);
    if digits.len() != 64 {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    Some(B256::from_slice(&bytes))
}

/// The address is the low 20 bytes of a left-padded topic word.
fn address_from_topic(topic: &str) -> Option<Address> {
    let word = parse_word(topic)?;
    Some(Address::from_slice(&word.as_slice()[12..]))
}

fn decode_amount(data: &str) -> Result<U256, ExtractionErrorKind> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    let bytes =
        hex::decode(digits).map_err(|e| ExtractionErrorKind::MalformedData(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ExtractionErrorKind::DataLength { len: bytes.len() });
    }
    Ok(U256::from_be_slice(&bytes))
}
