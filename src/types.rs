//! Ethereum JSON-RPC types
//!
//! Type definitions for blocks, transactions, and logs
//! returned from Ethereum JSON-RPC endpoints.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Deserializer};

/// Ethereum block with full transaction details.
#[derive(Debug, Clone, Deserialize)]
pub struct Block {
    /// Block number (hex string in JSON, parsed to u64)
    #[serde(rename = "number", deserialize_with = "deserialize_hex_u64")]
    pub number: u64,

    /// Block hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Parent block hash (hex string in JSON)
    #[serde(rename = "parentHash", deserialize_with = "deserialize_hex_b256")]
    pub parent_hash: B256,

    /// Block timestamp in Unix seconds (hex string in JSON)
    #[serde(rename = "timestamp", deserialize_with = "deserialize_hex_u64")]
    pub timestamp: u64,

    /// Transactions in block order. Requires the full-transaction flag on the request.
    #[serde(rename = "transactions")]
    pub transactions: Vec<Transaction>,
}

/// Ethereum transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    /// Transaction hash (hex string in JSON)
    #[serde(rename = "hash", deserialize_with = "deserialize_hex_b256")]
    pub hash: B256,

    /// Sender address (hex string in JSON)
    #[serde(rename = "from", deserialize_with = "deserialize_hex_address")]
    pub from: Address,

    /// Recipient address (None for contract creation, hex string in JSON)
    #[serde(rename = "to", default, deserialize_with = "deserialize_hex_address_opt")]
    pub to: Option<Address>,

    /// Value transferred in wei (hex string in JSON)
    #[serde(rename = "value", deserialize_with = "deserialize_hex_u256")]
    pub value: U256,

    /// Gas limit (hex string in JSON)
    #[serde(rename = "gas", deserialize_with = "deserialize_hex_u64")]
    pub gas: u64,

    /// Gas price (hex string in JSON, omitted by some clients for typed transactions)
    #[serde(rename = "gasPrice", default, deserialize_with = "deserialize_hex_u256_opt")]
    pub gas_price: Option<U256>,
}

/// Log entry emitted by a contract during transaction execution.
///
/// Topics and data stay as raw hex strings. A malformed topic or payload is a
/// problem with that one log, decided later by the extractor, not a reason to
/// reject the whole `eth_getLogs` response.
#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    /// Address of the contract that emitted the log
    #[serde(rename = "address", deserialize_with = "deserialize_hex_address")]
    pub address: Address,

    /// Indexed topics (topic0 = event signature, topics[1..] = indexed params)
    #[serde(rename = "topics")]
    pub topics: Vec<String>,

    /// Non-indexed event data (hex string)
    #[serde(rename = "data", default)]
    pub data: String,

    /// Hash of the transaction that emitted the log
    #[serde(rename = "transactionHash", deserialize_with = "deserialize_hex_b256")]
    pub transaction_hash: B256,

    /// Number of the block containing the log
    #[serde(rename = "blockNumber", deserialize_with = "deserialize_hex_u64")]
    pub block_number: u64,

    /// Position of the log within the block
    #[serde(rename = "logIndex", deserialize_with = "deserialize_hex_u64")]
    pub log_index: u64,
}

// Hex parsing helpers

/// Pad an odd-length hex string with a leading zero.
/// This handles cases where RPC returns hex strings without leading zeros.
fn pad_hex_string(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s.to_string()
    }
}

/// Parse a `0x`-prefixed quantity into a u64.
///
/// Used for bare quantities such as the `eth_blockNumber` result.
pub fn parse_hex_u64(s: &str) -> Result<u64, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Err(format!("empty hex quantity {:?}", s));
    }
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex quantity {:?}: {}", s, e))
}

/// Format a block number the way JSON-RPC expects it.
pub fn format_hex_u64(value: u64) -> String {
    format!("0x{:x}", value)
}

fn deserialize_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_hex_u64(&s).map_err(serde::de::Error::custom)
}

fn deserialize_hex_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    if s.is_empty() {
        return Ok(U256::ZERO);
    }
    let bytes = hex::decode(pad_hex_string(s)).map_err(serde::de::Error::custom)?;
    if bytes.len() > 32 {
        return Err(serde::de::Error::custom(format!(
            "Quantity does not fit in 256 bits ({} bytes)",
            bytes.len()
        )));
    }
    Ok(U256::from_be_slice(&bytes))
}

fn deserialize_hex_u256_opt<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_hex_u256")] U256);

    let v = Option::<Wrapper>::deserialize(deserializer)?;
    Ok(v.map(|Wrapper(value)| value))
}

fn deserialize_hex_b256<'de, D>(deserializer: D) -> Result<B256, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 32 {
        return Err(serde::de::Error::custom(format!(
            "Expected 32 bytes for hash, got {}",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

fn deserialize_hex_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let s = s.strip_prefix("0x").unwrap_or(&s);
    let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
    if bytes.len() != 20 {
        return Err(serde::de::Error::custom(format!(
            "Expected 20 bytes for address, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

fn deserialize_hex_address_opt<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    match s {
        Some(s) => {
            let s = s.strip_prefix("0x").unwrap_or(&s);
            if s.is_empty() {
                return Ok(None);
            }
            let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
            if bytes.len() != 20 {
                return Err(serde::de::Error::custom(format!(
                    "Expected 20 bytes for address, got {}",
                    bytes.len()
                )));
            }
            Ok(Some(Address::from_slice(&bytes)))
        }
        None => Ok(None),
    }
}
