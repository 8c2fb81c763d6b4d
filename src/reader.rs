//! Typed chain queries on top of the JSON-RPC client
//!
//! `ChainReader` is the seam the synchronizer depends on. The RPC-backed
//! implementation maps transport and decoding failures onto `SyncError`.

use crate::error::{BlockRef, SyncError};
use crate::rpc::{RpcClient, RpcError, RpcRequest};
use crate::types::{format_hex_u64, parse_hex_u64, Block, Log, Transaction};
use alloy_primitives::B256;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Read-only view of the chain used by the synchronizer.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head height.
    async fn latest_block_number(&self) -> Result<u64, SyncError>;

    /// Block with full transactions. `BlockNotFound` if the node has no such block yet.
    async fn block_by_number(&self, number: u64) -> Result<Block, SyncError>;

    /// Block with full transactions, looked up by hash.
    async fn block_by_hash(&self, hash: B256) -> Result<Block, SyncError>;

    /// All logs emitted in `from..=to`. Empty when nothing matches.
    async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<Log>, SyncError>;
}

fn args_string(params: &[Value]) -> String {
    params
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map an RPC failure onto the sync taxonomy, keeping the request for context.
fn map_rpc_error(err: RpcError, request: &RpcRequest) -> SyncError {
    match err {
        RpcError::Transport { method, reason } => SyncError::RemoteUnavailable { method, reason },
        RpcError::Node {
            method,
            code,
            message,
        } => SyncError::RemoteUnavailable {
            method,
            reason: format!("node error {}: {}", code, message),
        },
        RpcError::Malformed { method, reason } => SyncError::MalformedResponse {
            method,
            args: args_string(&request.params),
            reason,
        },
    }
}

fn block_by_number_request(number: u64) -> RpcRequest {
    RpcRequest::new(
        "eth_getBlockByNumber",
        vec![json!(format_hex_u64(number)), json!(true)],
    )
}

fn logs_request(from: u64, to: u64) -> RpcRequest {
    RpcRequest::new(
        "eth_getLogs",
        vec![json!({
            "fromBlock": format_hex_u64(from),
            "toBlock": format_hex_u64(to),
        })],
    )
}

fn transaction_request(hash: B256) -> RpcRequest {
    RpcRequest::new("eth_getTransactionByHash", vec![json!(format!("0x{:x}", hash))])
}

#[async_trait]
impl ChainReader for RpcClient {
    async fn latest_block_number(&self) -> Result<u64, SyncError> {
        let request = RpcRequest::new("eth_blockNumber", Vec::new());
        let raw: String = self
            .call(&request)
            .await
            .map_err(|e| map_rpc_error(e, &request))?;
        parse_hex_u64(&raw).map_err(|reason| SyncError::MalformedResponse {
            method: request.method.clone(),
            args: String::new(),
            reason,
        })
    }

    async fn block_by_number(&self, number: u64) -> Result<Block, SyncError> {
        let request = block_by_number_request(number);
        let block: Option<Block> = self
            .call(&request)
            .await
            .map_err(|e| map_rpc_error(e, &request))?;
        block.ok_or(SyncError::BlockNotFound(BlockRef::Number(number)))
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Block, SyncError> {
        let request = RpcRequest::new(
            "eth_getBlockByHash",
            vec![json!(format!("0x{:x}", hash)), json!(true)],
        );
        let block: Option<Block> = self
            .call(&request)
            .await
            .map_err(|e| map_rpc_error(e, &request))?;
        block.ok_or(SyncError::BlockNotFound(BlockRef::Hash(hash)))
    }

    async fn logs_in_range(&self, from: u64, to: u64) -> Result<Vec<Log>, SyncError> {
        let request = logs_request(from, to);
        let logs: Option<Vec<Log>> = self
            .call(&request)
            .await
            .map_err(|e| map_rpc_error(e, &request))?;
        Ok(logs.unwrap_or_default())
    }
}

impl RpcClient {
    /// Fetch logs for several block ranges in one batch.
    ///
    /// Each range gets its own outcome, in input order.
    pub async fn logs_for_ranges(
        &self,
        ranges: &[(u64, u64)],
    ) -> Result<Vec<Result<Vec<Log>, SyncError>>, SyncError> {
        let requests: Vec<RpcRequest> = ranges
            .iter()
            .map(|&(from, to)| logs_request(from, to))
            .collect();
        let results = self
            .batch::<Option<Vec<Log>>>(&requests)
            .await
            .map_err(|e| map_rpc_error(e, &requests[0]))?;

        Ok(results
            .into_iter()
            .zip(&requests)
            .map(|(result, request)| {
                result
                    .map(Option::unwrap_or_default)
                    .map_err(|e| map_rpc_error(e, request))
            })
            .collect())
    }

    /// Fetch several transactions by hash in one batch.
    ///
    /// A hash the node does not know is reported as a malformed response for that item.
    pub async fn transactions_by_hash(
        &self,
        hashes: &[B256],
    ) -> Result<Vec<Result<Transaction, SyncError>>, SyncError> {
        let requests: Vec<RpcRequest> = hashes.iter().map(|&h| transaction_request(h)).collect();
        let results = self
            .batch::<Option<Transaction>>(&requests)
            .await
            .map_err(|e| map_rpc_error(e, &requests[0]))?;

        Ok(results
            .into_iter()
            .zip(&requests)
            .map(|(result, request)| match result {
                Ok(Some(tx)) => Ok(tx),
                Ok(None) => Err(SyncError::MalformedResponse {
                    method: request.method.clone(),
                    args: args_string(&request.params),
                    reason: "transaction not found".to_string(),
                }),
                Err(e) => Err(map_rpc_error(e, request)),
            })
            .collect())
    }
}
