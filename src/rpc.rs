//! JSON-RPC client for Ethereum nodes
//!
//! Issues single calls and batched calls over HTTP. A batch goes out as one
//! JSON array and each element comes back with its own outcome, so one failed
//! call never spoils the results of its neighbours.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors produced by the JSON-RPC layer.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection, timeout, or HTTP-level failure. Affects every call in flight.
    #[error("transport failure calling {method}: {reason}")]
    Transport { method: String, reason: String },

    /// The node answered this call with a JSON-RPC error object.
    #[error("node error {code} from {method}: {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
    },

    /// The response could not be decoded into the requested shape.
    #[error("malformed response from {method}: {reason}")]
    Malformed { method: String, reason: String },
}

impl RpcError {
    fn transport(method: &str, err: reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        };
        RpcError::Transport {
            method: method.to_string(),
            reason,
        }
    }

    fn malformed(method: &str, reason: impl Into<String>) -> Self {
        RpcError::Malformed {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// A method name plus positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcEnvelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

impl<'a> JsonRpcEnvelope<'a> {
    fn new(id: u64, request: &'a RpcRequest) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: &request.method,
            params: &request.params,
        }
    }
}

/// JSON-RPC client for Ethereum nodes.
#[derive(Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client. Every request is bounded by `timeout`.
    pub fn new(url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client, url })
    }

    /// URL of the node this client talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make a single JSON-RPC call and decode its result.
    pub async fn call<T: DeserializeOwned>(&self, request: &RpcRequest) -> Result<T, RpcError> {
        let method = request.method.as_str();
        let body = self.post(method, &JsonRpcEnvelope::new(1, request)).await?;
        decode_response(method, body)
    }

    /// Make several JSON-RPC calls in one round trip.
    ///
    /// The outer error means the whole batch failed in transport. Otherwise the
    /// returned vector has one entry per request, in request order.
    pub async fn batch<T: DeserializeOwned>(
        &self,
        requests: &[RpcRequest],
    ) -> Result<Vec<Result<T, RpcError>>, RpcError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let envelopes: Vec<JsonRpcEnvelope<'_>> = requests
            .iter()
            .enumerate()
            .map(|(i, request)| JsonRpcEnvelope::new(i as u64, request))
            .collect();

        debug!(size = requests.len(), method = %requests[0].method, "Sending RPC batch");
        let body = self.post(&requests[0].method, &envelopes).await?;

        let responses = match body {
            Value::Array(items) => items,
            // Some nodes reject a whole batch with a single error object.
            other if other.get("error").is_some() => {
                return Ok(requests
                    .iter()
                    .map(|r| decode_response(&r.method, other.clone()))
                    .collect());
            }
            _ => {
                return Ok(requests
                    .iter()
                    .map(|r| Err(RpcError::malformed(&r.method, "batch response is not an array")))
                    .collect());
            }
        };

        let mut by_id: HashMap<u64, Value> = HashMap::with_capacity(responses.len());
        for response in responses {
            match response.get("id").and_then(Value::as_u64) {
                Some(id) => {
                    by_id.insert(id, response);
                }
                None => debug!("Dropping batch response element without numeric id"),
            }
        }

        Ok(requests
            .iter()
            .enumerate()
            .map(|(i, request)| match by_id.remove(&(i as u64)) {
                Some(response) => decode_response(&request.method, response),
                None => Err(RpcError::malformed(
                    &request.method,
                    "no response for this call in the batch",
                )),
            })
            .collect())
    }

    async fn post<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::transport(method, e))?;

        let response = response
            .error_for_status()
            .map_err(|e| RpcError::transport(method, e))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| RpcError::malformed(method, format!("response is not JSON: {}", e)))
    }
}

/// Turn one JSON-RPC response object into a typed result or a per-call error.
fn decode_response<T: DeserializeOwned>(method: &str, response: Value) -> Result<T, RpcError> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(RpcError::Node {
            method: method.to_string(),
            code,
            message,
        });
    }

    let result = match response {
        Value::Object(mut map) => map
            .remove("result")
            .ok_or_else(|| RpcError::malformed(method, "response missing 'result' field"))?,
        _ => return Err(RpcError::malformed(method, "response is not an object")),
    };

    serde_json::from_value(result).map_err(|e| RpcError::malformed(method, e.to_string()))
}
