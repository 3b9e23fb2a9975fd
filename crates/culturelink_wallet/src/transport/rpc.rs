//! JSON-RPC 2.0 over HTTP, the generic network provider behind read bindings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{RpcProvider, TransportError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<TransportError>,
}

/// A node endpoint reached with HTTP POSTs.
#[derive(Debug)]
pub struct JsonRpcClient {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Turn a decoded JSON-RPC envelope into the call result.
fn into_result(response: RpcResponse) -> Result<Value, TransportError> {
    if let Some(err) = response.error {
        return Err(err);
    }
    // A `null` result is legitimate (e.g. a receipt that does not exist yet).
    Ok(response.result.unwrap_or(Value::Null))
}

#[async_trait]
impl RpcProvider for JsonRpcClient {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(url = %self.url, method, id, "json-rpc request");

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::internal(format!("{method} request failed: {e}")))?;

        let status = response.status();
        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::internal(format!("{method} response decode failed: {e}")))?;

        // Nodes often pair a 4xx/5xx status with a proper error object; prefer it.
        if !status.is_success() && body.error.is_none() {
            return Err(TransportError::internal(format!(
                "{method} returned HTTP {status}"
            )));
        }
        into_result(body)
    }
}
