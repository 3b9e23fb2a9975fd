//! Wallet transport abstraction.
//!
//! A transport speaks EIP-1193: JSON-RPC style `request(method, params)` plus
//! pushed notifications (accounts changed, chain changed, disconnect). The
//! rest of the crate only sees these traits.

pub mod events;
pub mod memory;
pub mod proxy;
pub mod rpc;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use events::{EventHub, Subscription, WalletEvent};

/// EIP-1193 and JSON-RPC error codes the core reacts to.
pub mod codes {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;

    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_ERROR: i64 = -32000;
    pub const EXECUTION_ERROR: i64 = 3;
}

/// Error object returned by a transport, shaped like an EIP-1193
/// `ProviderRpcError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TransportError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request.")
    }

    pub fn unrecognized_chain(chain_id: u64) -> Self {
        Self::new(
            codes::UNRECOGNIZED_CHAIN,
            format!("Unrecognized chain ID {chain_id:#x}. Try adding the chain first."),
        )
    }

    pub fn unsupported_method(method: &str) -> Self {
        Self::new(
            codes::UNSUPPORTED_METHOD,
            format!("The provider does not support {method}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

/// Decode an `eth_accounts` / `eth_requestAccounts` result.
pub fn parse_accounts(value: &Value) -> Result<Vec<String>, TransportError> {
    let items = value
        .as_array()
        .ok_or_else(|| TransportError::internal("accounts result must be an array"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| TransportError::internal("account entries must be strings"))
        })
        .collect()
}

/// Anything that answers JSON-RPC requests: a node endpoint or a wallet.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;
}

/// A wallet transport: an [`RpcProvider`] that can also sign and push events.
pub trait WalletTransport: RpcProvider {
    /// Register a listener. Dropping the returned handle unsubscribes.
    fn subscribe(&self) -> Subscription;
}

/// Finds the wallet transport in the execution environment.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// `None` when no compatible wallet is present.
    async fn detect(&self) -> Option<Arc<dyn WalletTransport>>;
}

/// Connector for environments without any wallet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWallet;

#[async_trait]
impl WalletConnector for NoWallet {
    async fn detect(&self) -> Option<Arc<dyn WalletTransport>> {
        None
    }
}

/// Exposes a wallet transport through the plain [`RpcProvider`] interface.
#[derive(Clone)]
pub struct TransportProvider(pub Arc<dyn WalletTransport>);

#[async_trait]
impl RpcProvider for TransportProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.0.request(method, params).await
    }
}

/// Wrap a wallet transport so it can be used where a read provider is expected.
pub fn provider_of(transport: Arc<dyn WalletTransport>) -> Arc<dyn RpcProvider> {
    Arc::new(TransportProvider(transport))
}
