//! EIP-1193 wallet reached through an HTTP bridge.
//!
//! The bridge forwards `request` calls to a real wallet. HTTP cannot push, so
//! the proxy polls `eth_accounts` / `eth_chainId` and turns differences into
//! wallet events, in that order.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::rpc::JsonRpcClient;
use super::{
    EventHub, RpcProvider, Subscription, TransportError, WalletConnector, WalletEvent,
    WalletTransport, parse_accounts,
};
use crate::networks::parse_chain_id;

#[derive(Debug, Clone, PartialEq, Eq)]
struct WalletSnapshot {
    accounts: Vec<String>,
    chain_id: u64,
}

/// Events implied by moving from `prev` to `next`. Accounts come first so a
/// listener never sees the new chain with the old account list.
fn diff_snapshots(prev: &WalletSnapshot, next: &WalletSnapshot) -> Vec<WalletEvent> {
    let mut events = Vec::new();
    if prev.accounts != next.accounts {
        events.push(WalletEvent::AccountsChanged(next.accounts.clone()));
    }
    if prev.chain_id != next.chain_id {
        events.push(WalletEvent::ChainChanged(next.chain_id));
    }
    events
}

pub struct HttpWalletProxy {
    rpc: JsonRpcClient,
    hub: EventHub,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HttpWalletProxy {
    /// Create the proxy and start its event poller on the current runtime.
    pub fn start(
        url: impl Into<String>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Arc<Self>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| TransportError::internal("wallet proxy needs a tokio runtime"))?;
        let proxy = Arc::new(Self {
            rpc: JsonRpcClient::with_timeout(url, timeout)?,
            hub: EventHub::new(),
            poller: Mutex::new(None),
        });
        let handle = runtime.spawn(poll_loop(Arc::downgrade(&proxy), poll_interval));
        *proxy.poller.lock() = Some(handle);
        info!(url = %proxy.rpc.url(), "wallet proxy started");
        Ok(proxy)
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }

    async fn read_snapshot(&self) -> Result<WalletSnapshot, TransportError> {
        let accounts = parse_accounts(&self.rpc.request("eth_accounts", json!([])).await?)?;
        let raw_chain = self.rpc.request("eth_chainId", json!([])).await?;
        let chain_id = parse_chain_id(&raw_chain)
            .ok_or_else(|| TransportError::internal(format!("invalid chain id: {raw_chain}")))?;
        Ok(WalletSnapshot { accounts, chain_id })
    }
}

impl Drop for HttpWalletProxy {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
    }
}

async fn poll_loop(weak: Weak<HttpWalletProxy>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last: Option<WalletSnapshot> = None;

    loop {
        ticker.tick().await;
        let Some(proxy) = weak.upgrade() else {
            break;
        };
        match proxy.read_snapshot().await {
            Ok(snapshot) => {
                if let Some(prev) = &last {
                    for event in diff_snapshots(prev, &snapshot) {
                        debug!(?event, "wallet proxy event");
                        proxy.hub.emit(event);
                    }
                }
                last = Some(snapshot);
            }
            Err(e) => {
                if last.take().is_some() {
                    warn!(url = %proxy.url(), "wallet proxy unreachable: {e}");
                    proxy.hub.emit(WalletEvent::Disconnected(e));
                }
            }
        }
    }
}

#[async_trait]
impl RpcProvider for HttpWalletProxy {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.rpc.request(method, params).await
    }
}

impl WalletTransport for HttpWalletProxy {
    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }
}

/// Detects a wallet bridge by asking it for its chain id.
#[derive(Debug, Clone)]
pub struct ProxyConnector {
    url: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl ProxyConnector {
    pub fn new(url: impl Into<String>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl WalletConnector for ProxyConnector {
    async fn detect(&self) -> Option<Arc<dyn WalletTransport>> {
        let proxy = match HttpWalletProxy::start(&self.url, self.timeout, self.poll_interval) {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!(url = %self.url, "cannot start wallet proxy: {e}");
                return None;
            }
        };
        match proxy.request("eth_chainId", json!([])).await {
            Ok(_) => Some(proxy as Arc<dyn WalletTransport>),
            Err(e) => {
                debug!(url = %self.url, "no wallet behind proxy: {e}");
                None
            }
        }
    }
}
