//! Listener registry for wallet-originated notifications.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::TransportError;

/// Notification pushed by the wallet.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletEvent {
    /// The set of exposed accounts changed. Empty means the wallet locked or
    /// revoked access.
    AccountsChanged(Vec<String>),
    ChainChanged(u64),
    /// The wallet lost its connection to every chain.
    Disconnected(TransportError),
}

#[derive(Debug, Default)]
struct HubInner {
    next_id: u64,
    listeners: BTreeMap<u64, mpsc::UnboundedSender<WalletEvent>>,
}

/// Fan-out of wallet events to every live [`Subscription`].
///
/// Each listener has its own unbounded queue, so events reach every listener
/// in emission order and a slow listener never blocks the wallet.
#[derive(Debug, Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.listeners.insert(id, tx);
        trace!(listener = id, total = inner.listeners.len(), "wallet listener added");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    pub fn emit(&self, event: WalletEvent) {
        let mut inner = self.inner.lock();
        // A send only fails when the receiver is gone without unsubscribing.
        inner
            .listeners
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

/// Handle for one registered listener. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<WalletEvent>,
    hub: Weak<Mutex<HubInner>>,
}

impl Subscription {
    /// Next event, or `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<WalletEvent> {
        self.rx.recv().await
    }

    /// Non-blocking poll, used by tests.
    pub fn try_next(&mut self) -> Option<WalletEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut inner = hub.lock();
            inner.listeners.remove(&self.id);
            trace!(listener = self.id, total = inner.listeners.len(), "wallet listener removed");
        }
    }
}
