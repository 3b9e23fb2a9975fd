//! Wallet session manager: the one logical connection to the user's wallet.
//!
//! The manager is the only writer of session state. It reacts to its own API
//! calls and to events pushed by the transport, and publishes immutable
//! [`WalletSession`] snapshots to any number of readers through a `watch`
//! channel.
//!
//! Every connect attempt gets an attempt number. `disconnect()` (and every
//! other reset) bumps it, so a wallet approval that arrives after the user
//! already gave up is recognised as stale and thrown away.
//!
//! The session epoch is bumped whenever the account, the chain or the
//! connection itself changes. Contract bindings remember the epoch they were
//! issued at and refuse to send once it moved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use culturelink_core::{Locale, ReconnectFlag};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::classify::{is_unrecognized_chain, is_user_rejection};
use crate::error::WalletError;
use crate::format::{Account, parse_quantity};
use crate::networks::{NetworkRegistry, parse_chain_id, to_hex_chain_id};
use crate::transport::{
    Subscription, TransportError, WalletConnector, WalletEvent, WalletTransport, parse_accounts,
};

/// Connection state of the wallet session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    /// Waiting for the wallet (and possibly the user) to answer.
    Connecting,
    Connected,
    /// The last attempt failed for a reason other than the user saying no.
    /// Like `Disconnected`, there is no account and no chain.
    Error(String),
}

/// Snapshot of the session as seen by readers.
///
/// Fields are private so the invariants hold by construction: `account` and
/// `chain_id` are set together, and only in the `Connected` state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSession {
    state: ConnectionState,
    account: Option<Account>,
    chain_id: Option<u64>,
    balance_wei: Option<u128>,
}

impl WalletSession {
    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            account: None,
            chain_id: None,
            balance_wei: None,
        }
    }

    pub fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            ..Self::disconnected()
        }
    }

    pub fn connected(account: Account, chain_id: u64) -> Self {
        Self {
            state: ConnectionState::Connected,
            account: Some(account),
            chain_id: Some(chain_id),
            balance_wei: None,
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Error(message.into()),
            ..Self::disconnected()
        }
    }

    /// Attach a balance. Ignored unless connected.
    pub fn with_balance(mut self, balance_wei: u128) -> Self {
        if self.is_connected() {
            self.balance_wei = Some(balance_wei);
        }
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn balance_wei(&self) -> Option<u128> {
        self.balance_wei
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

impl Default for WalletSession {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Token remembering the session epoch at the time it was taken.
#[derive(Debug, Clone)]
pub struct SessionGuard {
    epoch: Arc<AtomicU64>,
    issued: u64,
}

impl SessionGuard {
    /// `false` once the account, chain or connection changed.
    pub fn is_current(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.issued
    }

    pub fn issued_at(&self) -> u64 {
        self.issued
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    /// `eth_requestAccounts`: may open the wallet's approval prompt.
    Prompt,
    /// `eth_accounts`: only already-authorized accounts, never prompts.
    Silent,
}

type ConnectFuture = Shared<BoxFuture<'static, Result<Account, WalletError>>>;

struct Established {
    transport: Arc<dyn WalletTransport>,
    subscription: Subscription,
    account: Account,
    chain_id: u64,
}

enum EventOutcome {
    Continue,
    RefreshBalance,
    Stop,
}

struct Core {
    session: WalletSession,
    transport: Option<Arc<dyn WalletTransport>>,
    attempt: u64,
    inflight: Option<(ConnectMode, ConnectFuture)>,
    attempt_task: Option<AbortHandle>,
    listener: Option<JoinHandle<()>>,
    locale: Locale,
}

struct Inner {
    connector: Arc<dyn WalletConnector>,
    networks: NetworkRegistry,
    flag: Arc<dyn ReconnectFlag>,
    core: Mutex<Core>,
    updates: watch::Sender<WalletSession>,
    epoch: Arc<AtomicU64>,
}

/// Owns the wallet session. Construct one at startup and hand out references
/// (or an `Arc`) to the contract layer and the UI.
pub struct WalletSessionManager {
    inner: Arc<Inner>,
}

impl WalletSessionManager {
    pub fn new(
        connector: Arc<dyn WalletConnector>,
        networks: NetworkRegistry,
        flag: Arc<dyn ReconnectFlag>,
    ) -> Self {
        let (updates, _) = watch::channel(WalletSession::disconnected());
        Self {
            inner: Arc::new(Inner {
                connector,
                networks,
                flag,
                core: Mutex::new(Core {
                    session: WalletSession::disconnected(),
                    transport: None,
                    attempt: 0,
                    inflight: None,
                    attempt_task: None,
                    listener: None,
                    locale: Locale::default(),
                }),
                updates,
                epoch: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Language of the message carried by `ConnectionState::Error`.
    pub fn with_locale(self, locale: Locale) -> Self {
        self.inner.core.lock().locale = locale;
        self
    }

    /// Current session snapshot.
    pub fn snapshot(&self) -> WalletSession {
        self.inner.core.lock().session.clone()
    }

    /// Receive every new snapshot as it is published.
    pub fn subscribe(&self) -> watch::Receiver<WalletSession> {
        self.inner.updates.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().session.is_connected()
    }

    pub fn account(&self) -> Option<Account> {
        self.inner.core.lock().session.account().cloned()
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.inner.core.lock().session.chain_id()
    }

    /// Transport of the live connection, if any.
    pub fn transport(&self) -> Option<Arc<dyn WalletTransport>> {
        self.inner.core.lock().transport.clone()
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.inner.networks
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    pub fn guard(&self) -> SessionGuard {
        SessionGuard {
            epoch: Arc::clone(&self.inner.epoch),
            issued: self.epoch(),
        }
    }

    /// Ask the wallet for account access and connect.
    ///
    /// A second call while an attempt is in flight joins that attempt instead
    /// of opening another prompt. Calling it while connected returns the
    /// active account.
    pub async fn connect(&self) -> Result<Account, WalletError> {
        loop {
            let (mode, attempt) = {
                let mut core = self.inner.core.lock();
                if let Some(account) = core.session.account() {
                    return Ok(account.clone());
                }
                match &core.inflight {
                    Some((mode, fut)) => {
                        debug!(?mode, "joining in-flight connect attempt");
                        (*mode, fut.clone())
                    }
                    None => (
                        ConnectMode::Prompt,
                        self.inner.begin_attempt(&mut core, ConnectMode::Prompt),
                    ),
                }
            };

            let result = attempt.await;
            // A silent attempt finding nothing says nothing about what the
            // user would answer; ask them properly.
            if mode == ConnectMode::Silent && matches!(result, Err(WalletError::NotConnected)) {
                continue;
            }
            return result;
        }
    }

    /// Drop the connection. Always succeeds and is idempotent.
    pub fn disconnect(&self) {
        let mut core = self.inner.core.lock();
        if core.session == WalletSession::disconnected()
            && core.transport.is_none()
            && core.inflight.is_none()
        {
            return;
        }
        info!("wallet disconnected by user");
        self.inner.reset(&mut core);
        drop(core);
        self.inner.flag.set_connected(false);
    }

    /// Restore a previous session without prompting. Failures are logged and
    /// swallowed.
    pub async fn auto_reconnect(&self) {
        if !self.inner.flag.was_connected() {
            debug!("no previous wallet session, skipping auto-reconnect");
            return;
        }
        let attempt = {
            let mut core = self.inner.core.lock();
            if core.session.is_connected() || core.inflight.is_some() {
                return;
            }
            self.inner.begin_attempt(&mut core, ConnectMode::Silent)
        };

        match attempt.await {
            Ok(account) => info!(account = %account, "wallet session restored"),
            Err(WalletError::NotConnected) => {
                debug!("wallet has no authorized accounts, clearing reconnect flag");
                self.inner.flag.set_connected(false);
            }
            Err(e) => warn!("auto-reconnect failed: {e}"),
        }
    }

    /// Ask the wallet to switch networks, registering the network first when
    /// the wallet does not know it. The new chain id arrives through the
    /// chain-changed event.
    pub async fn switch_network(&self, target: u64) -> Result<(), WalletError> {
        let transport = match self.transport() {
            Some(transport) => transport,
            None => self
                .inner
                .connector
                .detect()
                .await
                .ok_or(WalletError::NoWalletAvailable)?,
        };

        let switch_params = json!([{ "chainId": to_hex_chain_id(target) }]);
        let first = transport
            .request("wallet_switchEthereumChain", switch_params.clone())
            .await;
        let err = match first {
            Ok(_) => {
                info!(chain_id = target, "network switch requested");
                return Ok(());
            }
            Err(err) => err,
        };
        if !is_unrecognized_chain(&err) {
            return Err(switch_failed(target, "switch", &err));
        }

        let config = self.inner.networks.get(target).ok_or_else(|| {
            WalletError::NetworkSwitchFailed(format!("no network configuration for chain {target}"))
        })?;
        info!(chain_id = target, name = %config.name, "wallet does not know network, adding it");
        transport
            .request("wallet_addEthereumChain", config.add_chain_params())
            .await
            .map_err(|e| switch_failed(target, "add", &e))?;
        transport
            .request("wallet_switchEthereumChain", switch_params)
            .await
            .map_err(|e| switch_failed(target, "switch retry", &e))?;
        info!(chain_id = target, "network added and switch requested");
        Ok(())
    }

    /// Re-read the native balance of the active account.
    pub async fn refresh_balance(&self) {
        let attempt = self.inner.core.lock().attempt;
        self.inner.refresh_balance_for(attempt).await;
    }
}

impl Drop for WalletSessionManager {
    fn drop(&mut self) {
        let mut core = self.inner.core.lock();
        if let Some(listener) = core.listener.take() {
            listener.abort();
        }
        if let Some(task) = core.attempt_task.take() {
            task.abort();
        }
        core.inflight = None;
        core.transport = None;
    }
}

fn switch_failed(target: u64, step: &str, err: &TransportError) -> WalletError {
    warn!(chain_id = target, step, code = err.code, "network switch failed: {}", err.message);
    if is_user_rejection(err) {
        WalletError::NetworkSwitchFailed("user rejected the network change".into())
    } else {
        WalletError::NetworkSwitchFailed(err.message.clone())
    }
}

fn connect_error(err: &TransportError) -> WalletError {
    if is_user_rejection(err) {
        WalletError::UserRejected
    } else {
        WalletError::Transport(err.to_string())
    }
}

impl Inner {
    fn publish(&self, core: &mut Core, next: WalletSession) {
        core.session = next.clone();
        self.updates.send_replace(next);
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start an attempt in a background task so that a caller dropping its
    /// future cannot leave the session stuck in `Connecting`.
    fn begin_attempt(self: &Arc<Self>, core: &mut Core, mode: ConnectMode) -> ConnectFuture {
        core.attempt += 1;
        let attempt = core.attempt;
        debug!(attempt, ?mode, "starting connect attempt");

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = inner.establish(mode).await;
            inner.finish_attempt(attempt, mode, result)
        });
        core.attempt_task = Some(task.abort_handle());

        let fut = async move {
            match task.await {
                Ok(result) => result,
                // Aborted by a reset: the attempt was given up.
                Err(e) if e.is_cancelled() => Err(WalletError::UserRejected),
                Err(e) => Err(WalletError::Transport(format!("connect task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        core.inflight = Some((mode, fut.clone()));
        self.publish(core, WalletSession::connecting());
        fut
    }

    async fn establish(&self, mode: ConnectMode) -> Result<Established, WalletError> {
        let transport = self
            .connector
            .detect()
            .await
            .ok_or(WalletError::NoWalletAvailable)?;

        // Subscribe before reading state so nothing emitted in between is lost.
        let subscription = transport.subscribe();

        let method = match mode {
            ConnectMode::Prompt => "eth_requestAccounts",
            ConnectMode::Silent => "eth_accounts",
        };
        let raw_accounts = transport
            .request(method, json!([]))
            .await
            .map_err(|e| connect_error(&e))?;
        let accounts = parse_accounts(&raw_accounts).map_err(|e| connect_error(&e))?;
        let account = match accounts.into_iter().next() {
            Some(first) => Account::new(first),
            None if mode == ConnectMode::Prompt => return Err(WalletError::UserRejected),
            None => return Err(WalletError::NotConnected),
        };

        let raw_chain = transport
            .request("eth_chainId", json!([]))
            .await
            .map_err(|e| connect_error(&e))?;
        let chain_id = parse_chain_id(&raw_chain)
            .ok_or_else(|| WalletError::Transport(format!("invalid chain id: {raw_chain}")))?;

        Ok(Established {
            transport,
            subscription,
            account,
            chain_id,
        })
    }

    fn finish_attempt(
        self: &Arc<Self>,
        attempt: u64,
        mode: ConnectMode,
        result: Result<Established, WalletError>,
    ) -> Result<Account, WalletError> {
        let mut core = self.core.lock();
        if core.attempt != attempt {
            debug!(attempt, current = core.attempt, "discarding result of cancelled connect attempt");
            return Err(WalletError::UserRejected);
        }
        core.inflight = None;
        core.attempt_task = None;

        match result {
            Ok(established) => {
                if let Some(old) = core.listener.take() {
                    old.abort();
                }
                core.listener = Some(self.spawn_listener(attempt, established.subscription));
                core.transport = Some(established.transport);
                let epoch = self.bump_epoch();
                self.publish(
                    &mut core,
                    WalletSession::connected(established.account.clone(), established.chain_id),
                );
                drop(core);
                self.flag.set_connected(true);
                info!(
                    account = %established.account,
                    chain_id = established.chain_id,
                    epoch,
                    "wallet connected"
                );
                Ok(established.account)
            }
            Err(e) => {
                // Raw transport text stays in the log. A silent attempt is
                // never reported to readers.
                let next = match (&e, mode) {
                    (WalletError::Transport(_), ConnectMode::Prompt) => {
                        WalletSession::errored(e.user_message(core.locale))
                    }
                    _ => WalletSession::disconnected(),
                };
                debug!(attempt, ?mode, "connect attempt failed: {e}");
                self.publish(&mut core, next);
                Err(e)
            }
        }
    }

    /// Process wallet events for one connection, strictly in arrival order.
    fn spawn_listener(self: &Arc<Self>, attempt: u64, mut subscription: Subscription) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.refresh_balance_for(attempt).await;
            }
            while let Some(event) = subscription.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match inner.apply_event(attempt, event) {
                    EventOutcome::Continue => {}
                    EventOutcome::RefreshBalance => inner.refresh_balance_for(attempt).await,
                    EventOutcome::Stop => break,
                }
            }
            debug!(attempt, "wallet event listener finished");
        })
    }

    fn apply_event(&self, attempt: u64, event: WalletEvent) -> EventOutcome {
        let mut core = self.core.lock();
        if core.attempt != attempt {
            return EventOutcome::Stop;
        }
        let (Some(account), Some(chain_id)) =
            (core.session.account().cloned(), core.session.chain_id())
        else {
            return EventOutcome::Stop;
        };

        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                None => {
                    info!("wallet exposes no accounts anymore, disconnecting");
                    self.reset(&mut core);
                    drop(core);
                    self.flag.set_connected(false);
                    EventOutcome::Stop
                }
                Some(first) if account.matches(&Account::new(first.as_str())) => {
                    EventOutcome::Continue
                }
                Some(first) => {
                    let next = Account::new(first);
                    let epoch = self.bump_epoch();
                    info!(account = %next, epoch, "wallet account changed");
                    self.publish(&mut core, WalletSession::connected(next, chain_id));
                    EventOutcome::RefreshBalance
                }
            },
            WalletEvent::ChainChanged(new_chain) if new_chain == chain_id => EventOutcome::Continue,
            WalletEvent::ChainChanged(new_chain) => {
                let epoch = self.bump_epoch();
                info!(from = chain_id, to = new_chain, epoch, "wallet chain changed, bindings invalidated");
                self.publish(&mut core, WalletSession::connected(account, new_chain));
                EventOutcome::RefreshBalance
            }
            WalletEvent::Disconnected(err) => {
                warn!(code = err.code, "wallet transport disconnected: {}", err.message);
                self.reset(&mut core);
                drop(core);
                self.flag.set_connected(false);
                EventOutcome::Stop
            }
        }
    }

    /// Back to `Disconnected`: forget the transport, stop listening and make
    /// any in-flight attempt stale. Callers clear the reconnect flag once the
    /// lock is released.
    fn reset(&self, core: &mut Core) {
        core.attempt += 1;
        core.inflight = None;
        if let Some(task) = core.attempt_task.take() {
            task.abort();
        }
        if let Some(listener) = core.listener.take() {
            listener.abort();
        }
        core.transport = None;
        self.bump_epoch();
        self.publish(core, WalletSession::disconnected());
    }

    async fn refresh_balance_for(&self, attempt: u64) {
        let (transport, account) = {
            let core = self.core.lock();
            if core.attempt != attempt {
                return;
            }
            match (&core.transport, core.session.account()) {
                (Some(transport), Some(account)) => (Arc::clone(transport), account.clone()),
                _ => return,
            }
        };

        let raw = match transport
            .request("eth_getBalance", json!([account.as_str(), "latest"]))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(account = %account, "balance refresh failed: {e}");
                return;
            }
        };
        let Some(balance) = parse_quantity(&raw) else {
            warn!(account = %account, "wallet returned an invalid balance: {raw}");
            return;
        };

        let mut core = self.core.lock();
        if core.attempt == attempt && core.session.account() == Some(&account) {
            let next = core.session.clone().with_balance(balance);
            self.publish(&mut core, next);
        }
    }
}
