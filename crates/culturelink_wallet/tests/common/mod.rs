#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use culturelink_core::MemoryReconnectFlag;
use culturelink_wallet::transport::memory::InMemoryWallet;
use culturelink_wallet::{NetworkRegistry, WalletSession, WalletSessionManager};

pub const ACCOUNT: &str = "0xABC";

pub fn manager_for(wallet: &Arc<InMemoryWallet>, flag: Arc<MemoryReconnectFlag>) -> Arc<WalletSessionManager> {
    Arc::new(WalletSessionManager::new(
        wallet.connector(),
        NetworkRegistry::with_defaults(),
        flag,
    ))
}

/// Wait until the published session satisfies `pred`.
pub async fn wait_for_session(
    manager: &WalletSessionManager,
    pred: impl FnMut(&WalletSession) -> bool,
) -> WalletSession {
    let mut rx = manager.subscribe();
    let session = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("timed out waiting for session state")
        .expect("session channel closed");
    session.clone()
}

/// Poll `check` until it holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
