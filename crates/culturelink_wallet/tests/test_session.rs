mod common;

use std::sync::Arc;

use common::{ACCOUNT, eventually, manager_for, wait_for_session};
use culturelink_core::{Locale, MemoryReconnectFlag, ReconnectFlag};
use culturelink_wallet::transport::TransportError;
use culturelink_wallet::transport::memory::{ApprovalMode, InMemoryWallet};
use culturelink_wallet::{
    Account, ConnectionState, NetworkRegistry, NoWallet, WalletError, WalletSessionManager,
};

fn setup(accounts: &[&str], chain_id: u64) -> (Arc<InMemoryWallet>, Arc<MemoryReconnectFlag>, Arc<WalletSessionManager>) {
    let wallet = InMemoryWallet::new(accounts, chain_id);
    let flag = Arc::new(MemoryReconnectFlag::new(false));
    let manager = manager_for(&wallet, Arc::clone(&flag));
    (wallet, flag, manager)
}

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_adopts_account_and_chain() {
    let (_wallet, flag, manager) = setup(&[ACCOUNT], 97);

    let account = manager.connect().await.unwrap();
    assert_eq!(account.as_str(), "0xABC");

    let session = manager.snapshot();
    assert_eq!(session.state(), &ConnectionState::Connected);
    assert_eq!(session.account().map(Account::as_str), Some("0xABC"));
    assert_eq!(session.chain_id(), Some(97));
    assert!(flag.was_connected());
}

#[tokio::test]
async fn test_connect_without_wallet() {
    let manager = WalletSessionManager::new(
        Arc::new(NoWallet),
        NetworkRegistry::with_defaults(),
        Arc::new(MemoryReconnectFlag::new(false)),
    );
    assert_eq!(manager.connect().await.unwrap_err(), WalletError::NoWalletAvailable);
    assert_eq!(manager.snapshot().state(), &ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_rejected_by_user() {
    let (wallet, flag, manager) = setup(&[ACCOUNT], 97);
    wallet.set_approval(ApprovalMode::Reject);

    assert_eq!(manager.connect().await.unwrap_err(), WalletError::UserRejected);
    assert_eq!(manager.snapshot().state(), &ConnectionState::Disconnected);
    assert!(!flag.was_connected());
}

#[tokio::test]
async fn test_connect_with_empty_account_list_is_a_rejection() {
    let (_wallet, _flag, manager) = setup(&[], 97);
    assert_eq!(manager.connect().await.unwrap_err(), WalletError::UserRejected);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_connect_transport_failure_sets_error_state() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    wallet.fail_next("eth_chainId", TransportError::internal("bridge unavailable"));

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, WalletError::Transport(_)));
    let session = manager.snapshot();
    assert_eq!(
        session.state(),
        &ConnectionState::Error(err.user_message(Locale::ZhCn))
    );
    assert!(session.account().is_none());
    assert!(session.chain_id().is_none());

    // The next attempt starts from scratch.
    assert!(manager.connect().await.is_ok());
}

#[tokio::test]
async fn test_connect_while_connected_does_not_prompt_again() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();
    manager.connect().await.unwrap();
    assert_eq!(wallet.count_calls("eth_requestAccounts"), 1);
}

#[tokio::test]
async fn test_concurrent_connects_share_one_prompt() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    wallet.set_approval(ApprovalMode::Manual);

    let first = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.connect().await }
    });
    let second = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.connect().await }
    });
    eventually(|| wallet.pending_prompts() == 1).await;
    assert_eq!(manager.snapshot().state(), &ConnectionState::Connecting);

    wallet.decide(true);
    assert_eq!(first.await.unwrap().unwrap().as_str(), ACCOUNT);
    assert_eq!(second.await.unwrap().unwrap().as_str(), ACCOUNT);
    assert_eq!(wallet.count_calls("eth_requestAccounts"), 1);
}

#[tokio::test]
async fn test_late_approval_after_disconnect_is_discarded() {
    let (wallet, flag, manager) = setup(&[ACCOUNT], 97);
    wallet.set_approval(ApprovalMode::Manual);

    let pending = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.connect().await }
    });
    eventually(|| wallet.pending_prompts() == 1).await;

    manager.disconnect();
    wallet.decide(true);

    assert_eq!(pending.await.unwrap().unwrap_err(), WalletError::UserRejected);
    let session = manager.snapshot();
    assert_eq!(session.state(), &ConnectionState::Disconnected);
    assert!(session.account().is_none());
    assert!(!flag.was_connected());
    eventually(|| wallet.listener_count() == 0).await;
}

#[tokio::test]
async fn test_error_state_carries_localized_message_only() {
    let wallet = InMemoryWallet::new(&[ACCOUNT], 97);
    wallet.fail_next("eth_requestAccounts", TransportError::internal("bridge socket reset"));
    let manager = WalletSessionManager::new(
        wallet.connector(),
        NetworkRegistry::with_defaults(),
        Arc::new(MemoryReconnectFlag::new(false)),
    )
    .with_locale(Locale::En);

    manager.connect().await.unwrap_err();

    let ConnectionState::Error(message) = manager.snapshot().state().clone() else {
        panic!("expected error state");
    };
    assert_eq!(message, "Transaction failed, please try again.");
    assert!(!message.contains("bridge socket reset"));
    assert!(!message.contains("-32603"));
}

#[tokio::test]
async fn test_disconnect_releases_attempt_blocked_on_prompt() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    wallet.set_approval(ApprovalMode::Manual);

    let pending = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.connect().await }
    });
    eventually(|| wallet.pending_prompts() == 1).await;

    // The prompt stays unanswered; disconnect alone settles the caller.
    manager.disconnect();
    let result = tokio::time::timeout(std::time::Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.unwrap_err(), WalletError::UserRejected);
    eventually(|| wallet.listener_count() == 0).await;
}

// ---------------------------------------------------------------------------
// disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (wallet, flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();

    manager.disconnect();
    let epoch = manager.epoch();
    let once = manager.snapshot();
    manager.disconnect();

    assert_eq!(manager.snapshot(), once);
    assert_eq!(manager.epoch(), epoch);
    assert_eq!(once.state(), &ConnectionState::Disconnected);
    assert!(manager.transport().is_none());
    assert!(!flag.was_connected());
    eventually(|| wallet.listener_count() == 0).await;
}

#[tokio::test]
async fn test_disconnect_when_never_connected() {
    let (_wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.disconnect();
    assert_eq!(manager.snapshot().state(), &ConnectionState::Disconnected);
    assert_eq!(manager.epoch(), 0);
}

#[tokio::test]
async fn test_connected_iff_account_and_chain() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT, "0xDEF"], 97);
    let check = |manager: &WalletSessionManager| {
        let s = manager.snapshot();
        assert_eq!(s.is_connected(), s.account().is_some());
        assert_eq!(s.account().is_some(), s.chain_id().is_some());
    };

    check(&manager);
    manager.connect().await.unwrap();
    check(&manager);
    wallet.change_chain(56);
    wait_for_session(&manager, |s| s.chain_id() == Some(56)).await;
    check(&manager);
    manager.disconnect();
    check(&manager);
    manager.disconnect();
    check(&manager);
    manager.connect().await.unwrap();
    check(&manager);
    wallet.change_accounts(&[]);
    wait_for_session(&manager, |s| !s.is_connected()).await;
    check(&manager);
}

// ---------------------------------------------------------------------------
// wallet events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_accounts_changed_disconnects() {
    let (wallet, flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();

    wallet.change_accounts(&[]);
    let session = wait_for_session(&manager, |s| s.state() == &ConnectionState::Disconnected).await;
    assert!(session.account().is_none());
    assert!(session.chain_id().is_none());
    assert!(!flag.was_connected());
}

#[tokio::test]
async fn test_account_switch_keeps_chain_and_bumps_epoch() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();
    let guard = manager.guard();

    wallet.change_accounts(&["0xDEF"]);
    let session = wait_for_session(&manager, |s| {
        s.account().map(Account::as_str) == Some("0xDEF")
    })
    .await;
    assert_eq!(session.chain_id(), Some(97));
    assert!(!guard.is_current());
}

#[tokio::test]
async fn test_same_account_reported_again_changes_nothing() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();
    let guard = manager.guard();

    wallet.change_accounts(&["0xabc"]);
    wallet.change_chain(56);
    wait_for_session(&manager, |s| s.chain_id() == Some(56)).await;
    // Only the chain change moved the epoch.
    assert_eq!(manager.epoch(), guard.issued_at() + 1);
}

#[tokio::test]
async fn test_chain_change_is_adopted() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();
    let epoch = manager.epoch();

    wallet.change_chain(56);
    let session = wait_for_session(&manager, |s| s.chain_id() == Some(56)).await;
    assert_eq!(session.account().map(Account::as_str), Some(ACCOUNT));
    assert!(manager.epoch() > epoch);
}

#[tokio::test]
async fn test_transport_disconnect_resets_session() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();

    wallet.emit_disconnect();
    wait_for_session(&manager, |s| s.state() == &ConnectionState::Disconnected).await;
    assert!(manager.transport().is_none());
}

#[tokio::test]
async fn test_events_are_applied_in_order() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();

    wallet.change_chain(56);
    wallet.change_accounts(&["0xDEF"]);
    wallet.change_chain(97);
    let session = wait_for_session(&manager, |s| {
        s.chain_id() == Some(97) && s.account().map(Account::as_str) == Some("0xDEF")
    })
    .await;
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_listeners_do_not_leak_across_reconnects() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    for _ in 0..3 {
        manager.connect().await.unwrap();
        eventually(|| wallet.listener_count() == 1).await;
        manager.disconnect();
        eventually(|| wallet.listener_count() == 0).await;
    }
}

#[tokio::test]
async fn test_dropping_manager_releases_listener() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    manager.connect().await.unwrap();
    assert_eq!(wallet.listener_count(), 1);
    drop(manager);
    eventually(|| wallet.listener_count() == 0).await;
}

#[tokio::test]
async fn test_balance_is_refreshed_after_connect() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    wallet.set_balance(ACCOUNT, 1_500_000_000_000_000_000);
    manager.connect().await.unwrap();

    let session = wait_for_session(&manager, |s| s.balance_wei().is_some()).await;
    assert_eq!(session.balance_wei(), Some(1_500_000_000_000_000_000));
}

// ---------------------------------------------------------------------------
// auto_reconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_auto_reconnect_with_no_authorized_accounts() {
    let wallet = InMemoryWallet::new(&[], 97);
    let flag = Arc::new(MemoryReconnectFlag::new(true));
    let manager = manager_for(&wallet, Arc::clone(&flag));

    manager.auto_reconnect().await;

    assert_eq!(manager.snapshot().state(), &ConnectionState::Disconnected);
    assert_eq!(wallet.count_calls("eth_requestAccounts"), 0);
    assert_eq!(wallet.count_calls("eth_accounts"), 1);
    assert!(!flag.was_connected());
}

#[tokio::test]
async fn test_auto_reconnect_restores_authorized_session() {
    let wallet = InMemoryWallet::new(&[ACCOUNT], 56);
    wallet.authorize();
    let flag = Arc::new(MemoryReconnectFlag::new(true));
    let manager = manager_for(&wallet, Arc::clone(&flag));

    manager.auto_reconnect().await;

    let session = manager.snapshot();
    assert!(session.is_connected());
    assert_eq!(session.chain_id(), Some(56));
    assert_eq!(wallet.count_calls("eth_requestAccounts"), 0);
    assert!(flag.was_connected());
}

#[tokio::test]
async fn test_auto_reconnect_skipped_without_flag() {
    let wallet = InMemoryWallet::new(&[ACCOUNT], 97);
    wallet.authorize();
    let manager = manager_for(&wallet, Arc::new(MemoryReconnectFlag::new(false)));

    manager.auto_reconnect().await;

    assert!(!manager.is_connected());
    assert!(wallet.calls().is_empty());
}

#[tokio::test]
async fn test_auto_reconnect_swallows_transport_errors() {
    let wallet = InMemoryWallet::new(&[ACCOUNT], 97);
    wallet.authorize();
    wallet.fail_next("eth_accounts", TransportError::internal("locked"));
    let flag = Arc::new(MemoryReconnectFlag::new(true));
    let manager = manager_for(&wallet, Arc::clone(&flag));

    let mut updates = manager.subscribe();
    manager.auto_reconnect().await;

    assert!(!manager.is_connected());
    assert_eq!(manager.snapshot().state(), &ConnectionState::Disconnected);
    assert!(flag.was_connected());

    assert_eq!(
        updates.borrow_and_update().state(),
        &ConnectionState::Disconnected
    );
}

// ---------------------------------------------------------------------------
// switch_network
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_switch_to_known_network() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    wallet.change_chain(56);
    manager.connect().await.unwrap();
    assert_eq!(manager.chain_id(), Some(56));

    manager.switch_network(97).await.unwrap();
    wait_for_session(&manager, |s| s.chain_id() == Some(97)).await;
    assert_eq!(wallet.count_calls("wallet_addEthereumChain"), 0);
}

#[tokio::test]
async fn test_switch_adds_unknown_network_then_retries() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 56);
    manager.connect().await.unwrap();
    assert!(!wallet.knows_chain(97));

    manager.switch_network(97).await.unwrap();

    assert_eq!(wallet.count_calls("wallet_addEthereumChain"), 1);
    assert_eq!(wallet.count_calls("wallet_switchEthereumChain"), 2);
    let added = wallet.last_params("wallet_addEthereumChain").unwrap();
    assert_eq!(added[0]["chainId"], "0x61");
    assert_eq!(added[0]["nativeCurrency"]["symbol"], "tBNB");
    wait_for_session(&manager, |s| s.chain_id() == Some(97)).await;
}

#[tokio::test]
async fn test_switch_fails_when_retry_fails() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 56);
    manager.connect().await.unwrap();
    wallet.fail_next("wallet_switchEthereumChain", TransportError::unrecognized_chain(97));
    wallet.fail_next("wallet_switchEthereumChain", TransportError::unrecognized_chain(97));

    let err = manager.switch_network(97).await.unwrap_err();
    assert!(matches!(err, WalletError::NetworkSwitchFailed(_)));
    assert_eq!(wallet.count_calls("wallet_addEthereumChain"), 1);
    assert_eq!(wallet.count_calls("wallet_switchEthereumChain"), 2);
    assert_eq!(manager.snapshot().state(), &ConnectionState::Connected);
    assert_eq!(manager.chain_id(), Some(56));
}

#[tokio::test]
async fn test_switch_recognizes_nested_unrecognized_chain() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 56);
    manager.connect().await.unwrap();
    wallet.fail_next(
        "wallet_switchEthereumChain",
        TransportError::internal("Internal JSON-RPC error.")
            .with_data(serde_json::json!({ "originalError": { "code": 4902 } })),
    );

    manager.switch_network(97).await.unwrap();
    assert_eq!(wallet.count_calls("wallet_addEthereumChain"), 1);
}

#[tokio::test]
async fn test_switch_rejected_by_user() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 56);
    manager.connect().await.unwrap();
    wallet.fail_next("wallet_switchEthereumChain", TransportError::user_rejected());

    let err = manager.switch_network(97).await.unwrap_err();
    assert!(matches!(err, WalletError::NetworkSwitchFailed(_)));
    assert_eq!(wallet.count_calls("wallet_addEthereumChain"), 0);
}

#[tokio::test]
async fn test_switch_while_disconnected_uses_detected_wallet() {
    let (wallet, _flag, manager) = setup(&[ACCOUNT], 97);
    wallet.change_chain(56);

    manager.switch_network(97).await.unwrap();
    assert_eq!(wallet.chain_id(), 97);
    assert!(!manager.is_connected());
}

#[tokio::test]
async fn test_switch_without_wallet() {
    let manager = WalletSessionManager::new(
        Arc::new(NoWallet),
        NetworkRegistry::with_defaults(),
        Arc::new(MemoryReconnectFlag::new(false)),
    );
    assert_eq!(
        manager.switch_network(97).await.unwrap_err(),
        WalletError::NoWalletAvailable
    );
}
