//! Transaction lifecycle tracking.
//!
//! Turns a submitted transaction into a final [`TxOutcome`]: success with a
//! receipt, or a classified failure with a localized message. Raw transport
//! errors never leave this module.

use std::sync::Arc;
use std::time::Duration;

use culturelink_core::Locale;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::classify::classify_transaction_error;
use crate::error::{TxFailure, WalletError};
use crate::format::{parse_quantity, to_quantity};
use crate::transport::RpcProvider;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "failure", rename_all = "snake_case")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed(TxFailure),
}

/// The parts of a receipt the app cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    /// `true` for status `0x1`.
    pub success: bool,
    pub gas_used: Option<u128>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl TxReceipt {
    /// Parse an `eth_getTransactionReceipt` result.
    pub fn from_json(value: &Value) -> Option<Self> {
        let transaction_hash = value.get("transactionHash")?.as_str()?.to_string();
        let block_number = u64::try_from(parse_quantity(value.get("blockNumber")?)?).ok()?;
        let success = parse_quantity(value.get("status")?)? == 1;
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            transaction_hash,
            block_number,
            success,
            gas_used: value.get("gasUsed").and_then(parse_quantity),
            from: text("from"),
            to: text("to"),
        })
    }
}

/// A transaction that has been handed to the wallet.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTransaction {
    hash: String,
    required_confirmations: u64,
    status: TxStatus,
    /// The call as submitted, replayed with `eth_call` if it reverts.
    request: Option<Value>,
    receipt: Option<TxReceipt>,
}

impl PendingTransaction {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            required_confirmations: 1,
            status: TxStatus::Submitted,
            request: None,
            receipt: None,
        }
    }

    pub fn with_request(mut self, request: Value) -> Self {
        self.request = Some(request);
        self
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    pub fn status(&self) -> &TxStatus {
        &self.status
    }

    pub fn request(&self) -> Option<&Value> {
        self.request.as_ref()
    }

    pub fn receipt(&self) -> Option<&TxReceipt> {
        self.receipt.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        self.status != TxStatus::Submitted
    }

    /// Leaves `Submitted` exactly once; later calls are ignored.
    fn settle(&mut self, status: TxStatus, receipt: Option<TxReceipt>) {
        if self.is_settled() {
            return;
        }
        self.status = status;
        self.receipt = receipt;
    }
}

/// Final result of a transaction attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TxOutcome {
    pub success: bool,
    pub receipt: Option<TxReceipt>,
    /// Localized message, set whenever `success` is false.
    pub error: Option<String>,
    pub failure: Option<TxFailure>,
}

impl TxOutcome {
    fn confirmed(receipt: TxReceipt) -> Self {
        Self {
            success: true,
            receipt: Some(receipt),
            error: None,
            failure: None,
        }
    }

    fn failed(failure: TxFailure, receipt: Option<TxReceipt>, locale: Locale) -> Self {
        Self {
            success: false,
            receipt,
            error: Some(failure.user_message(locale)),
            failure: Some(failure),
        }
    }

    /// Outcome for an attempt that never produced a transaction.
    pub fn from_error(err: &WalletError, locale: Locale) -> Self {
        let failure = match err {
            WalletError::UserRejected => Some(TxFailure::UserRejected),
            WalletError::Transaction(failure) => Some(failure.clone()),
            WalletError::Transport(_) => Some(TxFailure::Unknown),
            _ => None,
        };
        Self {
            success: false,
            receipt: None,
            error: Some(err.user_message(locale)),
            failure,
        }
    }
}

/// Polls a provider until a transaction is mined deep enough.
pub struct TransactionTracker {
    provider: Arc<dyn RpcProvider>,
    poll_interval: Duration,
    locale: Locale,
}

impl TransactionTracker {
    pub fn new(provider: Arc<dyn RpcProvider>, locale: Locale) -> Self {
        Self {
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
            locale,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Wait until `tx` has `confirmations` confirmations (at least one) or
    /// failed. A transaction that already settled returns its stored outcome
    /// without touching the network.
    pub async fn await_confirmation(&self, tx: &mut PendingTransaction, confirmations: u64) -> TxOutcome {
        if let Some(outcome) = self.settled_outcome(tx) {
            return outcome;
        }
        let confirmations = confirmations.max(1);
        tx.required_confirmations = confirmations;
        debug!(hash = %tx.hash, confirmations, "waiting for transaction");

        let (status, receipt) = match self.wait_for_receipt(tx, confirmations).await {
            Ok(receipt) if receipt.success => (TxStatus::Confirmed, Some(receipt)),
            Ok(receipt) => {
                let reason = self.revert_reason(tx, receipt.block_number).await;
                (TxStatus::Failed(TxFailure::ExecutionReverted(reason)), Some(receipt))
            }
            Err(failure) => (TxStatus::Failed(failure), None),
        };
        tx.settle(status, receipt);

        match tx.status() {
            TxStatus::Confirmed => info!(hash = %tx.hash, confirmations, "transaction confirmed"),
            TxStatus::Failed(failure) => warn!(hash = %tx.hash, ?failure, "transaction failed"),
            TxStatus::Submitted => {}
        }
        self.settled_outcome(tx)
            .unwrap_or_else(|| TxOutcome::failed(TxFailure::Unknown, None, self.locale))
    }

    /// Fold a submission result and its confirmation into one outcome.
    pub async fn track(
        &self,
        submission: Result<PendingTransaction, WalletError>,
        confirmations: u64,
    ) -> TxOutcome {
        match submission {
            Ok(mut tx) => self.await_confirmation(&mut tx, confirmations).await,
            Err(err) => {
                warn!("transaction was not submitted: {err}");
                TxOutcome::from_error(&err, self.locale)
            }
        }
    }

    fn settled_outcome(&self, tx: &PendingTransaction) -> Option<TxOutcome> {
        match &tx.status {
            TxStatus::Submitted => None,
            TxStatus::Confirmed => Some(match &tx.receipt {
                Some(receipt) => TxOutcome::confirmed(receipt.clone()),
                None => TxOutcome::failed(TxFailure::Unknown, None, self.locale),
            }),
            TxStatus::Failed(failure) => {
                Some(TxOutcome::failed(failure.clone(), tx.receipt.clone(), self.locale))
            }
        }
    }

    /// Poll errors say nothing about the transaction itself, so they are
    /// logged and polling goes on. Only a receipt settles it.
    async fn wait_for_receipt(&self, tx: &PendingTransaction, confirmations: u64) -> Result<TxReceipt, TxFailure> {
        let receipt = loop {
            let raw = match self
                .provider
                .request("eth_getTransactionReceipt", json!([tx.hash]))
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(hash = %tx.hash, code = e.code, "receipt poll failed: {}", e.message);
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };
            if !raw.is_null() {
                break TxReceipt::from_json(&raw).ok_or_else(|| {
                    warn!(hash = %tx.hash, "malformed transaction receipt: {raw}");
                    TxFailure::Unknown
                })?;
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        // A reverted transaction is final whatever the depth.
        if !receipt.success || confirmations == 1 {
            return Ok(receipt);
        }
        loop {
            let head = match self.provider.request("eth_blockNumber", json!([])).await {
                Ok(raw) => parse_quantity(&raw).and_then(|v| u64::try_from(v).ok()),
                Err(e) => {
                    warn!(hash = %tx.hash, code = e.code, "block number poll failed: {}", e.message);
                    None
                }
            };
            let Some(head) = head else {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            };
            let depth = head.saturating_add(1).saturating_sub(receipt.block_number);
            if depth >= confirmations {
                return Ok(receipt);
            }
            debug!(hash = %tx.hash, depth, confirmations, "waiting for more confirmations");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Replay the original call at the block it was mined in to recover the
    /// revert reason.
    async fn revert_reason(&self, tx: &PendingTransaction, block_number: u64) -> Option<String> {
        let request = tx.request.as_ref()?;
        let block = to_quantity(u128::from(block_number));
        match self.provider.request("eth_call", json!([request, block])).await {
            Ok(_) => None,
            Err(e) => match classify_transaction_error(&e) {
                TxFailure::ExecutionReverted(reason) => reason,
                _ => None,
            },
        }
    }
}
