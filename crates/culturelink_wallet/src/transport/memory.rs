//! Scriptable in-process wallet.
//!
//! Behaves like an injected EIP-1193 wallet holding a fixed set of accounts.
//! Tests and demos drive it directly: change accounts or chains (which emits
//! the matching events), decide approval prompts, queue failures for any
//! method and mine blocks.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::debug;

use super::{
    EventHub, RpcProvider, Subscription, TransportError, WalletConnector, WalletEvent,
    WalletTransport,
};
use crate::format::{parse_quantity, to_quantity};
use crate::networks::{parse_chain_id, to_hex_chain_id};

/// How the wallet answers `eth_requestAccounts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMode {
    Approve,
    Reject,
    /// Hold the request until [`InMemoryWallet::decide`] is called.
    Manual,
}

const TRANSFER_GAS: u128 = 21_000;

#[derive(Debug)]
struct State {
    accounts: Vec<String>,
    authorized: bool,
    chain_id: u64,
    known_chains: BTreeSet<u64>,
    approval: ApprovalMode,
    prompts: Vec<oneshot::Sender<bool>>,
    failures: HashMap<String, VecDeque<TransportError>>,
    balances: HashMap<String, u128>,
    block_number: u64,
    receipts: HashMap<String, Value>,
    revert_next: VecDeque<bool>,
    call_result: Value,
    calls: Vec<(String, Value)>,
    tx_count: u64,
}

#[derive(Debug)]
pub struct InMemoryWallet {
    state: Mutex<State>,
    hub: EventHub,
}

impl InMemoryWallet {
    /// A wallet on `chain_id` holding `accounts`. Nothing is authorized yet;
    /// prompts are approved.
    pub fn new(accounts: &[&str], chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                accounts: accounts.iter().map(|a| a.to_string()).collect(),
                authorized: false,
                chain_id,
                known_chains: BTreeSet::from([chain_id]),
                approval: ApprovalMode::Approve,
                prompts: Vec::new(),
                failures: HashMap::new(),
                balances: HashMap::new(),
                block_number: 100,
                receipts: HashMap::new(),
                revert_next: VecDeque::new(),
                call_result: json!("0x"),
                calls: Vec::new(),
                tx_count: 0,
            }),
            hub: EventHub::new(),
        })
    }

    /// Connector that always finds this wallet.
    pub fn connector(self: &Arc<Self>) -> Arc<dyn WalletConnector> {
        Arc::new(InMemoryConnector(Arc::clone(self)))
    }

    /// Mark the accounts as already authorized, as after an earlier session.
    pub fn authorize(&self) {
        self.state.lock().authorized = true;
    }

    pub fn set_approval(&self, mode: ApprovalMode) {
        self.state.lock().approval = mode;
    }

    /// Answer every open approval prompt.
    pub fn decide(&self, approve: bool) {
        let prompts = std::mem::take(&mut self.state.lock().prompts);
        for prompt in prompts {
            let _ = prompt.send(approve);
        }
    }

    pub fn pending_prompts(&self) -> usize {
        self.state.lock().prompts.len()
    }

    /// Make the next call of `method` fail with `err`. Calls queue up.
    pub fn fail_next(&self, method: &str, err: TransportError) {
        self.state
            .lock()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(err);
    }

    /// The next sent transaction will be mined with status 0.
    pub fn revert_next_transaction(&self) {
        self.state.lock().revert_next.push_back(true);
    }

    pub fn set_call_result(&self, result: Value) {
        self.state.lock().call_result = result;
    }

    pub fn set_balance(&self, account: &str, wei: u128) {
        self.state
            .lock()
            .balances
            .insert(account.to_ascii_lowercase(), wei);
    }

    pub fn forget_chain(&self, chain_id: u64) {
        self.state.lock().known_chains.remove(&chain_id);
    }

    pub fn knows_chain(&self, chain_id: u64) -> bool {
        self.state.lock().known_chains.contains(&chain_id)
    }

    pub fn chain_id(&self) -> u64 {
        self.state.lock().chain_id
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    /// Replace the exposed accounts and emit `accountsChanged`.
    pub fn change_accounts(&self, accounts: &[&str]) {
        let accounts: Vec<String> = accounts.iter().map(|a| a.to_string()).collect();
        self.state.lock().accounts = accounts.clone();
        self.hub.emit(WalletEvent::AccountsChanged(accounts));
    }

    /// Move to another chain from the wallet side and emit `chainChanged`.
    pub fn change_chain(&self, chain_id: u64) {
        {
            let mut state = self.state.lock();
            state.chain_id = chain_id;
            state.known_chains.insert(chain_id);
        }
        self.hub.emit(WalletEvent::ChainChanged(chain_id));
    }

    pub fn emit_disconnect(&self) {
        self.hub.emit(WalletEvent::Disconnected(TransportError::new(
            super::codes::DISCONNECTED,
            "The provider is disconnected from all chains.",
        )));
    }

    pub fn mine(&self, blocks: u64) {
        self.state.lock().block_number += blocks;
    }

    /// Methods requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn count_calls(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|(m, _)| m == method).count()
    }

    /// Parameters of the most recent call of `method`.
    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }

    pub fn listener_count(&self) -> usize {
        self.hub.listener_count()
    }

    fn exposed_accounts(state: &State) -> Value {
        if state.authorized {
            json!(state.accounts)
        } else {
            json!([])
        }
    }

    async fn request_accounts(&self) -> Result<Value, TransportError> {
        let prompt = {
            let mut state = self.state.lock();
            if state.authorized {
                return Ok(json!(state.accounts));
            }
            match state.approval {
                ApprovalMode::Approve => None,
                ApprovalMode::Reject => return Err(TransportError::user_rejected()),
                ApprovalMode::Manual => {
                    let (tx, rx) = oneshot::channel();
                    state.prompts.push(tx);
                    Some(rx)
                }
            }
        };

        if let Some(rx) = prompt {
            debug!("in-memory wallet waiting for approval");
            if !rx.await.unwrap_or(false) {
                return Err(TransportError::user_rejected());
            }
        }
        let mut state = self.state.lock();
        state.authorized = true;
        Ok(json!(state.accounts))
    }

    fn switch_chain(&self, params: &Value) -> Result<Value, TransportError> {
        let target = params
            .get(0)
            .and_then(|p| p.get("chainId"))
            .and_then(parse_chain_id)
            .ok_or_else(|| TransportError::new(super::codes::INVALID_PARAMS, "missing chainId"))?;
        let changed = {
            let mut state = self.state.lock();
            if !state.known_chains.contains(&target) {
                return Err(TransportError::unrecognized_chain(target));
            }
            let changed = state.chain_id != target;
            state.chain_id = target;
            changed
        };
        if changed {
            self.hub.emit(WalletEvent::ChainChanged(target));
        }
        Ok(Value::Null)
    }

    fn add_chain(&self, params: &Value) -> Result<Value, TransportError> {
        let entry = params
            .get(0)
            .ok_or_else(|| TransportError::new(super::codes::INVALID_PARAMS, "missing chain"))?;
        let chain_id = entry
            .get("chainId")
            .and_then(parse_chain_id)
            .ok_or_else(|| TransportError::new(super::codes::INVALID_PARAMS, "missing chainId"))?;
        let has_rpc = entry
            .get("rpcUrls")
            .and_then(Value::as_array)
            .is_some_and(|urls| !urls.is_empty());
        if !has_rpc {
            return Err(TransportError::new(super::codes::INVALID_PARAMS, "rpcUrls required"));
        }
        self.state.lock().known_chains.insert(chain_id);
        Ok(Value::Null)
    }

    fn send_transaction(&self, params: &Value) -> Result<Value, TransportError> {
        let tx = params
            .get(0)
            .ok_or_else(|| TransportError::new(super::codes::INVALID_PARAMS, "missing transaction"))?;
        let mut state = self.state.lock();
        let from = tx.get("from").and_then(Value::as_str).unwrap_or_default();
        if !state.authorized || !state.accounts.iter().any(|a| a.eq_ignore_ascii_case(from)) {
            return Err(TransportError::new(
                super::codes::UNAUTHORIZED,
                "The requested account has not been authorized by the user.",
            ));
        }

        state.tx_count += 1;
        state.block_number += 1;
        let hash = format!("0x{:064x}", state.tx_count);
        let reverted = state.revert_next.pop_front().unwrap_or(false);
        let receipt = json!({
            "transactionHash": hash,
            "blockNumber": to_quantity(u128::from(state.block_number)),
            "from": from,
            "to": tx.get("to").cloned().unwrap_or(Value::Null),
            "status": if reverted { "0x0" } else { "0x1" },
            "gasUsed": to_quantity(TRANSFER_GAS),
            "logs": [],
        });
        state.receipts.insert(hash.clone(), receipt);
        Ok(json!(hash))
    }

    fn answer(&self, method: &str, params: &Value) -> Result<Value, TransportError> {
        let state = self.state.lock();
        let first = params.get(0);
        match method {
            "eth_accounts" => Ok(Self::exposed_accounts(&state)),
            "eth_chainId" => Ok(json!(to_hex_chain_id(state.chain_id))),
            "eth_blockNumber" => Ok(json!(to_quantity(u128::from(state.block_number)))),
            "eth_getBalance" => {
                let account = first.and_then(Value::as_str).unwrap_or_default();
                let wei = state
                    .balances
                    .get(&account.to_ascii_lowercase())
                    .copied()
                    .unwrap_or(0);
                Ok(json!(to_quantity(wei)))
            }
            "eth_getTransactionReceipt" => {
                let hash = first.and_then(Value::as_str).unwrap_or_default();
                Ok(state.receipts.get(hash).cloned().unwrap_or(Value::Null))
            }
            "eth_estimateGas" => {
                let value = first
                    .and_then(|tx| tx.get("value"))
                    .and_then(parse_quantity)
                    .unwrap_or(0);
                let from = first
                    .and_then(|tx| tx.get("from"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let balance = state
                    .balances
                    .get(&from.to_ascii_lowercase())
                    .copied()
                    .unwrap_or(0);
                if value > balance {
                    return Err(TransportError::new(
                        super::codes::SERVER_ERROR,
                        "insufficient funds for gas * price + value",
                    ));
                }
                Ok(json!(to_quantity(TRANSFER_GAS)))
            }
            "eth_call" => Ok(state.call_result.clone()),
            other => Err(TransportError::unsupported_method(other)),
        }
    }
}

#[async_trait]
impl RpcProvider for InMemoryWallet {
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let scripted = {
            let mut state = self.state.lock();
            state.calls.push((method.to_string(), params.clone()));
            state
                .failures
                .get_mut(method)
                .and_then(VecDeque::pop_front)
        };
        if let Some(err) = scripted {
            return Err(err);
        }

        match method {
            "eth_requestAccounts" => self.request_accounts().await,
            "wallet_switchEthereumChain" => self.switch_chain(&params),
            "wallet_addEthereumChain" => self.add_chain(&params),
            "eth_sendTransaction" => self.send_transaction(&params),
            _ => self.answer(method, &params),
        }
    }
}

impl WalletTransport for InMemoryWallet {
    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }
}

struct InMemoryConnector(Arc<InMemoryWallet>);

#[async_trait]
impl WalletConnector for InMemoryConnector {
    async fn detect(&self) -> Option<Arc<dyn WalletTransport>> {
        Some(Arc::clone(&self.0) as Arc<dyn WalletTransport>)
    }
}
