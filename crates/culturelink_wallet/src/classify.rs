//! Mapping of transport error shapes onto [`TxFailure`].
//!
//! Wallets nest the interesting part of an error at different depths
//! (MetaMask wraps node errors in `-32603 Internal JSON-RPC error` with the
//! real error under `data`, sometimes again under `data.originalError`). All
//! of that sniffing lives here and nowhere else.

use serde_json::Value;

use crate::error::TxFailure;
use crate::transport::{TransportError, codes};

const MAX_DEPTH: usize = 8;

/// `Error(string)` selector.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// `Panic(uint256)` selector.
const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Everything extracted from one error, flattened across nesting levels.
#[derive(Debug, Default)]
struct ErrorFacts {
    codes: Vec<i64>,
    messages: Vec<String>,
    hex_data: Vec<String>,
}

impl ErrorFacts {
    fn gather(err: &TransportError) -> Self {
        let mut facts = ErrorFacts {
            codes: vec![err.code],
            messages: vec![err.message.clone()],
            hex_data: Vec::new(),
        };
        if let Some(data) = &err.data {
            facts.walk(data, 0);
        }
        facts
    }

    fn walk(&mut self, value: &Value, depth: usize) {
        if depth > MAX_DEPTH {
            return;
        }
        match value {
            Value::String(s) if s.starts_with("0x") => self.hex_data.push(s.clone()),
            Value::Object(map) => {
                for (key, child) in map {
                    match (key.as_str(), child) {
                        ("code", Value::Number(n)) => {
                            if let Some(code) = n.as_i64() {
                                self.codes.push(code);
                            }
                        }
                        ("message" | "reason", Value::String(s)) => self.messages.push(s.clone()),
                        _ => self.walk(child, depth + 1),
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(item, depth + 1);
                }
            }
            _ => {}
        }
    }

    fn has_code(&self, code: i64) -> bool {
        self.codes.contains(&code)
    }

    fn mentions(&self, needles: &[&str]) -> bool {
        self.messages.iter().any(|m| {
            let lower = m.to_lowercase();
            needles.iter().any(|n| lower.contains(n))
        })
    }
}

/// The user dismissed or declined a wallet prompt.
pub fn is_user_rejection(err: &TransportError) -> bool {
    let facts = ErrorFacts::gather(err);
    facts.has_code(codes::USER_REJECTED)
        || facts.mentions(&["user rejected", "user denied", "action_rejected", "user cancelled"])
}

/// The wallet does not know the requested chain and it must be added first.
pub fn is_unrecognized_chain(err: &TransportError) -> bool {
    let facts = ErrorFacts::gather(err);
    facts.has_code(codes::UNRECOGNIZED_CHAIN)
        || facts.mentions(&["unrecognized chain", "try adding the chain"])
}

/// Classify a failed submission, estimation or call into the closed
/// [`TxFailure`] set.
pub fn classify_transaction_error(err: &TransportError) -> TxFailure {
    let facts = ErrorFacts::gather(err);

    if facts.has_code(codes::USER_REJECTED)
        || facts.mentions(&["user rejected", "user denied", "action_rejected"])
    {
        return TxFailure::UserRejected;
    }

    if let Some(reason) = facts.hex_data.iter().find_map(|d| decode_revert_data(d)) {
        return TxFailure::ExecutionReverted(Some(reason));
    }
    if let Some(reason) = facts.messages.iter().find_map(|m| revert_reason_from_message(m)) {
        return TxFailure::ExecutionReverted(Some(reason));
    }
    if facts.has_code(codes::EXECUTION_ERROR)
        || facts.mentions(&["execution reverted", "call_exception", "transaction reverted"])
    {
        return TxFailure::ExecutionReverted(None);
    }

    if facts.mentions(&["insufficient funds", "insufficient balance"]) {
        return TxFailure::InsufficientFunds;
    }

    if facts.mentions(&[
        "cannot estimate gas",
        "unpredictable_gas_limit",
        "gas required exceeds",
        "intrinsic gas too low",
        "out of gas",
    ]) {
        return TxFailure::GasEstimationFailed;
    }

    TxFailure::Unknown
}

/// Pull the reason out of node messages such as
/// `execution reverted: insufficient reward pool` or
/// `reverted with reason string 'insufficient reward pool'`.
fn revert_reason_from_message(message: &str) -> Option<String> {
    // ASCII lowering keeps byte offsets valid for slicing `message`.
    let lower = message.to_ascii_lowercase();

    if let Some(pos) = lower.find("reverted with reason string") {
        let rest = &message[pos + "reverted with reason string".len()..];
        let reason = rest.trim().trim_matches(|c| c == '\'' || c == '"');
        return (!reason.is_empty()).then(|| reason.to_string());
    }

    for marker in ["execution reverted:", "revert "] {
        if let Some(pos) = lower.find(marker) {
            let reason = message[pos + marker.len()..].trim();
            if !reason.is_empty() {
                return Some(reason.to_string());
            }
        }
    }
    None
}

/// Decode ABI revert data: `Error(string)` yields its message, `Panic(uint256)`
/// yields `panic code 0x..`. Anything else is `None`.
pub fn decode_revert_data(data: &str) -> Option<String> {
    let raw = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(raw).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    let (selector, body) = bytes.split_at(4);

    if selector == ERROR_STRING_SELECTOR {
        let offset = read_word_as_usize(body, 0)?;
        let len = read_word_as_usize(body, offset)?;
        let start = offset.checked_add(32)?;
        let end = start.checked_add(len)?;
        let text = body.get(start..end)?;
        return String::from_utf8(text.to_vec()).ok();
    }
    if selector == PANIC_SELECTOR {
        let word = body.get(0..32)?;
        let code = word.iter().skip_while(|b| **b == 0).fold(0u64, |acc, b| {
            acc.saturating_mul(256).saturating_add(u64::from(*b))
        });
        return Some(format!("panic code {code:#x}"));
    }
    None
}

/// Read a 32-byte big-endian word at `at` that must fit in a `usize`.
fn read_word_as_usize(body: &[u8], at: usize) -> Option<usize> {
    let word = body.get(at..at.checked_add(32)?)?;
    let (high, low) = word.split_at(24);
    if high.iter().any(|b| *b != 0) {
        return None;
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(low);
    usize::try_from(u64::from_be_bytes(buf)).ok()
}
