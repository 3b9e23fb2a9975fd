//! Wallet error types and their user-facing messages.

use culturelink_core::Locale;
use serde::{Deserialize, Serialize};

/// How a transaction attempt ended when it did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TxFailure {
    UserRejected,
    InsufficientFunds,
    GasEstimationFailed,
    /// Revert reason string when the node or the revert data carried one.
    ExecutionReverted(Option<String>),
    Unknown,
}

impl TxFailure {
    pub fn user_message(&self, locale: Locale) -> String {
        match (self, locale) {
            (Self::UserRejected, Locale::ZhCn) => "用户取消了交易".into(),
            (Self::UserRejected, Locale::En) => "You rejected the transaction in your wallet.".into(),
            (Self::InsufficientFunds, Locale::ZhCn) => "余额不足，无法支付交易金额或手续费".into(),
            (Self::InsufficientFunds, Locale::En) => {
                "Insufficient balance to cover the amount and fees.".into()
            }
            (Self::GasEstimationFailed, Locale::ZhCn) => "无法估算 Gas 费用，交易可能会失败".into(),
            (Self::GasEstimationFailed, Locale::En) => {
                "Unable to estimate gas; the transaction would likely fail.".into()
            }
            (Self::ExecutionReverted(Some(reason)), Locale::ZhCn) => format!("交易被回滚: {reason}"),
            (Self::ExecutionReverted(Some(reason)), Locale::En) => {
                format!("Transaction reverted: {reason}")
            }
            (Self::ExecutionReverted(None), Locale::ZhCn) => "交易被回滚".into(),
            (Self::ExecutionReverted(None), Locale::En) => "Transaction reverted.".into(),
            (Self::Unknown, Locale::ZhCn) => "交易失败，请稍后重试".into(),
            (Self::Unknown, Locale::En) => "Transaction failed, please try again.".into(),
        }
    }
}

impl std::fmt::Display for TxFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message(Locale::En))
    }
}

/// Errors surfaced by the session manager, contract access layer and
/// transaction tracker. Raw transport errors are always mapped into one of
/// these before leaving the crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error("no compatible wallet found")]
    NoWalletAvailable,

    #[error("user rejected the request")]
    UserRejected,

    #[error("wallet not connected")]
    NotConnected,

    #[error("no deployment of {name} for chain {chain_id}")]
    UnknownDeployment { name: String, chain_id: u64 },

    #[error("network switch failed: {0}")]
    NetworkSwitchFailed(String),

    #[error("chain {0} is not allowed for transactions")]
    UnsupportedChain(u64),

    #[error("wallet is on chain {active}, binding requires chain {required}")]
    WrongNetwork { required: u64, active: u64 },

    #[error("binding was issued before the wallet session changed")]
    StaleBinding,

    #[error("{contract} has no function {function}")]
    UnknownFunction { contract: String, function: String },

    #[error("transaction failed: {0}")]
    Transaction(TxFailure),

    #[error("wallet request failed: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Flat classification of every error the UI can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoWalletAvailable,
    UserRejected,
    NotConnected,
    UnknownDeployment,
    NetworkSwitchFailed,
    UnsupportedChain,
    WrongNetwork,
    StaleBinding,
    InsufficientFunds,
    GasEstimationFailed,
    ExecutionReverted,
    UnknownTransactionFailure,
    Configuration,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoWalletAvailable => ErrorKind::NoWalletAvailable,
            Self::UserRejected => ErrorKind::UserRejected,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::UnknownDeployment { .. } => ErrorKind::UnknownDeployment,
            Self::NetworkSwitchFailed(_) => ErrorKind::NetworkSwitchFailed,
            Self::UnsupportedChain(_) => ErrorKind::UnsupportedChain,
            Self::WrongNetwork { .. } => ErrorKind::WrongNetwork,
            Self::StaleBinding => ErrorKind::StaleBinding,
            Self::Transaction(failure) => failure.kind(),
            Self::Transport(_) => ErrorKind::UnknownTransactionFailure,
            Self::UnknownFunction { .. } | Self::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the user may simply try again. Configuration problems and a
    /// missing wallet need something else to change first.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NoWalletAvailable
                | Self::UnknownDeployment { .. }
                | Self::UnknownFunction { .. }
                | Self::Config(_)
        )
    }

    /// Short localized text for the UI. Internal details stay in the logs.
    pub fn user_message(&self, locale: Locale) -> String {
        match (self, locale) {
            (Self::NoWalletAvailable, Locale::ZhCn) => "未检测到钱包，请先安装 MetaMask".into(),
            (Self::NoWalletAvailable, Locale::En) => {
                "No wallet detected. Please install MetaMask.".into()
            }
            (Self::UserRejected, Locale::ZhCn) => "用户拒绝了请求".into(),
            (Self::UserRejected, Locale::En) => "You rejected the request in your wallet.".into(),
            (Self::NotConnected, Locale::ZhCn) => "请先连接钱包".into(),
            (Self::NotConnected, Locale::En) => "Please connect your wallet first.".into(),
            (Self::UnknownDeployment { .. }, Locale::ZhCn) => "当前网络未部署该合约".into(),
            (Self::UnknownDeployment { .. }, Locale::En) => {
                "This contract is not deployed on the current network.".into()
            }
            (Self::NetworkSwitchFailed(_), Locale::ZhCn) => "切换网络失败".into(),
            (Self::NetworkSwitchFailed(_), Locale::En) => "Failed to switch network.".into(),
            (Self::UnsupportedChain(_), Locale::ZhCn) => "请切换到 BSC 主网或测试网".into(),
            (Self::UnsupportedChain(_), Locale::En) => {
                "Please switch to BSC Mainnet or Testnet.".into()
            }
            (Self::WrongNetwork { .. }, Locale::ZhCn) => "钱包网络与当前页面不一致，请切换网络".into(),
            (Self::WrongNetwork { .. }, Locale::En) => {
                "Your wallet is on a different network. Please switch networks.".into()
            }
            (Self::StaleBinding, Locale::ZhCn) => "钱包状态已变化，请重新操作".into(),
            (Self::StaleBinding, Locale::En) => "Your wallet changed. Please try again.".into(),
            (Self::Transaction(failure), _) => failure.user_message(locale),
            (Self::Transport(_), _) => TxFailure::Unknown.user_message(locale),
            (Self::UnknownFunction { .. } | Self::Config(_), Locale::ZhCn) => "应用配置错误".into(),
            (Self::UnknownFunction { .. } | Self::Config(_), Locale::En) => {
                "Application configuration error.".into()
            }
        }
    }
}

impl TxFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserRejected => ErrorKind::UserRejected,
            Self::InsufficientFunds => ErrorKind::InsufficientFunds,
            Self::GasEstimationFailed => ErrorKind::GasEstimationFailed,
            Self::ExecutionReverted(_) => ErrorKind::ExecutionReverted,
            Self::Unknown => ErrorKind::UnknownTransactionFailure,
        }
    }
}

impl From<TxFailure> for WalletError {
    fn from(failure: TxFailure) -> Self {
        match failure {
            TxFailure::UserRejected => WalletError::UserRejected,
            other => WalletError::Transaction(other),
        }
    }
}
