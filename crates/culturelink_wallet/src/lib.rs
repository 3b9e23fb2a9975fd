//! Wallet session, contract access and transaction tracking for CultureLink.

pub mod classify;
pub mod contracts;
pub mod error;
pub mod format;
pub mod networks;
pub mod session;
pub mod tracker;
pub mod transport;

pub use contracts::{ContractAccess, ContractBinding, ContractDescriptor, ContractRegistry};
pub use error::{ErrorKind, TxFailure, WalletError};
pub use format::Account;
pub use networks::{ChainConfig, NetworkRegistry};
pub use session::{ConnectionState, SessionGuard, WalletSession, WalletSessionManager};
pub use tracker::{PendingTransaction, TransactionTracker, TxOutcome, TxReceipt, TxStatus};
pub use transport::{
    NoWallet, RpcProvider, Subscription, TransportError, WalletConnector, WalletEvent,
    WalletTransport,
};
