pub mod config;
pub mod logging;
pub mod session;

pub use config::{AppConfig, Locale};
pub use session::{FileReconnectFlag, MemoryReconnectFlag, PersistedSession, ReconnectFlag};
