use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::AppConfig;

/// Wallet session state that survives a restart.
///
/// Only the "was previously connected" flag is durable; the account and chain
/// are always re-read from the wallet.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PersistedSession {
    pub was_connected: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersistedSession {
    /// Load session state from an explicit path. Returns `Default` if the file
    /// is missing or corrupt (never errors on bad JSON).
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session: {}", path.display()))?;
        Ok(serde_json::from_str(&content).unwrap_or_default())
    }

    /// Persist session state to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to save session: {}", path.display()))?;
        Ok(())
    }
}

/// Storage for the reconnect flag consumed by the wallet session manager.
pub trait ReconnectFlag: Send + Sync {
    fn was_connected(&self) -> bool;
    fn set_connected(&self, connected: bool);
}

/// File-backed flag. Write failures are logged and otherwise ignored: losing
/// the flag only costs the user one extra click at next startup.
#[derive(Debug)]
pub struct FileReconnectFlag {
    path: PathBuf,
    cached: Mutex<Option<bool>>,
}

impl FileReconnectFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    /// Flag stored at `~/.culturelink/session.json`.
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(AppConfig::session_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReconnectFlag for FileReconnectFlag {
    fn was_connected(&self) -> bool {
        let mut cached = self.cached.lock();
        if let Some(value) = *cached {
            return value;
        }
        let value = match PersistedSession::load_from(&self.path) {
            Ok(state) => state.was_connected,
            Err(e) => {
                warn!(path = %self.path.display(), "Cannot read session file: {e:#}");
                false
            }
        };
        *cached = Some(value);
        value
    }

    fn set_connected(&self, connected: bool) {
        let mut cached = self.cached.lock();
        if *cached == Some(connected) {
            return;
        }
        let state = PersistedSession {
            was_connected: connected,
            updated_at: Some(Utc::now()),
        };
        match state.save_to(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), connected, "session flag saved"),
            Err(e) => warn!(path = %self.path.display(), "Cannot save session file: {e:#}"),
        }
        *cached = Some(connected);
    }
}

/// Process-local flag for tests and embedders without a writable home.
#[derive(Debug, Default)]
pub struct MemoryReconnectFlag {
    value: Mutex<bool>,
}

impl MemoryReconnectFlag {
    pub fn new(initial: bool) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

impl ReconnectFlag for MemoryReconnectFlag {
    fn was_connected(&self) -> bool {
        *self.value.lock()
    }

    fn set_connected(&self, connected: bool) {
        *self.value.lock() = connected;
    }
}
