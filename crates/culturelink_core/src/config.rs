use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Language used for user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "zh-CN")]
    ZhCn,
    #[serde(rename = "en")]
    En,
}

impl Locale {
    /// Parse a BCP-47-ish tag. Anything starting with `en` is English, every
    /// other tag falls back to Chinese.
    pub fn from_tag(tag: &str) -> Self {
        if tag.to_ascii_lowercase().starts_with("en") {
            Locale::En
        } else {
            Locale::ZhCn
        }
    }
}

/// Application configuration stored at `~/.culturelink/config.json`.
///
/// The network and contract tables live in their own files next to it
/// (`networks.json`, `contracts.json`) and are loaded by the wallet crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub locale: Locale,
    pub log_level: String,

    /// URL of an EIP-1193 bridge reachable over HTTP. `None` means no wallet.
    pub wallet_proxy_url: Option<String>,
    pub wallet_poll_interval_ms: u64,

    /// Chain the UI asks the wallet to use when it has no preference.
    pub default_chain_id: u64,
    /// Chain whose deployments are used when the active chain has none.
    pub fallback_chain_id: u64,
    /// Chains on which write bindings may be issued.
    pub write_chain_ids: Vec<u64>,

    pub required_confirmations: u64,
    pub receipt_poll_interval_ms: u64,
    pub rpc_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            locale: Locale::ZhCn,
            log_level: "info".into(),
            wallet_proxy_url: None,
            wallet_poll_interval_ms: 1_000,
            default_chain_id: 97,
            fallback_chain_id: 97,
            write_chain_ids: vec![56, 97],
            required_confirmations: 1,
            receipt_poll_interval_ms: 1_000,
            rpc_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Returns the base config directory: `~/.culturelink/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".culturelink"))
    }

    /// Returns the config file path: `~/.culturelink/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.culturelink/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Returns the persisted wallet session path: `~/.culturelink/session.json`
    pub fn session_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("session.json"))
    }

    /// Returns the network table path: `~/.culturelink/networks.json`
    pub fn networks_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("networks.json"))
    }

    /// Returns the contract table path: `~/.culturelink/contracts.json`
    pub fn contracts_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("contracts.json"))
    }

    /// Ensures all required directories exist.
    pub fn ensure_dirs() -> Result<()> {
        for dir in [Self::base_dir()?, Self::logs_dir()?] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Load from the default location, or defaults when it is missing.
    pub fn load() -> Result<Self> {
        Ok(Self::load_or_default(&Self::config_path()?))
    }

    /// Load config from a JSON file, or return defaults if the file is missing
    /// or corrupt.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<AppConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => warn!(path = %path.display(), "Corrupt config file, using defaults: {e}"),
                },
                Err(e) => warn!(path = %path.display(), "Cannot read config file, using defaults: {e}"),
            }
        }
        Self::default()
    }

    /// Save the config to a JSON file, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Check value ranges. Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.required_confirmations == 0 {
            problems.push("required_confirmations must be at least 1".to_string());
        }
        if self.receipt_poll_interval_ms == 0 {
            problems.push("receipt_poll_interval_ms must be positive".to_string());
        }
        if self.wallet_poll_interval_ms == 0 {
            problems.push("wallet_poll_interval_ms must be positive".to_string());
        }
        if self.rpc_timeout_secs == 0 {
            problems.push("rpc_timeout_secs must be positive".to_string());
        }
        if self.write_chain_ids.is_empty() {
            problems.push("write_chain_ids must name at least one chain".to_string());
        }
        if let Some(url) = &self.wallet_proxy_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                problems.push(format!("wallet_proxy_url must be http(s): {url}"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}
