use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::format::parse_quantity;

pub const BSC_MAINNET: u64 = 56;
pub const BSC_TESTNET: u64 = 97;

/// Network-specific configuration, including everything a wallet needs to
/// register the network with `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub currency_decimals: u8,
    pub explorer_url: String,
}

impl ChainConfig {
    /// Parameters for `wallet_addEthereumChain` (EIP-3085).
    pub fn add_chain_params(&self) -> Value {
        json!([{
            "chainId": to_hex_chain_id(self.chain_id),
            "chainName": self.name,
            "nativeCurrency": {
                "name": self.currency_name,
                "symbol": self.currency_symbol,
                "decimals": self.currency_decimals,
            },
            "rpcUrls": [self.rpc_url],
            "blockExplorerUrls": [self.explorer_url],
        }])
    }

    /// Explorer link for a transaction hash.
    pub fn tx_url(&self, hash: &str) -> String {
        format!("{}/tx/{hash}", self.explorer_url.trim_end_matches('/'))
    }

    /// Explorer link for an address.
    pub fn address_url(&self, address: &str) -> String {
        format!("{}/address/{address}", self.explorer_url.trim_end_matches('/'))
    }
}

/// Returns the built-in network table: BSC mainnet and testnet.
pub fn default_networks() -> BTreeMap<u64, ChainConfig> {
    let mut networks = BTreeMap::new();

    networks.insert(
        BSC_MAINNET,
        ChainConfig {
            chain_id: BSC_MAINNET,
            name: "BNB Smart Chain Mainnet".to_string(),
            rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            currency_name: "BNB".to_string(),
            currency_symbol: "BNB".to_string(),
            currency_decimals: 18,
            explorer_url: "https://bscscan.com".to_string(),
        },
    );

    networks.insert(
        BSC_TESTNET,
        ChainConfig {
            chain_id: BSC_TESTNET,
            name: "BNB Smart Chain Testnet".to_string(),
            rpc_url: "https://data-seed-prebsc-1-s1.binance.org:8545".to_string(),
            currency_name: "tBNB".to_string(),
            currency_symbol: "tBNB".to_string(),
            currency_decimals: 18,
            explorer_url: "https://testnet.bscscan.com".to_string(),
        },
    );

    networks
}

/// Static chain id → network configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRegistry {
    networks: BTreeMap<u64, ChainConfig>,
}

impl NetworkRegistry {
    /// Create a registry populated with [`default_networks`].
    pub fn with_defaults() -> Self {
        Self {
            networks: default_networks(),
        }
    }

    pub fn from_configs(configs: impl IntoIterator<Item = ChainConfig>) -> Self {
        Self {
            networks: configs.into_iter().map(|c| (c.chain_id, c)).collect(),
        }
    }

    /// Load a JSON array of [`ChainConfig`]s. Missing or corrupt files fall
    /// back to the defaults; entries with invalid RPC URLs are skipped.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::with_defaults();
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|data| {
                serde_json::from_str::<Vec<ChainConfig>>(&data).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(configs) => {
                let valid = configs.into_iter().filter(|c| {
                    let ok = validate_url(&c.rpc_url);
                    if !ok {
                        warn!(chain_id = c.chain_id, url = %c.rpc_url, "skipping network with invalid RPC URL");
                    }
                    ok
                });
                Self::from_configs(valid)
            }
            Err(e) => {
                warn!(path = %path.display(), "Cannot load network table, using defaults: {e}");
                Self::with_defaults()
            }
        }
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.networks.get(&chain_id)
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.networks.contains_key(&chain_id)
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.networks.keys().copied()
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}

/// `97` → `"0x61"`, the form wallets expect in `chainId` fields.
pub fn to_hex_chain_id(chain_id: u64) -> String {
    format!("{chain_id:#x}")
}

/// Decode a chain id from `eth_chainId` or a `chainChanged` payload.
pub fn parse_chain_id(value: &Value) -> Option<u64> {
    parse_quantity(value).and_then(|v| u64::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_bsc_networks() {
        let registry = NetworkRegistry::with_defaults();
        assert!(registry.contains(BSC_MAINNET));
        assert!(registry.contains(BSC_TESTNET));
        assert_eq!(registry.chain_ids().collect::<Vec<_>>(), vec![56, 97]);
    }

    #[test]
    fn default_rpc_urls_are_https() {
        for config in default_networks().values() {
            assert!(
                config.rpc_url.starts_with("https://"),
                "RPC URL must be HTTPS: {}",
                config.rpc_url
            );
        }
    }

    #[test]
    fn add_chain_params_shape() {
        let registry = NetworkRegistry::with_defaults();
        let params = registry.get(BSC_TESTNET).unwrap().add_chain_params();
        let entry = &params[0];
        assert_eq!(entry["chainId"], "0x61");
        assert_eq!(entry["nativeCurrency"]["symbol"], "tBNB");
        assert_eq!(entry["nativeCurrency"]["decimals"], 18);
        assert_eq!(entry["rpcUrls"][0], "https://data-seed-prebsc-1-s1.binance.org:8545");
        assert_eq!(entry["blockExplorerUrls"][0], "https://testnet.bscscan.com");
    }

    #[test]
    fn explorer_links() {
        let registry = NetworkRegistry::with_defaults();
        let bsc = registry.get(BSC_MAINNET).unwrap();
        assert_eq!(bsc.tx_url("0xabc"), "https://bscscan.com/tx/0xabc");
        assert_eq!(bsc.address_url("0xdef"), "https://bscscan.com/address/0xdef");
    }

    #[test]
    fn load_ignores_unknown_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("networks.json");
        let mut entry = serde_json::to_value(default_networks().remove(&BSC_MAINNET).unwrap()).unwrap();
        entry["is_custom_rpc"] = json!(true);
        std::fs::write(&path, serde_json::to_string(&json!([entry])).unwrap()).unwrap();

        let registry = NetworkRegistry::load_or_default(&path);
        assert_eq!(registry.chain_ids().collect::<Vec<_>>(), vec![BSC_MAINNET]);
        assert_eq!(registry.get(BSC_MAINNET).unwrap().rpc_url, "https://bsc-dataseed.binance.org");
    }

    #[test]
    fn load_skips_invalid_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("networks.json");
        let mut good = default_networks().remove(&BSC_TESTNET).unwrap();
        good.rpc_url = "http://localhost:8545".into();
        let mut bad = good.clone();
        bad.chain_id = 1337;
        bad.rpc_url = "file:///etc/passwd".into();
        std::fs::write(&path, serde_json::to_string(&vec![good, bad]).unwrap()).unwrap();

        let registry = NetworkRegistry::load_or_default(&path);
        assert!(registry.contains(BSC_TESTNET));
        assert!(!registry.contains(1337));
        assert!(!registry.contains(BSC_MAINNET));
    }

    #[test]
    fn load_missing_or_corrupt_returns_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = NetworkRegistry::load_or_default(&tmp.path().join("none.json"));
        assert!(missing.contains(BSC_MAINNET));

        let path = tmp.path().join("networks.json");
        std::fs::write(&path, "{").unwrap();
        assert!(NetworkRegistry::load_or_default(&path).contains(BSC_TESTNET));
    }

    #[test]
    fn validate_url_cases() {
        assert!(validate_url("https://rpc.example.com"));
        assert!(validate_url("http://localhost:8545"));
        assert!(!validate_url(""));
        assert!(!validate_url("not a url"));
        assert!(!validate_url("ftp://server.com"));
    }

    #[test]
    fn chain_id_encoding() {
        assert_eq!(to_hex_chain_id(56), "0x38");
        assert_eq!(to_hex_chain_id(97), "0x61");
        assert_eq!(parse_chain_id(&json!("0x38")), Some(56));
        assert_eq!(parse_chain_id(&json!(97)), Some(97));
        assert_eq!(parse_chain_id(&json!("0x10000000000000000")), None);
        assert_eq!(parse_chain_id(&json!([])), None);
    }
}
