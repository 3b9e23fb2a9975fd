//! Contract registry and bindings.
//!
//! A contract is known by its logical name (`IdentityContract`,
//! `CulturalExchange`, ...). The registry maps `(name, chain id)` to a
//! deployed address plus the ABI, and [`ContractAccess`] turns that into
//! bindings: read bindings talk to the chain's public RPC endpoint, write
//! bindings send through the connected wallet and go stale as soon as the
//! session changes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::classify::classify_transaction_error;
use crate::error::WalletError;
use crate::format::{Account, is_valid_address, to_quantity};
use crate::networks::{BSC_MAINNET, BSC_TESTNET, NetworkRegistry};
use crate::session::{SessionGuard, WalletSessionManager};
use crate::tracker::PendingTransaction;
use crate::transport::rpc::JsonRpcClient;
use crate::transport::{RpcProvider, TransportError, WalletTransport};

/// Deployment table and interface of one logical contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDescriptor {
    pub logical_name: String,
    pub address_by_chain: BTreeMap<u64, String>,
    /// JSON ABI array.
    #[serde(default = "empty_interface")]
    pub interface_spec: Value,
}

fn empty_interface() -> Value {
    json!([])
}

impl ContractDescriptor {
    pub fn new(logical_name: impl Into<String>, interface_spec: Value) -> Self {
        Self {
            logical_name: logical_name.into(),
            address_by_chain: BTreeMap::new(),
            interface_spec,
        }
    }

    pub fn deployed_at(mut self, chain_id: u64, address: impl Into<String>) -> Self {
        self.address_by_chain.insert(chain_id, address.into());
        self
    }
}

/// Static `(logical name, chain id) → address` table. Immutable once built.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, ContractDescriptor>,
    fallback_chain_id: u64,
}

impl ContractRegistry {
    pub fn empty(fallback_chain_id: u64) -> Self {
        Self {
            contracts: BTreeMap::new(),
            fallback_chain_id,
        }
    }

    /// Build from descriptors, rejecting duplicate names, malformed addresses
    /// and interfaces that are not ABI arrays.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ContractDescriptor>,
        fallback_chain_id: u64,
    ) -> Result<Self> {
        let mut contracts = BTreeMap::new();
        for descriptor in descriptors {
            for (chain_id, address) in &descriptor.address_by_chain {
                anyhow::ensure!(
                    is_valid_address(address),
                    "{}: invalid address {address} for chain {chain_id}",
                    descriptor.logical_name
                );
            }
            anyhow::ensure!(
                descriptor.interface_spec.is_array(),
                "{}: interface must be an ABI array",
                descriptor.logical_name
            );
            let name = descriptor.logical_name.clone();
            anyhow::ensure!(
                contracts.insert(name.clone(), descriptor).is_none(),
                "duplicate contract name {name}"
            );
        }
        Ok(Self {
            contracts,
            fallback_chain_id,
        })
    }

    /// Load a JSON array of [`ContractDescriptor`]s.
    pub fn load(path: &Path, fallback_chain_id: u64) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read contracts: {}", path.display()))?;
        let descriptors: Vec<ContractDescriptor> = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse contracts: {}", path.display()))?;
        Self::from_descriptors(descriptors, fallback_chain_id)
            .with_context(|| format!("Invalid contract table: {}", path.display()))
    }

    /// Like [`load`](Self::load), but a missing or broken file yields an empty
    /// registry.
    pub fn load_or_empty(path: &Path, fallback_chain_id: u64) -> Self {
        if !path.exists() {
            return Self::empty(fallback_chain_id);
        }
        Self::load(path, fallback_chain_id).unwrap_or_else(|e| {
            warn!("Cannot load contract table, no contracts available: {e:#}");
            Self::empty(fallback_chain_id)
        })
    }

    pub fn fallback_chain_id(&self) -> u64 {
        self.fallback_chain_id
    }

    pub fn descriptor(&self, logical_name: &str) -> Option<&ContractDescriptor> {
        self.contracts.get(logical_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.contracts.keys().map(String::as_str)
    }

    /// Address of `logical_name` on `chain_id`, or on the fallback chain when
    /// there is no deployment on `chain_id`.
    pub fn resolve_address(&self, logical_name: &str, chain_id: u64) -> Result<String, WalletError> {
        self.resolve(logical_name, chain_id).map(|(address, _)| address)
    }

    /// Address plus the chain it actually lives on.
    fn resolve(&self, logical_name: &str, chain_id: u64) -> Result<(String, u64), WalletError> {
        let unknown = || WalletError::UnknownDeployment {
            name: logical_name.to_string(),
            chain_id,
        };
        let descriptor = self.contracts.get(logical_name).ok_or_else(unknown)?;
        [chain_id, self.fallback_chain_id]
            .into_iter()
            .find_map(|chain| {
                descriptor
                    .address_by_chain
                    .get(&chain)
                    .map(|address| (address.clone(), chain))
            })
            .ok_or_else(unknown)
    }
}

#[derive(Clone)]
enum Access {
    Read(Arc<dyn RpcProvider>),
    Write {
        signer: Account,
        transport: Arc<dyn WalletTransport>,
        guard: SessionGuard,
    },
}

/// A contract at one address on one chain, ready to be called.
#[derive(Clone)]
pub struct ContractBinding {
    name: String,
    address: String,
    chain_id: u64,
    interface: Arc<Value>,
    access: Access,
}

impl std::fmt::Debug for ContractBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractBinding")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("signer", &self.signer())
            .finish()
    }
}

impl ContractBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn interface(&self) -> &Value {
        &self.interface
    }

    /// Account transactions are attributed to. `None` for read bindings.
    pub fn signer(&self) -> Option<&Account> {
        match &self.access {
            Access::Read(_) => None,
            Access::Write { signer, .. } => Some(signer),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.access, Access::Write { .. })
    }

    /// A write binding whose session changed since it was issued.
    pub fn is_stale(&self) -> bool {
        match &self.access {
            Access::Read(_) => false,
            Access::Write { guard, .. } => !guard.is_current(),
        }
    }

    fn function(&self, function: &str) -> Option<&Value> {
        self.interface.as_array()?.iter().find(|entry| {
            entry.get("type").and_then(Value::as_str).unwrap_or("function") == "function"
                && entry.get("name").and_then(Value::as_str) == Some(function)
        })
    }

    pub fn has_function(&self, function: &str) -> bool {
        self.function(function).is_some()
    }

    /// `view` / `pure` functions (or legacy `constant: true`).
    pub fn is_read_only(&self, function: &str) -> bool {
        self.function(function).is_some_and(|entry| {
            matches!(
                entry.get("stateMutability").and_then(Value::as_str),
                Some("view" | "pure")
            ) || entry.get("constant").and_then(Value::as_bool) == Some(true)
        })
    }

    fn require_function(&self, function: &str) -> Result<(), WalletError> {
        if self.has_function(function) {
            Ok(())
        } else {
            Err(WalletError::UnknownFunction {
                contract: self.name.clone(),
                function: function.to_string(),
            })
        }
    }

    fn provider(&self) -> &dyn RpcProvider {
        match &self.access {
            Access::Read(provider) => provider.as_ref(),
            Access::Write { transport, .. } => transport.as_ref(),
        }
    }

    /// `eth_call` with ABI-encoded `calldata`; returns the raw result.
    pub async fn call(&self, function: &str, calldata: &str) -> Result<Value, WalletError> {
        self.require_function(function)?;
        let mut request = json!({ "to": self.address, "data": calldata });
        if let Some(signer) = self.signer() {
            request["from"] = json!(signer.as_str());
        }
        debug!(contract = %self.name, function, chain_id = self.chain_id, "eth_call");
        self.provider()
            .request("eth_call", json!([request, "latest"]))
            .await
            .map_err(|e| tx_error(&self.name, function, &e))
    }

    /// Estimate gas and submit a transaction through the wallet.
    ///
    /// The session guard is checked before estimating and again right before
    /// submitting, so nothing is sent for an account or chain the user has
    /// already moved away from.
    pub async fn send(
        &self,
        function: &str,
        calldata: &str,
        value_wei: u128,
    ) -> Result<PendingTransaction, WalletError> {
        let Access::Write {
            signer,
            transport,
            guard,
        } = &self.access
        else {
            return Err(WalletError::NotConnected);
        };
        self.require_function(function)?;
        if !guard.is_current() {
            return Err(WalletError::StaleBinding);
        }

        let request = json!({
            "from": signer.as_str(),
            "to": self.address,
            "data": calldata,
            "value": to_quantity(value_wei),
        });
        let gas = transport
            .request("eth_estimateGas", json!([request]))
            .await
            .map_err(|e| tx_error(&self.name, function, &e))?;

        if !guard.is_current() {
            return Err(WalletError::StaleBinding);
        }
        let mut submitted = request.clone();
        submitted["gas"] = gas;
        let hash = transport
            .request("eth_sendTransaction", json!([submitted]))
            .await
            .map_err(|e| tx_error(&self.name, function, &e))?;
        let hash = hash
            .as_str()
            .ok_or_else(|| WalletError::Transport(format!("invalid transaction hash: {hash}")))?
            .to_string();

        info!(contract = %self.name, function, hash = %hash, chain_id = self.chain_id, "transaction submitted");
        Ok(PendingTransaction::new(hash).with_request(request))
    }
}

fn tx_error(contract: &str, function: &str, err: &TransportError) -> WalletError {
    let failure = classify_transaction_error(err);
    warn!(contract, function, code = err.code, ?failure, "contract request failed: {}", err.message);
    WalletError::from(failure)
}

struct BindingCache {
    epoch: u64,
    bindings: HashMap<(String, u64), ContractBinding>,
}

/// Hands out read and write bindings for registered contracts.
pub struct ContractAccess {
    registry: ContractRegistry,
    networks: NetworkRegistry,
    session: Arc<WalletSessionManager>,
    write_chains: BTreeSet<u64>,
    read_providers: HashMap<u64, Arc<dyn RpcProvider>>,
    rpc_timeout: Duration,
    cache: Mutex<BindingCache>,
}

impl ContractAccess {
    pub fn new(registry: ContractRegistry, session: Arc<WalletSessionManager>) -> Self {
        let networks = session.networks().clone();
        let epoch = session.epoch();
        Self {
            registry,
            networks,
            session,
            write_chains: BTreeSet::from([BSC_MAINNET, BSC_TESTNET]),
            read_providers: HashMap::new(),
            rpc_timeout: Duration::from_secs(30),
            cache: Mutex::new(BindingCache {
                epoch,
                bindings: HashMap::new(),
            }),
        }
    }

    /// Chains on which write bindings may be issued.
    pub fn with_write_chains(mut self, chains: impl IntoIterator<Item = u64>) -> Self {
        self.write_chains = chains.into_iter().collect();
        self
    }

    /// Use `provider` for reads on `chain_id` instead of the configured RPC URL.
    pub fn with_read_provider(mut self, chain_id: u64, provider: Arc<dyn RpcProvider>) -> Self {
        self.read_providers.insert(chain_id, provider);
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Drop every cached binding.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock();
        cache.bindings.clear();
        cache.epoch = self.session.epoch();
        debug!(epoch = cache.epoch, "contract binding cache invalidated");
    }

    fn read_provider(&self, chain_id: u64) -> Result<Arc<dyn RpcProvider>, WalletError> {
        if let Some(provider) = self.read_providers.get(&chain_id) {
            return Ok(Arc::clone(provider));
        }
        let config = self
            .networks
            .get(chain_id)
            .ok_or_else(|| WalletError::Config(format!("no network configuration for chain {chain_id}")))?;
        let client = JsonRpcClient::with_timeout(config.rpc_url.clone(), self.rpc_timeout)
            .map_err(|e| WalletError::Config(e.message))?;
        Ok(Arc::new(client))
    }

    fn interface_of(&self, logical_name: &str) -> Arc<Value> {
        Arc::new(
            self.registry
                .descriptor(logical_name)
                .map(|d| d.interface_spec.clone())
                .unwrap_or_else(empty_interface),
        )
    }

    /// Binding backed by the chain's network provider. No wallet needed.
    pub fn get_read_binding(&self, logical_name: &str, chain_id: u64) -> Result<ContractBinding, WalletError> {
        let key = (logical_name.to_string(), chain_id);
        {
            let mut cache = self.cache.lock();
            let epoch = self.session.epoch();
            if cache.epoch != epoch {
                cache.bindings.clear();
                cache.epoch = epoch;
            }
            if let Some(binding) = cache.bindings.get(&key) {
                return Ok(binding.clone());
            }
        }

        let (address, deployed_on) = self.registry.resolve(logical_name, chain_id)?;
        let binding = ContractBinding {
            name: logical_name.to_string(),
            address,
            chain_id: deployed_on,
            interface: self.interface_of(logical_name),
            access: Access::Read(self.read_provider(deployed_on)?),
        };
        debug!(contract = logical_name, chain_id = deployed_on, "read binding created");

        let mut cache = self.cache.lock();
        if cache.epoch == self.session.epoch() {
            cache.bindings.insert(key, binding.clone());
        }
        Ok(binding)
    }

    /// Binding that sends transactions as `signer` through the wallet.
    ///
    /// Never degrades to a read binding: without a matching connected account
    /// this is `NotConnected`.
    pub fn get_write_binding(
        &self,
        logical_name: &str,
        signer: Option<&Account>,
        chain_id: u64,
    ) -> Result<ContractBinding, WalletError> {
        let signer = signer.ok_or(WalletError::NotConnected)?;
        // Taken first: a change between here and the snapshot makes the
        // binding stale instead of mislabelled.
        let guard = self.session.guard();
        let session = self.session.snapshot();
        let (Some(active), Some(active_chain)) = (session.account(), session.chain_id()) else {
            return Err(WalletError::NotConnected);
        };
        if !active.matches(signer) {
            return Err(WalletError::NotConnected);
        }
        if !self.write_chains.contains(&chain_id) {
            return Err(WalletError::UnsupportedChain(chain_id));
        }
        if active_chain != chain_id {
            return Err(WalletError::WrongNetwork {
                required: chain_id,
                active: active_chain,
            });
        }
        let transport = self.session.transport().ok_or(WalletError::NotConnected)?;

        let (address, deployed_on) = self.registry.resolve(logical_name, chain_id)?;
        if deployed_on != chain_id {
            return Err(WalletError::UnknownDeployment {
                name: logical_name.to_string(),
                chain_id,
            });
        }

        Ok(ContractBinding {
            name: logical_name.to_string(),
            address,
            chain_id,
            interface: self.interface_of(logical_name),
            access: Access::Write {
                signer: active.clone(),
                transport,
                guard,
            },
        })
    }

    /// Write binding for the session's current account and chain.
    pub fn session_write_binding(&self, logical_name: &str) -> Result<ContractBinding, WalletError> {
        let session = self.session.snapshot();
        let chain_id = session.chain_id().ok_or(WalletError::NotConnected)?;
        self.get_write_binding(logical_name, session.account(), chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::NoWallet;
    use culturelink_core::MemoryReconnectFlag;

    const IDENTITY: &str = "0x1111111111111111111111111111111111111111";
    const IDENTITY_MAIN: &str = "0x2222222222222222222222222222222222222222";

    fn abi() -> Value {
        json!([
            { "type": "function", "name": "getProfile", "stateMutability": "view", "inputs": [], "outputs": [] },
            { "type": "function", "name": "register", "stateMutability": "nonpayable", "inputs": [], "outputs": [] },
            { "type": "event", "name": "Registered", "inputs": [] },
            { "name": "legacyGetter", "constant": true, "inputs": [], "outputs": [] },
        ])
    }

    fn registry() -> ContractRegistry {
        ContractRegistry::from_descriptors(
            [ContractDescriptor::new("IdentityContract", abi())
                .deployed_at(97, IDENTITY)
                .deployed_at(56, IDENTITY_MAIN)],
            97,
        )
        .unwrap()
    }

    fn access() -> ContractAccess {
        let session = Arc::new(WalletSessionManager::new(
            Arc::new(NoWallet),
            NetworkRegistry::with_defaults(),
            Arc::new(MemoryReconnectFlag::new(false)),
        ));
        ContractAccess::new(registry(), session)
    }

    #[test]
    fn resolve_exact_and_fallback() {
        let registry = registry();
        assert_eq!(registry.resolve_address("IdentityContract", 56).unwrap(), IDENTITY_MAIN);
        assert_eq!(registry.resolve_address("IdentityContract", 97).unwrap(), IDENTITY);
        // No deployment on 1: the fallback chain's address is used.
        assert_eq!(registry.resolve_address("IdentityContract", 1).unwrap(), IDENTITY);
    }

    #[test]
    fn resolve_unknown_name() {
        let err = registry().resolve_address("Marketplace", 97).unwrap_err();
        assert_eq!(
            err,
            WalletError::UnknownDeployment {
                name: "Marketplace".into(),
                chain_id: 97
            }
        );
    }

    #[test]
    fn resolve_without_fallback_deployment() {
        let registry = ContractRegistry::from_descriptors(
            [ContractDescriptor::new("Points", json!([])).deployed_at(56, IDENTITY_MAIN)],
            97,
        )
        .unwrap();
        assert!(matches!(
            registry.resolve_address("Points", 1),
            Err(WalletError::UnknownDeployment { chain_id: 1, .. })
        ));
    }

    #[test]
    fn registry_rejects_bad_descriptors() {
        let bad_address = ContractDescriptor::new("X", json!([])).deployed_at(97, "0x1234");
        assert!(ContractRegistry::from_descriptors([bad_address], 97).is_err());

        let bad_abi = ContractDescriptor::new("X", json!({ "abi": [] }));
        assert!(ContractRegistry::from_descriptors([bad_abi], 97).is_err());

        let dup = ContractDescriptor::new("X", json!([]));
        assert!(ContractRegistry::from_descriptors([dup.clone(), dup], 97).is_err());
    }

    #[test]
    fn registry_loads_from_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("contracts.json");
        std::fs::write(
            &path,
            format!(
                r#"[{{"logical_name":"IdentityContract","address_by_chain":{{"97":"{IDENTITY}"}},"interface_spec":[]}}]"#
            ),
        )
        .unwrap();
        let registry = ContractRegistry::load(&path, 97).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["IdentityContract"]);

        std::fs::write(&path, "not json").unwrap();
        assert!(ContractRegistry::load(&path, 97).is_err());
        assert_eq!(ContractRegistry::load_or_empty(&path, 97).names().count(), 0);
    }

    #[test]
    fn read_binding_needs_no_wallet_and_is_cached() {
        let access = access();
        let first = access.get_read_binding("IdentityContract", 97).unwrap();
        assert_eq!(first.address(), IDENTITY);
        assert!(!first.is_write());
        assert!(first.signer().is_none());

        let again = access.get_read_binding("IdentityContract", 97).unwrap();
        assert!(Arc::ptr_eq(&first.interface, &again.interface));

        access.invalidate();
        let fresh = access.get_read_binding("IdentityContract", 97).unwrap();
        assert!(!Arc::ptr_eq(&first.interface, &fresh.interface));
    }

    #[test]
    fn read_binding_on_unconfigured_chain_uses_fallback_network() {
        let binding = access().get_read_binding("IdentityContract", 1).unwrap();
        assert_eq!(binding.chain_id(), 97);
    }

    #[test]
    fn write_binding_requires_signer() {
        let access = access();
        for chain in [1, 56, 97] {
            assert_eq!(
                access.get_write_binding("IdentityContract", None, chain).unwrap_err(),
                WalletError::NotConnected
            );
        }
        let someone = Account::new("0xABC");
        assert_eq!(
            access
                .get_write_binding("IdentityContract", Some(&someone), 97)
                .unwrap_err(),
            WalletError::NotConnected
        );
        assert_eq!(
            access.session_write_binding("IdentityContract").unwrap_err(),
            WalletError::NotConnected
        );
    }

    #[test]
    fn abi_introspection() {
        let binding = access().get_read_binding("IdentityContract", 97).unwrap();
        assert!(binding.has_function("getProfile"));
        assert!(binding.has_function("legacyGetter"));
        assert!(!binding.has_function("Registered"));
        assert!(binding.is_read_only("getProfile"));
        assert!(binding.is_read_only("legacyGetter"));
        assert!(!binding.is_read_only("register"));
        assert!(!binding.is_read_only("missing"));
    }

    #[tokio::test]
    async fn unknown_function_is_rejected_before_any_request() {
        let binding = access().get_read_binding("IdentityContract", 97).unwrap();
        let err = binding.call("burnEverything", "0x").await.unwrap_err();
        assert!(matches!(err, WalletError::UnknownFunction { .. }));
        assert_eq!(
            binding.send("register", "0x", 0).await.unwrap_err(),
            WalletError::NotConnected
        );
    }
}
