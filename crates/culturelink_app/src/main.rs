use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use culturelink_core::logging;
use culturelink_core::{AppConfig, FileReconnectFlag, Locale};
use culturelink_wallet::format::format_balance;
use culturelink_wallet::transport::proxy::ProxyConnector;
use culturelink_wallet::transport::rpc::JsonRpcClient;
use culturelink_wallet::{
    ContractAccess, ContractRegistry, NetworkRegistry, NoWallet, PendingTransaction,
    RpcProvider, TransactionTracker, WalletConnector, WalletError, WalletSession,
    WalletSessionManager,
};

const USAGE: &str = "usage: culturelink <status|connect|disconnect|watch|switch <chain-id>|track <tx-hash>>";

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Status,
    Connect,
    Disconnect,
    Watch,
    Switch(u64),
    Track(String),
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let command = match args.next().as_deref() {
            None | Some("status") => Command::Status,
            Some("connect") => Command::Connect,
            Some("disconnect") => Command::Disconnect,
            Some("watch") => Command::Watch,
            Some("switch") => {
                let raw = args.next().context(USAGE)?;
                let chain_id = raw
                    .parse()
                    .with_context(|| format!("invalid chain id: {raw}"))?;
                Command::Switch(chain_id)
            }
            Some("track") => Command::Track(args.next().context(USAGE)?),
            Some(other) => bail!("unknown command {other}\n{USAGE}"),
        };
        Ok(command)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

struct App {
    config: AppConfig,
    session: Arc<WalletSessionManager>,
    contracts: ContractAccess,
}

impl App {
    fn build(config: AppConfig) -> Result<Self> {
        let networks = NetworkRegistry::load_or_default(&AppConfig::networks_path()?);
        let registry =
            ContractRegistry::load_or_empty(&AppConfig::contracts_path()?, config.fallback_chain_id);

        let connector: Arc<dyn WalletConnector> = match &config.wallet_proxy_url {
            Some(url) => {
                info!(url = %url, "using wallet bridge");
                Arc::new(ProxyConnector::new(
                    url.clone(),
                    Duration::from_secs(config.rpc_timeout_secs),
                    Duration::from_millis(config.wallet_poll_interval_ms),
                ))
            }
            None => {
                warn!("no wallet_proxy_url configured, wallet features unavailable");
                Arc::new(NoWallet)
            }
        };

        let flag = Arc::new(FileReconnectFlag::at_default_location()?);
        let session =
            Arc::new(WalletSessionManager::new(connector, networks, flag).with_locale(config.locale));
        let contracts = ContractAccess::new(registry, Arc::clone(&session))
            .with_write_chains(config.write_chain_ids.iter().copied())
            .with_rpc_timeout(Duration::from_secs(config.rpc_timeout_secs));

        Ok(Self {
            config,
            session,
            contracts,
        })
    }

    fn locale(&self) -> Locale {
        self.config.locale
    }

    fn describe(&self, session: &WalletSession) -> String {
        let (Some(account), Some(chain_id)) = (session.account(), session.chain_id()) else {
            return format!("{:?}", session.state());
        };
        let network = self.session.networks().get(chain_id);
        let name = network.map_or("unknown network", |n| n.name.as_str());
        let balance = match (session.balance_wei(), network) {
            (Some(wei), Some(n)) => format!(
                "{} {}",
                format_balance(wei, n.currency_decimals, 4),
                n.currency_symbol
            ),
            _ => "-".to_string(),
        };
        format!("{} on {name} ({chain_id}), balance {balance}", account.short())
    }

    fn print_status(&self) {
        let session = self.session.snapshot();
        println!("wallet:    {}", self.describe(&session));

        let chain_id = session.chain_id().unwrap_or(self.config.default_chain_id);
        let registry = self.contracts.registry();
        for name in registry.names() {
            match registry.resolve_address(name, chain_id) {
                Ok(address) => println!("contract:  {name} {address}"),
                Err(e) => println!("contract:  {name} ({})", e.user_message(self.locale())),
            }
        }
    }

    async fn watch(&self) -> Result<()> {
        let mut updates = self.session.subscribe();
        println!("{}", self.describe(&updates.borrow_and_update()));
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let session = updates.borrow_and_update().clone();
                    println!("{}", self.describe(&session));
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for ctrl-c")?;
                    info!("watch stopped");
                    return Ok(());
                }
            }
        }
    }

    /// Transactions are tracked through the wallet when connected, else
    /// through the configured RPC endpoint of the default chain.
    fn tracking_provider(&self) -> Result<Arc<dyn RpcProvider>> {
        if let Some(transport) = self.session.transport() {
            return Ok(culturelink_wallet::transport::provider_of(transport));
        }
        let chain_id = self.config.default_chain_id;
        let network = self
            .session
            .networks()
            .get(chain_id)
            .with_context(|| format!("no network configuration for chain {chain_id}"))?;
        let client = JsonRpcClient::with_timeout(
            network.rpc_url.clone(),
            Duration::from_secs(self.config.rpc_timeout_secs),
        )
        .map_err(|e| anyhow::anyhow!("Failed to create RPC client: {e}"))?;
        Ok(Arc::new(client))
    }

    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Status => self.print_status(),
            Command::Connect => match self.session.connect().await {
                Ok(_) => println!("{}", self.describe(&self.session.snapshot())),
                Err(e) => report(&e, self.locale()),
            },
            Command::Disconnect => {
                self.session.disconnect();
                println!("disconnected");
            }
            Command::Watch => self.watch().await?,
            Command::Switch(chain_id) => match self.session.switch_network(chain_id).await {
                Ok(()) => println!("switch to chain {chain_id} requested"),
                Err(e) => report(&e, self.locale()),
            },
            Command::Track(hash) => {
                let tracker = TransactionTracker::new(self.tracking_provider()?, self.locale())
                    .with_poll_interval(Duration::from_millis(self.config.receipt_poll_interval_ms));
                let mut tx = PendingTransaction::new(hash);
                let outcome = tracker
                    .await_confirmation(&mut tx, self.config.required_confirmations)
                    .await;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }
        Ok(())
    }
}

fn report(err: &WalletError, locale: Locale) {
    warn!(kind = ?err.kind(), "{err}");
    println!("{}", err.user_message(locale));
}

#[tokio::main]
async fn main() -> Result<()> {
    AppConfig::ensure_dirs()?;
    let config = AppConfig::load()?;
    let _log_guard = logging::init_logging(&config)?;

    if let Err(problems) = config.validate() {
        for problem in &problems {
            warn!("config: {problem}");
        }
        bail!("invalid configuration in {}", AppConfig::config_path()?.display());
    }

    let command = Command::parse(std::env::args().skip(1))?;
    info!(?command, "culturelink starting");

    let app = App::build(config)?;
    app.session.auto_reconnect().await;
    app.run(command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command> {
        Command::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse(&[]).unwrap(), Command::Status);
        assert_eq!(parse(&["connect"]).unwrap(), Command::Connect);
        assert_eq!(parse(&["switch", "97"]).unwrap(), Command::Switch(97));
        assert_eq!(
            parse(&["track", "0x01"]).unwrap(),
            Command::Track("0x01".into())
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["switch"]).is_err());
        assert!(parse(&["switch", "bsc"]).is_err());
        assert!(parse(&["bridge"]).is_err());
    }
}
