use anyhow::Result;
use clap::Parser;
use primitive_types::H160;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use towns_core::traits::NodeClient;
use towns_core::Context;
use towns_crypto::wallet::{
    WALLET_PATH_NODE_ADDRESS, WALLET_PATH_PRIVATE_KEY, WALLET_PATH_PUBLIC_KEY,
};
use towns_crypto::Wallet;
use towns_node::ping::get_network_status;
use towns_node::rpc_client::JsonRpcNodeClient;
use towns_node::Config;
use towns_registry::registry::{NodeClientFactory, NodeRecord, NodeRegistry};
use towns_registry::river_registry::{RiverRegistry, RiverRegistryContract};

#[derive(Parser)]
#[clap(name = "towns", about = "Towns node command line")]
struct Opts {
    #[clap(long, default_value = "./config.toml")]
    config: PathBuf,
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
enum Command {
    /// Pings all nodes in the network based on config and prints the
    /// results as JSON.
    Ping,
    /// Node wallet management.
    Wallet(WalletOpts),
}

#[derive(Parser)]
struct WalletOpts {
    #[clap(subcommand)]
    cmd: WalletCommand,
}

#[derive(Parser)]
enum WalletCommand {
    /// Generates a new node wallet and saves the key files.
    New {
        #[clap(long)]
        overwrite: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let opts = Opts::parse();
    match opts.cmd {
        Command::Ping => ping(&opts.config).await,
        Command::Wallet(WalletOpts { cmd: WalletCommand::New { overwrite } }) => {
            wallet_new(&opts.config, overwrite)
        },
    }
}

async fn ping(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    let contract = RiverRegistryContract::new(
        &config.river_chain.rpc_url,
        config.river_chain.registry_contract,
        None,
    )?;
    let ctx = Context::background().with_timeout(Duration::from_secs(30));

    let records = contract.get_all_nodes(&ctx).await?;
    let factory: NodeClientFactory = Arc::new(|record: &NodeRecord| -> Arc<dyn NodeClient> {
        Arc::new(JsonRpcNodeClient::connect(&record.url))
    });
    let registry = NodeRegistry::new(H160::zero(), records, factory);

    let status = get_network_status(&ctx, &registry).await?;
    println!("{}", status.to_pretty_json()?);
    Ok(())
}

fn wallet_new(config_path: &Path, overwrite: bool) -> Result<()> {
    let config = Config::load(config_path).ok();
    let wallet_dir = config.as_ref().map_or_else(
        || PathBuf::from(towns_crypto::wallet::WALLET_PATH),
        |config| config.wallet.path.clone(),
    );
    std::fs::create_dir_all(&wallet_dir)?;

    // Import from the configured environment variable when set, otherwise
    // generate a fresh key.
    let wallet = match config.as_ref().and_then(|c| c.wallet.private_key_env.as_deref()) {
        Some(env_var) => Wallet::from_env(env_var)?,
        None => Wallet::generate(),
    };
    wallet.save(
        wallet_dir.join(file_name(WALLET_PATH_PRIVATE_KEY)),
        wallet_dir.join(file_name(WALLET_PATH_PUBLIC_KEY)),
        wallet_dir.join(file_name(WALLET_PATH_NODE_ADDRESS)),
        overwrite,
    )?;
    println!("{wallet}");
    Ok(())
}

fn file_name(path: &str) -> &str {
    Path::new(path).file_name().and_then(|name| name.to_str()).unwrap_or(path)
}
