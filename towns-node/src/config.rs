//! Node configuration loaded from a TOML file.

use primitive_types::H160;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use towns_core::{Err, Result, RiverError};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub river_chain: ChainSection,
    #[serde(default)]
    pub wallet: WalletSection,
}

#[derive(Debug, Deserialize)]
pub struct ChainSection {
    /// Ethereum JSON-RPC endpoint of the River chain.
    pub rpc_url: String,
    /// Deployed River registry contract.
    pub registry_contract: H160,
}

#[derive(Debug, Deserialize)]
pub struct WalletSection {
    #[serde(default = "default_wallet_path")]
    pub path: PathBuf,
    /// Environment variable holding the private key, as an alternative to
    /// the key file.
    #[serde(default)]
    pub private_key_env: Option<String>,
}

impl Default for WalletSection {
    fn default() -> Self {
        Self { path: default_wallet_path(), private_key_env: None }
    }
}

fn default_wallet_path() -> PathBuf {
    PathBuf::from(towns_crypto::wallet::WALLET_PATH)
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RiverError::with_base(Err::BadConfig, "failed to read config file", err)
                .tag("filename", path.display())
                .func("load_config")
        })?;
        toml::from_str(&raw).map_err(|err| {
            RiverError::with_base(Err::BadConfig, "failed to parse config file", err)
                .tag("filename", path.display())
                .func("load_config")
        })
    }
}
