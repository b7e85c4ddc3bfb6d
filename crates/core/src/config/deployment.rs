//! Deployment configuration: chains, contracts, watched feeds and files.
//!
//! String values of the form `${VAR}` are replaced with the environment
//! variable `VAR` when the deployment is resolved. The hot wallet key is
//! never read from the file, only from `HOT_WALLET_PRIVATE_KEY`.

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use oev_liquidator_api::{API3_SIGNED_API_URL, NODARY_SIGNED_API_URL};
use oev_liquidator_chain::{GasSettings, TargetContracts};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

const DEFAULT_DEPLOYMENT_PATH: &str = "config/base-compound3.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub name: String,
    /// dApp id assigned by the OEV auction house.
    pub dapp_id: u64,
    pub target_chain: TargetChainConfig,
    pub oev_network: OevNetworkConfig,
    #[serde(default)]
    pub signed_apis: SignedApisConfig,
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub snapshots: SnapshotPaths,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    #[serde(default)]
    pub gas: GasSettings,
    pub contracts: TargetContracts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OevNetworkConfig {
    #[serde(default = "default_oev_network_chain_id")]
    pub chain_id: u64,
    pub rpc_url: String,
    #[serde(default = "default_auction_house")]
    pub auction_house: Address,
    #[serde(default)]
    pub gas: GasSettings,
}

fn default_oev_network_chain_id() -> u64 {
    4913
}

fn default_auction_house() -> Address {
    alloy::primitives::address!("34f13A5C0AD750d212267bcBc230c87AEFD35CC5")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedApisConfig {
    #[serde(default = "default_signed_api_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_signed_api_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_signed_api_urls() -> Vec<String> {
    vec![
        API3_SIGNED_API_URL.to_string(),
        NODARY_SIGNED_API_URL.to_string(),
    ]
}

fn default_signed_api_timeout_ms() -> u64 {
    10_000
}

impl Default for SignedApisConfig {
    fn default() -> Self {
        Self {
            urls: default_signed_api_urls(),
            timeout_ms: default_signed_api_timeout_ms(),
        }
    }
}

/// A dAPI the market prices collateral with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Human-readable dAPI name, e.g. `ETH/USD`.
    pub dapi_name: String,
    pub proxy: Address,
    #[serde(default = "default_true")]
    pub oev_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPaths {
    #[serde(default = "default_all_positions_path")]
    pub all_positions: PathBuf,
    #[serde(default = "default_positions_to_watch_path")]
    pub positions_to_watch: PathBuf,
}

fn default_all_positions_path() -> PathBuf {
    PathBuf::from("data/all-positions.json")
}

fn default_positions_to_watch_path() -> PathBuf {
    PathBuf::from("data/positions-to-watch.json")
}

impl Default for SnapshotPaths {
    fn default() -> Self {
        Self {
            all_positions: default_all_positions_path(),
            positions_to_watch: default_positions_to_watch_path(),
        }
    }
}

/// Replace a whole-value `${VAR}` with the variable's value. Other strings
/// and unset variables are returned unchanged.
pub fn expand_env(value: &str) -> String {
    match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).unwrap_or_else(|_| value.to_string()),
        None => value.to_string(),
    }
}

fn expand_required(field: &str, value: &str) -> Result<String> {
    let expanded = expand_env(value);
    if expanded.starts_with("${") {
        bail!("{field} references unset environment variable {expanded}");
    }
    Ok(expanded)
}

impl DeploymentConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse deployment {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `DEPLOYMENT_CONFIG`, falling back to the bundled Base deployment.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var("DEPLOYMENT_CONFIG")
            .unwrap_or_else(|_| DEFAULT_DEPLOYMENT_PATH.to_string());
        Self::from_file(path)
    }

    /// Expand environment references and check the result is usable.
    pub fn resolve(mut self) -> Result<Self> {
        self.target_chain.rpc_url = expand_required("target_chain.rpc_url", &self.target_chain.rpc_url)?;
        self.oev_network.rpc_url = expand_required("oev_network.rpc_url", &self.oev_network.rpc_url)?;
        self.signed_apis.urls = self
            .signed_apis
            .urls
            .iter()
            .map(|url| expand_required("signed_apis.urls", url))
            .collect::<Result<_>>()?;

        if self.feeds.is_empty() {
            bail!("deployment {} watches no feeds", self.name);
        }
        if self.signed_apis.urls.is_empty() {
            bail!("deployment {} has no signed API URLs", self.name);
        }
        let contracts = &self.target_chain.contracts;
        for (field, address) in [
            ("comet", contracts.comet),
            ("oev_liquidator", contracts.oev_liquidator),
            ("api3_server_v1", contracts.api3_server_v1),
            ("api3_server_v1_oev_extension", contracts.api3_server_v1_oev_extension),
            ("airseeker_registry", contracts.airseeker_registry),
            ("external_multicall_simulator", contracts.external_multicall_simulator),
        ] {
            if address.is_zero() {
                bail!("target_chain.contracts.{field} is not set");
            }
        }
        for feed in &self.feeds {
            if feed.dapi_name.len() > 31 {
                bail!("dAPI name {:?} does not fit in bytes32", feed.dapi_name);
            }
        }
        Ok(self)
    }

    pub fn log_config(&self) {
        info!(
            deployment = %self.name,
            dapp_id = self.dapp_id,
            target_chain_id = self.target_chain.chain_id,
            oev_network_chain_id = self.oev_network.chain_id,
            comet = %self.target_chain.contracts.comet,
            liquidator = %self.target_chain.contracts.oev_liquidator,
            feeds = self.feeds.len(),
            "Deployment loaded"
        );
    }
}

/// Hot wallet key from the environment.
pub fn hot_wallet_private_key() -> Result<String> {
    std::env::var("HOT_WALLET_PRIVATE_KEY").context("HOT_WALLET_PRIVATE_KEY is not set")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        name = "base-compound3-usdc"
        dapp_id = 7

        [target_chain]
        chain_id = 8453
        rpc_url = "${OEV_TEST_TARGET_RPC}"

        [target_chain.contracts]
        comet = "0xa193bcE4554663FECde688D5921dF38D4D41AA96"
        oev_liquidator = "0x0000000000000000000000000000000000000001"
        api3_server_v1 = "0x709944a48cAf83535e43471680fDA4905FB3920a"
        api3_server_v1_oev_extension = "0x0000000000000000000000000000000000000002"
        airseeker_registry = "0x0000000000000000000000000000000000000003"
        external_multicall_simulator = "0xb45fe2838F47DCCEe00F635785EAF0c723F742E5"

        [oev_network]
        rpc_url = "https://oev.rpc.api3.org"

        [[feeds]]
        dapi_name = "ETH/USD"
        proxy = "0x86313242dBfedD9C52733a0Ed384E917424A7436"

        [[feeds]]
        dapi_name = "USDC/USD"
        proxy = "0x773f1a8E77Bd9e91a84bD80Bf35e67e4989D5C4C"
        oev_enabled = false
    "#;

    #[test]
    fn test_env_expansion() {
        std::env::set_var("OEV_TEST_EXPAND_VAR", "test_value");

        assert_eq!(expand_env("${OEV_TEST_EXPAND_VAR}"), "test_value");
        assert_eq!(expand_env("literal"), "literal");
        assert_eq!(expand_env("${OEV_TEST_NONEXISTENT}"), "${OEV_TEST_NONEXISTENT}");

        std::env::remove_var("OEV_TEST_EXPAND_VAR");
    }

    #[test]
    fn test_parse_sample_with_defaults() {
        let config = DeploymentConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.dapp_id, 7);
        assert_eq!(config.oev_network.chain_id, 4913);
        assert_eq!(config.oev_network.auction_house, default_auction_house());
        assert_eq!(config.signed_apis.urls.len(), 2);
        assert!(config.feeds[0].oev_enabled);
        assert!(!config.feeds[1].oev_enabled);
        assert_eq!(
            config.snapshots.positions_to_watch,
            PathBuf::from("data/positions-to-watch.json")
        );
    }

    #[test]
    fn test_resolve_expands_rpc_url() {
        std::env::set_var("OEV_TEST_TARGET_RPC", "https://base.example");
        let config = DeploymentConfig::from_toml(SAMPLE).unwrap().resolve().unwrap();
        assert_eq!(config.target_chain.rpc_url, "https://base.example");
        std::env::remove_var("OEV_TEST_TARGET_RPC");
    }

    #[test]
    fn test_resolve_rejects_unset_variable() {
        let mut config = DeploymentConfig::from_toml(SAMPLE).unwrap();
        config.target_chain.rpc_url = "${OEV_TEST_NEVER_SET}".to_string();
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("OEV_TEST_NEVER_SET"));
    }

    #[test]
    fn test_resolve_rejects_long_dapi_name() {
        let mut config = DeploymentConfig::from_toml(SAMPLE).unwrap();
        config.target_chain.rpc_url = "http://localhost:8545".to_string();
        config.feeds[0].dapi_name = "x".repeat(40);
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_resolve_rejects_unset_contract() {
        let mut config = DeploymentConfig::from_toml(SAMPLE).unwrap();
        config.target_chain.rpc_url = "http://localhost:8545".to_string();
        config.target_chain.contracts.airseeker_registry = Address::ZERO;
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("airseeker_registry"));
    }

    #[test]
    fn test_bundled_base_deployment_parses() {
        let config =
            DeploymentConfig::from_toml(include_str!("../../../../config/base-compound3.toml")).unwrap();
        assert_eq!(config.target_chain.chain_id, 8453);
        assert_eq!(config.feeds.len(), 5);
        assert!(config.feeds.iter().all(|feed| feed.oev_enabled));
    }
}
