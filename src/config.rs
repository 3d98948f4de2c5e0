//! Configuration management for the bridge relayer
//!
//! Loads configuration from a TOML file with environment variable substitution.
//! `${VAR}` expands to the variable's value (empty when unset) and
//! `${VAR:-default}` falls back to `default` when the variable is unset or empty.

use crate::chain::RetryPolicy;

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub relayer: RelayerConfig,
    pub chains: ChainsConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Foundry build artifact holding the bridge contract ABI
    pub abi_path: PathBuf,
    /// Fixed gas limit for mirrored transactions
    pub gas_limit: u64,
    pub gas_price_buffer_percent: u64,
    pub inclusion_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    /// Attempts per event; 1 disables automatic re-relay
    pub relay_max_attempts: u32,
    pub relay_retry_delay_ms: u64,
    pub subscription_retry: RetryPolicy,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            abi_path: PathBuf::from("out/Bridge.sol/Bridge.json"),
            gas_limit: 300_000,
            gas_price_buffer_percent: 0,
            inclusion_timeout_secs: 600,
            receipt_poll_interval_ms: 1_000,
            relay_max_attempts: 1,
            relay_retry_delay_ms: 2_000,
            subscription_retry: RetryPolicy::default(),
        }
    }
}

impl RelayerConfig {
    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.inclusion_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn relay_retry_delay(&self) -> Duration {
        Duration::from_millis(self.relay_retry_delay_ms)
    }
}

/// The two ledgers bridged by this relayer
#[derive(Debug, Clone, Deserialize)]
pub struct ChainsConfig {
    pub a: ChainConfig,
    pub b: ChainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub ws_url: String,
    pub bridge_address: String,
    #[serde(default = "default_ws_reconnects")]
    pub ws_reconnects: usize,
}

fn default_ws_reconnects() -> usize {
    5
}

impl ChainConfig {
    /// Parse the bridge contract address, rejecting empty and zero addresses
    pub fn bridge_address(&self) -> Result<Address> {
        if self.bridge_address.trim().is_empty() {
            anyhow::bail!("Chain {} has no bridge address configured", self.name);
        }
        let address = Address::from_str(self.bridge_address.trim())
            .with_context(|| format!("Invalid bridge address for chain {}", self.name))?;
        if address == Address::zero() {
            anyhow::bail!("Chain {} bridge address is the zero address", self.name);
        }
        Ok(address)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the hex-encoded signing key
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: "PRIVATE_KEY".to_string(),
        }
    }
}

impl WalletConfig {
    /// Read the signing key from the configured environment variable
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.private_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .with_context(|| format!("Set {} to the relayer signing key", self.private_key_env))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        for chain in [&self.chains.a, &self.chains.b] {
            if chain.ws_url.trim().is_empty() {
                anyhow::bail!("Chain {} has no RPC URL configured", chain.name);
            }
            chain.bridge_address()?;
        }

        if self.relayer.relay_max_attempts == 0 {
            anyhow::bail!("relay_max_attempts must be at least 1");
        }

        if self.relayer.gas_limit == 0 {
            anyhow::bail!("gas_limit must be non-zero");
        }

        Ok(())
    }
}

/// Export variables from an env file into the process environment.
///
/// Returns `false` when the file does not exist. Variables already set in the
/// environment keep their values.
pub fn load_env_file(path: &Path) -> Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to read env file: {:?}", path)),
    }
}

/// Substitute environment variables in the format ${VAR_NAME} or ${VAR_NAME:-default}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |cap: &Captures| {
            let value = env::var(&cap[1]).unwrap_or_default();
            match cap.get(2) {
                Some(default) if value.is_empty() => default.as_str().to_string(),
                _ => value,
            }
        })
        .into_owned()
}
