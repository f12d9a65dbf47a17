//! Configuration module for the vend402 gatekeeper server.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::device::DeviceConfig;
use crate::gatekeeper_local::GatekeeperSettings;
use crate::types::DeviceId;

/// CLI arguments for the gatekeeper server.
#[derive(Parser, Debug)]
#[command(name = "vend402")]
#[command(about = "vend402 gatekeeper HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables,
/// then to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Horizon API base of the ledger network to verify against.
    #[serde(default = "config_defaults::default_horizon_url")]
    horizon_url: Url,
    /// Upper bound on a single Horizon request, in milliseconds.
    #[serde(default = "config_defaults::default_ledger_timeout_ms")]
    ledger_timeout_ms: u64,
    /// Upper bound on a dispense notification send, in milliseconds.
    #[serde(default = "config_defaults::default_notify_timeout_ms")]
    notify_timeout_ms: u64,
    /// How long an issued challenge is honored, in seconds.
    #[serde(default = "config_defaults::default_challenge_ttl_secs")]
    challenge_ttl_secs: u64,
    /// How long a dispense long poll is held open, in seconds.
    #[serde(default = "config_defaults::default_long_poll_wait_secs")]
    long_poll_wait_secs: u64,
    /// Vending machines served by this gatekeeper, keyed by device id.
    #[serde(default)]
    devices: HashMap<DeviceId, DeviceConfig>,
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;
    use url::Url;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_HORIZON_URL: &str = "https://horizon-testnet.stellar.org";
    pub const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 2_000;
    pub const DEFAULT_CHALLENGE_TTL_SECS: u64 = 600;
    pub const DEFAULT_LONG_POLL_WAIT_SECS: u64 = 25;

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    /// Returns the Horizon base URL with fallback: $HORIZON_URL env var ->
    /// the public testnet Horizon.
    pub fn default_horizon_url() -> Url {
        env::var("HORIZON_URL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| DEFAULT_HORIZON_URL.parse().unwrap())
    }

    pub fn default_ledger_timeout_ms() -> u64 {
        DEFAULT_LEDGER_TIMEOUT_MS
    }

    pub fn default_notify_timeout_ms() -> u64 {
        DEFAULT_NOTIFY_TIMEOUT_MS
    }

    pub fn default_challenge_ttl_secs() -> u64 {
        DEFAULT_CHALLENGE_TTL_SECS
    }

    pub fn default_long_poll_wait_secs() -> u64 {
        DEFAULT_LONG_POLL_WAIT_SECS
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            horizon_url: config_defaults::default_horizon_url(),
            ledger_timeout_ms: config_defaults::default_ledger_timeout_ms(),
            notify_timeout_ms: config_defaults::default_notify_timeout_ms(),
            challenge_ttl_secs: config_defaults::default_challenge_ttl_secs(),
            long_poll_wait_secs: config_defaults::default_long_poll_wait_secs(),
            devices: HashMap::new(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn horizon_url(&self) -> &Url {
        &self.horizon_url
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn long_poll_wait(&self) -> Duration {
        Duration::from_secs(self.long_poll_wait_secs)
    }

    /// Gatekeeper windows derived from this config.
    pub fn gatekeeper_settings(&self) -> GatekeeperSettings {
        GatekeeperSettings {
            challenge_ttl: Duration::from_secs(self.challenge_ttl_secs),
            notify_timeout: Duration::from_millis(self.notify_timeout_ms),
        }
    }

    /// The configured vending machines, keyed by device id.
    pub fn devices(&self) -> &HashMap<DeviceId, DeviceConfig> {
        &self.devices
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `$CONFIG` environment variable
    /// 3. `./config.json`
    ///
    /// Values not present in the config file will be resolved via
    /// environment variables or defaults during deserialization.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let json = r#"{
            "port": 9090,
            "horizonUrl": "https://horizon.stellar.org",
            "challengeTtlSecs": 300,
            "devices": {
                "machine-1": {
                    "price": "0.5",
                    "destination": "GA7QYNF7SOWQ3GLR2BGMZEHXAVIRZA4KVWLTJJFC7MGXUA74P7UJVSGZ"
                }
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.port(), 9090);
        assert_eq!(config.horizon_url().as_str(), "https://horizon.stellar.org/");
        assert_eq!(
            config.gatekeeper_settings().challenge_ttl,
            Duration::from_secs(300)
        );
        assert!(config.devices().contains_key(&"machine-1".into()));
    }

    #[test]
    fn empty_config_gets_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.ledger_timeout(), Duration::from_secs(10));
        assert_eq!(config.long_poll_wait(), Duration::from_secs(25));
        assert!(config.devices().is_empty());
    }
}
