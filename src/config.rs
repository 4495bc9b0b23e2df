//! Configuration management for the orchestration core
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::catalog::{Chain, Provider, Token};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "XCHAIN_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub request_timeout_ms: u64,
    pub buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            buffer_size: 256,
        }
    }
}

impl ChannelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Confirmations required before a transaction is final
    pub threshold: u64,
    pub poll_interval_ms: u64,
    /// Give up after this many polls without reaching a terminal state
    pub max_polls: Option<u64>,
    /// Start tracking the source transaction as soon as a submit is acknowledged
    pub auto_track: bool,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            threshold: 12,
            poll_interval_ms: 3_000,
            max_polls: None,
            auto_track: true,
        }
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub max_routes: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { max_routes: 5 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

/// Static reference data; array order is the catalog's iteration order
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub chains: Vec<Chain>,
    pub tokens: Vec<Token>,
    pub providers: Vec<Provider>,
}

impl Settings {
    /// Load settings from the file named by `XCHAIN_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.confirmation.threshold == 0 {
            anyhow::bail!("confirmation.threshold must be at least 1");
        }
        if self.confirmation.poll_interval_ms == 0 {
            anyhow::bail!("confirmation.poll_interval_ms must be positive");
        }
        if self.history.default_limit > self.history.max_limit {
            anyhow::bail!(
                "history.default_limit ({}) exceeds history.max_limit ({})",
                self.history.default_limit,
                self.history.max_limit
            );
        }

        let mut chain_ids = HashSet::new();
        for chain in &self.catalog.chains {
            if !chain_ids.insert(chain.id.as_str()) {
                anyhow::bail!("Chain {} is declared twice", chain.id);
            }
        }

        for token in &self.catalog.tokens {
            for network in &token.networks {
                if !chain_ids.contains(network.as_str()) {
                    anyhow::bail!("Token {} references unknown chain {}", token.id, network);
                }
            }
        }

        for provider in &self.catalog.providers {
            for route in &provider.supported_routes {
                for chain in [&route.source_chain, &route.destination_chain] {
                    if !chain_ids.contains(chain.as_str()) {
                        anyhow::bail!(
                            "Provider {} references unknown chain {}",
                            provider.id,
                            chain
                        );
                    }
                }
            }
        }

        if self.catalog.providers.is_empty() {
            tracing::warn!("No bridge providers configured - routes must come from the remote");
        }

        Ok(())
    }
}

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex =
        Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[confirmation]
threshold = 6
poll_interval_ms = 500

[[catalog.chains]]
id = "chain-a"
name = "Chain A"
native_symbol = "AAA"

[[catalog.chains]]
id = "chain-b"
name = "Chain B"
native_symbol = "BBB"
is_testnet = true

[[catalog.tokens]]
id = "usdx"
symbol = "USDX"
decimals = 6
networks = ["chain-a", "chain-b"]

[[catalog.providers]]
id = "p1"
name = "Provider One"

[[catalog.providers.supported_routes]]
source_chain = "chain-a"
destination_chain = "chain-b"
tokens = ["usdx"]
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("XCHAIN_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${XCHAIN_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings.confirmation.threshold, 12);
        assert_eq!(settings.channel.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.history.default_limit, 50);
        assert!(settings.confirmation.auto_track);
    }

    #[test]
    fn test_catalog_keeps_declaration_order() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let ids: Vec<_> = settings.catalog.chains.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["chain-a", "chain-b"]);
        assert_eq!(settings.confirmation.threshold, 6);
        assert!(settings.catalog.chains[1].is_testnet);
    }

    #[test]
    fn test_rejects_unknown_chain_reference() {
        let broken = SAMPLE.replace("networks = [\"chain-a\", \"chain-b\"]", "networks = [\"chain-z\"]");
        let err = Settings::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("unknown chain chain-z"));
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let err = Settings::from_toml_str("[confirmation]\nthreshold = 0").unwrap_err();
        assert!(err.to_string().contains("threshold"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.catalog.providers.len(), 1);
        assert_eq!(settings.catalog.providers[0].supported_routes[0].tokens, vec!["usdx"]);
    }
}
