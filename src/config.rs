//! Configuration management for the brand sender
//!
//! Loads configuration from TOML files with environment variable substitution.
//! The private key itself never lives in the file; `wallet.private_key_env`
//! names the environment variable that holds it.

use crate::api::ApiMode;
use crate::recovery::RecoveryConfig;
use crate::tx::{RetryConfig, TransferStrategy};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "QB_SENDER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api: ApiConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub mode: ApiMode,
    /// Overrides the host implied by `mode`
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.mode.host())
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
    pub token_symbol: String,
    #[serde(default)]
    pub transfer_strategy: TransferStrategy,
}

impl WalletConfig {
    /// Read the private key from the configured environment variable
    pub fn private_key(&self) -> Result<String> {
        env::var(&self.private_key_env).with_context(|| {
            format!(
                "Private key environment variable {} is not set",
                self.private_key_env
            )
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
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
    /// Load settings from `QB_SENDER_CONFIG`, or the default path
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.wallet.token_symbol.trim().is_empty() {
            anyhow::bail!("wallet.token_symbol must not be empty");
        }
        if self.wallet.private_key_env.trim().is_empty() {
            anyhow::bail!("wallet.private_key_env must name an environment variable");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.recovery.batch_size == 0 {
            anyhow::bail!("recovery.batch_size must be at least 1");
        }
        if self.recovery.poll_interval_ms == 0 {
            anyhow::bail!("recovery.poll_interval_ms must be at least 1");
        }

        if self.wallet.transfer_strategy == TransferStrategy::Brand
            && self.api.api_key.as_deref().map_or(true, str::is_empty)
        {
            tracing::warn!("Brand transfer strategy configured without api.api_key");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
