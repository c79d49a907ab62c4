use crate::dto::validate_jurisdiction;
use crate::error::{Result, TabError};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_BASE_URL: &str = "https://api.beta.tab.com.au";

/// Tabcorp credential set and session preferences.
#[derive(Debug, Clone, Deserialize)]
pub struct TabConfig {
    pub client_id: String,
    pub client_secret: String,
    /// TAB account number, required for the password grant.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Previously issued refresh token to resume a session with.
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_jurisdiction")]
    pub jurisdiction: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_jurisdiction() -> String {
    "NSW".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Tunables for the resilience pipeline. Every field has a default, so the
/// whole `[resilience]` section is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub token_refresh_buffer_secs: u64,
    pub api_cache_capacity: usize,
    pub api_cache_ttl_secs: u64,
    pub race_cache_capacity: usize,
    pub race_cache_ttl_secs: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            jitter: false,
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            request_timeout_secs: 30,
            token_refresh_buffer_secs: 60,
            api_cache_capacity: 256,
            api_cache_ttl_secs: 300,
            race_cache_capacity: 512,
            race_cache_ttl_secs: 60,
        }
    }
}

impl ResilienceConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.token_refresh_buffer_secs)
    }

    pub fn api_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.api_cache_ttl_secs)
    }

    pub fn race_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.race_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub tab: TabConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

impl Config {
    /// Load `config.toml` from the current directory.
    pub fn new() -> Result<Self> {
        Self::from_file("config.toml")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref()).map_err(|e| {
            TabError::Config(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| TabError::Config(e.to_string()))?;
        config.validate()?;
        info!(
            "Loaded config for jurisdiction {} against {}",
            config.tab.jurisdiction, config.tab.base_url
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_jurisdiction(&self.tab.jurisdiction)?;
        if self.resilience.max_attempts == 0 {
            return Err(TabError::Config(
                "resilience.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
