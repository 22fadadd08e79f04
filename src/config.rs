//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `greenhouse.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the api listens.
//!     - BrokerConfig: cloud broker url, timeouts and channel (virtual pin) names.
//!     - DatabaseConfig: sqlite url for the readings history.
//!     - LoggingConfig: default log level (RUST_LOG still wins).
//!
//! secrets:
//!     the broker token is NOT part of the file. `token_env` names the
//!     environment variable that holds it, see `BrokerConfig::token()`.
//!
//! ==============================================================================

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// environment variable that overrides the config file search
pub const CONFIG_PATH_ENV: &str = "GREENHOUSE_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// file this config was read from (None = built-in defaults)
    #[serde(skip)]
    pub origin: Option<PathBuf>,
    /// problems hit while searching for a file, logged once tracing is up
    #[serde(skip)]
    pub load_warnings: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    pub base_url: String,
    /// name of the environment variable holding the auth token
    pub token_env: String,
    pub batch_timeout_ms: u64,
    pub channel_timeout_ms: u64,
    pub channels: ChannelConfig,
}

/// broker virtual pins for each value we read or command
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelConfig {
    pub temperature: String,
    pub humidity: String,
    pub soil: String,
    pub pump: String,
    pub fan: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// broker auth token, kept out of Debug output and logs
#[derive(Clone)]
pub struct BrokerToken(String);

impl BrokerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BrokerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BrokerToken(***)")
    }
}

impl BrokerConfig {
    /// read the auth token from the environment
    pub fn token(&self) -> anyhow::Result<BrokerToken> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(BrokerToken::new(token.trim())),
            _ => Err(anyhow::anyhow!(
                "broker token not set: export {} before starting the dashboard",
                self.token_env
            )),
        }
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}

impl DashboardConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load with default fallback
    ///
    /// runs before the tracing subscriber exists (the log level lives in this
    /// file), so outcomes are recorded on the config and logged by `print_summary`.
    pub fn load_or_default() -> Self {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("greenhouse.toml"));
        paths.push(PathBuf::from("..").join("config").join("greenhouse.toml"));

        let mut load_warnings = Vec::new();
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(mut config) => {
                        config.origin = Some(path.clone());
                        config.load_warnings = load_warnings;
                        return config;
                    }
                    Err(e) => {
                        load_warnings.push(format!("Failed to load {}: {}", path.display(), e));
                    }
                }
            }
        }

        load_warnings.push("No config file found - using defaults".to_string());
        Self { load_warnings, ..Self::default() }
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        for warning in &self.load_warnings {
            warn!("[CONFIG] {}", warning);
        }
        if let Some(path) = &self.origin {
            info!("[CONFIG] Loaded from {}", path.display());
        }
        info!("┌─────────────────────────────────────────┐");
        info!("│        DASHBOARD CONFIGURATION          │");
        info!("├─────────────────────────────────────────┤");
        info!("│ Bind: {}", self.server.bind);
        info!("│ Broker: {}", self.broker.base_url);
        info!("│ Token env: {}", self.broker.token_env);
        info!("│ Database: {}", self.database.url);
        info!("│ Log Level: {}", self.logging.level);
        info!("└─────────────────────────────────────────┘");
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:5000".to_string() }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://blynk.cloud".to_string(),
            token_env: "BLYNK_TOKEN".to_string(),
            batch_timeout_ms: 8_000,
            channel_timeout_ms: 5_000,
            channels: ChannelConfig::default(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            temperature: "V3".to_string(),
            humidity: "V4".to_string(),
            soil: "V5".to_string(),
            pump: "V6".to_string(),
            fan: "V7".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://greenhouse.db".to_string(), max_connections: 4 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = DashboardConfig::parse(
            r#"
[broker]
base_url = "http://localhost:8080"

[broker.channels]
soil = "V9"
"#,
        )
        .unwrap();

        assert_eq!(config.broker.base_url, "http://localhost:8080");
        assert_eq!(config.broker.channels.soil, "V9");
        assert_eq!(config.broker.channels.pump, "V6");
        assert_eq!(config.broker.batch_timeout(), Duration::from_secs(8));
        assert_eq!(config.server.bind, "0.0.0.0:5000");
        assert_eq!(config.database.url, "sqlite://greenhouse.db");
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(DashboardConfig::parse("[broker\nbase_url = 1").is_err());
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = BrokerToken::new("super-secret");
        assert_eq!(format!("{:?}", token), "BrokerToken(***)");
        assert_eq!(token.expose(), "super-secret");
    }

    #[test]
    fn test_missing_token_env_fails() {
        let broker = BrokerConfig {
            token_env: "GREENHOUSE_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
            ..BrokerConfig::default()
        };
        assert!(broker.token().is_err());
    }
}
