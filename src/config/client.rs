use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{ConsoleError, Result};
use crate::live::{DEFAULT_LOG_CAPACITY, DEFAULT_RECONNECT_DELAY};

pub const DEFAULT_CONFIG_FILE: &str = "bot_console.toml";
pub const ENV_PREFIX: &str = "BOT_CONSOLE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the remote service, e.g. `http://localhost:8000`.
    pub api_base_url: String,
    /// sled database holding the persisted credential.
    pub token_path: PathBuf,
    pub log_capacity: usize,
    pub reconnect_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub default_exchange: String,
    pub default_symbol: String,
    pub default_strategy: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            token_path: PathBuf::from(".bot_console/session"),
            log_capacity: DEFAULT_LOG_CAPACITY,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            request_timeout_secs: 30,
            default_exchange: "binance".to_string(),
            default_symbol: "BTC/USDT".to_string(),
            default_strategy: "default".to_string(),
        }
    }
}

impl ClientConfig {
    /// Layers defaults, an optional TOML file and `BOT_CONSOLE_*` environment
    /// variables (after reading `.env`), then validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        debug!("Loading configuration from {}", file.display());

        let loaded: ClientConfig = Config::builder()
            .add_source(Config::try_from(&ClientConfig::default())?)
            .add_source(File::from(file).format(FileFormat::Toml).required(path.is_some()))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        loaded.validate().map_err(|errors| ConsoleError::Config(errors.join(", ")))?;
        Ok(loaded)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let parsed: ClientConfig = Config::builder()
            .add_source(Config::try_from(&ClientConfig::default())?)
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        parsed.validate().map_err(|errors| ConsoleError::Config(errors.join(", ")))?;
        Ok(parsed)
    }

    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match Url::parse(&self.api_base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(format!(
                "api_base_url must use http or https, got {}",
                url.scheme()
            )),
            Err(e) => errors.push(format!("api_base_url is not a valid URL: {}", e)),
        }
        if self.log_capacity == 0 {
            errors.push("log_capacity must be > 0".to_string());
        }
        if self.reconnect_delay_ms == 0 {
            errors.push("reconnect_delay_ms must be > 0".to_string());
        }
        if self.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be > 0".to_string());
        }
        if self.default_exchange.trim().is_empty() {
            errors.push("default_exchange must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConsoleError::Config(e.to_string()))
    }
}
