use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::schema::{Collection, RequiredAttributes};

pub const CONFIG_ENV: &str = "IRRIGATION_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid schema override: {0}")]
    Schema(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
    /// Required-attribute overrides keyed by collection name.
    pub schema: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub static_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchConfig {
    pub default_timeout_seconds: u64,
    pub max_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            bind: "0.0.0.0:8080".to_string(),
            static_dir: None,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            default_timeout_seconds: 25,
            max_timeout_seconds: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl WatchConfig {
    /// The requested wait, or the default, clamped to the maximum.
    pub fn timeout(&self, requested_seconds: Option<u64>) -> Duration {
        let seconds = requested_seconds
            .unwrap_or(self.default_timeout_seconds)
            .min(self.max_timeout_seconds);
        Duration::from_secs(seconds)
    }
}

impl ServerConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(content)?;
        config.required_attributes()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// `IRRIGATION_CONFIG` if set, else `config/server.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config").join("server.toml"))
    }

    pub fn required_attributes(&self) -> Result<RequiredAttributes, ConfigError> {
        let overrides = self
            .schema
            .iter()
            .map(|(name, attributes)| {
                name.parse::<Collection>()
                    .map(|collection| (collection, attributes.clone()))
                    .map_err(ConfigError::Schema)
            })
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(RequiredAttributes::with_overrides(&overrides))
    }
}
