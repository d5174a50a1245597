//! Application configuration, loaded from YAML.
//!
//! ```yaml
//! web_hook_secret: change-me
//! port: 8080
//! db_path: data.db
//! github_token: ghp_...
//! log:
//!   level: info
//!   format: json
//! dispatch:
//!   handler_timeout_secs: 300
//!   drain_timeout_secs: 10
//! shutdown_timeout_secs: 30
//! modules:
//!   oncall:
//!     schedules: [...]
//! ```
//!
//! Each entry under `modules` is kept as raw YAML and deserialized by the
//! module that owns it (see [`AppConfig::module_config`]).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DB_PATH: &str = "data.db";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid configuration for module {module}: {source}")]
    Module {
        module: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared secret for webhook signatures.
    pub web_hook_secret: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Token for outbound GitHub calls. Without one the platform client is anonymous.
    #[serde(default)]
    pub github_token: Option<String>,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Per-module configuration blocks, keyed by module name.
    #[serde(default)]
    pub modules: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive. `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a single module handler.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,

    /// How long shutdown waits for in-flight handlers.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            handler_timeout_secs: DEFAULT_HANDLER_TIMEOUT_SECS,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_handler_timeout() -> u64 {
    DEFAULT_HANDLER_TIMEOUT_SECS
}

fn default_drain_timeout() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

impl AppConfig {
    /// Reads, parses, defaults and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    /// Parses, defaults and validates a YAML document.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_yaml::from_str(yaml)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Replaces empty or zero values with their defaults.
    pub fn apply_defaults(&mut self) {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.db_path.as_os_str().is_empty() {
            self.db_path = default_db_path();
        }
        if self.log.level.trim().is_empty() {
            self.log.level = default_log_level();
        }
        if self.dispatch.handler_timeout_secs == 0 {
            self.dispatch.handler_timeout_secs = DEFAULT_HANDLER_TIMEOUT_SECS;
        }
        if self.dispatch.drain_timeout_secs == 0 {
            self.dispatch.drain_timeout_secs = DEFAULT_DRAIN_TIMEOUT_SECS;
        }
        if self.shutdown_timeout_secs == 0 {
            self.shutdown_timeout_secs = DEFAULT_SHUTDOWN_TIMEOUT_SECS;
        }
        if self.github_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.github_token = None;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.web_hook_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("web_hook_secret must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if let Some((name, _)) = self
            .modules
            .iter()
            .find(|(_, v)| !matches!(v, serde_yaml::Value::Mapping(_) | serde_yaml::Value::Null))
        {
            return Err(ConfigError::Invalid(format!(
                "modules.{name} must be a mapping"
            )));
        }
        Ok(())
    }

    /// Deserializes the block under `modules.<name>`. An absent or empty
    /// block yields `T::default()`.
    pub fn module_config<T>(&self, name: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        match self.modules.get(name) {
            None | Some(serde_yaml::Value::Null) => Ok(T::default()),
            Some(value) => {
                serde_yaml::from_value(value.clone()).map_err(|source| ConfigError::Module {
                    module: name.to_string(),
                    source,
                })
            }
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.handler_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.drain_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Logs the effective configuration without secrets.
    pub fn log_summary(&self) {
        let mut modules: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        modules.sort_unstable();
        info!(
            port = self.port,
            db_path = %self.db_path.display(),
            github_token = self.github_token.is_some(),
            log_level = %self.log.level,
            log_format = ?self.log.format,
            handler_timeout_secs = self.dispatch.handler_timeout_secs,
            drain_timeout_secs = self.dispatch.drain_timeout_secs,
            shutdown_timeout_secs = self.shutdown_timeout_secs,
            modules = ?modules,
            "Loaded configuration"
        );
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("web_hook_secret", &"<redacted>")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("log", &self.log)
            .field("dispatch", &self.dispatch)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
