//! Server configuration: YAML file plus CLI/env overrides.
//!
//! Every section deserializes with defaults, so a missing or partial config
//! file yields a runnable service.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use taskforge_engine::{TaskConfig, WorkerConfig};

/// Default config file location, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Listen address for the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Console,
        }
    }
}

/// The full service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: HttpConfig,
    pub worker: WorkerConfig,
    pub task: TaskConfig,
    pub logger: LoggerConfig,
}

impl AppConfig {
    /// Loads configuration from the given path, or from
    /// `configs/config.yaml` when present, or falls back to defaults.
    ///
    /// An explicitly supplied path must be readable; the implicit default
    /// location may be absent.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml_ng::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
