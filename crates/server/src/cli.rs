//! Command line interface for the service binary.

use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "taskforged", version, about = "Concurrent task execution service")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long, env = "TASKFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen host, overriding the config file.
    #[arg(long, env = "TASKFORGE_HOST")]
    pub host: Option<String>,

    /// Listen port, overriding the config file.
    #[arg(long, env = "TASKFORGE_PORT")]
    pub port: Option<u16>,

    /// Log filter directive, overriding the config file (e.g. `debug`).
    #[arg(long, env = "TASKFORGE_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Applies command line overrides on top of the loaded configuration.
    pub fn apply(&self, cfg: &mut AppConfig) {
        if let Some(host) = &self.host {
            cfg.server.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(level) = &self.log_level {
            cfg.logger.level = level.clone();
        }
    }
}
