//! Configuration module for clusterpulse.
//!
//! Settings are read from command-line flags, then `CLUSTERPULSE_*`
//! environment variables, then an optional TOML file given with `--config`.
//! Anything still unset falls back to the defaults below.

use crate::checker::CheckerConfig;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Log output preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPreset {
    /// Human readable output
    #[default]
    Dev,
    /// One JSON object per line
    Prod,
}

/// Command-line interface.
///
/// Every field is optional so that unset flags can be filled from the file.
#[derive(Parser, Debug, Default)]
#[command(name = "clusterpulse", version)]
#[command(about = "Cluster health check based on the share of healthy services")]
#[command(long_about = "Reports whether a cluster is healthy (HTTP 200 OK) or not (HTTP 500) \
based on the percentage of monitored services that pass their health checks.\n\n\
A service is marked failed after --failed-hc-cnt consecutive failed checks and \
healthy after --successful-hc-cnt consecutive successful checks. Services are \
registered through the /services API.")]
pub struct Cli {
    /// Unique cluster identifier included in every report
    #[arg(short = 'i', long, env = "CLUSTERPULSE_CLUSTER_ID")]
    pub cluster_id: Option<String>,

    /// Bind address ("*" for all interfaces)
    #[arg(short = 'l', long, env = "CLUSTERPULSE_LISTEN_ADDRESS")]
    pub listen_address: Option<String>,

    /// Bind port
    #[arg(short = 'p', long, env = "CLUSTERPULSE_PORT")]
    pub port: Option<u16>,

    /// Time between two consecutive health checks (e.g. 30s, 1m, 1m30s)
    #[arg(
        short = 't',
        long = "time-between-hc",
        env = "CLUSTERPULSE_TIME_BETWEEN_HC",
        value_parser = parse_duration
    )]
    pub interval: Option<Duration>,

    /// Consecutive successful checks before a service is healthy
    #[arg(short = 's', long = "successful-hc-cnt", env = "CLUSTERPULSE_SUCCESSFUL_HC_CNT")]
    pub success_threshold: Option<u32>,

    /// Consecutive failed checks before a service is failed
    #[arg(short = 'F', long = "failed-hc-cnt", env = "CLUSTERPULSE_FAILED_HC_CNT")]
    pub failure_threshold: Option<u32>,

    /// Percentage of healthy services needed for a healthy cluster
    #[arg(short = 'P', long = "status-threshold", env = "CLUSTERPULSE_STATUS_THRESHOLD")]
    pub state_threshold: Option<u32>,

    /// Log preset
    #[arg(long, value_enum, env = "CLUSTERPULSE_LOG_PRESET")]
    pub log_preset: Option<LogPreset>,

    /// Path to a TOML configuration file
    #[arg(short = 'f', long = "config", env = "CLUSTERPULSE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Settings accepted in the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub cluster_id: Option<String>,
    pub listen_address: Option<String>,
    pub port: Option<u16>,
    pub time_between_hc: Option<String>,
    pub successful_hc_cnt: Option<u32>,
    pub failed_hc_cnt: Option<u32>,
    pub status_threshold: Option<u32>,
    pub log_preset: Option<LogPreset>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub cluster_id: String,
    /// Bind address for the web server (default: all interfaces)
    pub listen_address: String,
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Time between checks of one service (default: 1m)
    pub interval: Duration,
    /// Consecutive successes to become healthy (default: 1)
    pub success_threshold: u32,
    /// Consecutive failures to become failed (default: 2)
    pub failure_threshold: u32,
    /// Healthy percentage for a healthy cluster (default: 100)
    pub state_threshold: u32,
    pub log_preset: LogPreset,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            listen_address: "0.0.0.0".to_string(),
            http_port: 8080,
            interval: Duration::from_secs(60),
            success_threshold: 1,
            failure_threshold: 2,
            state_threshold: 100,
            log_preset: LogPreset::Dev,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process arguments and environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(Cli::parse())
    }

    /// Merge parsed flags with the optional file and the defaults.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let defaults = Self::default();

        let file_interval = file
            .time_between_hc
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|message| ConfigError::Invalid {
                key: "time_between_hc",
                message,
            })?;

        let cluster_id = cli
            .cluster_id
            .or(file.cluster_id)
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::Missing("cluster-id"))?;

        let mut listen_address = cli
            .listen_address
            .or(file.listen_address)
            .unwrap_or(defaults.listen_address);
        if listen_address == "*" {
            listen_address = "0.0.0.0".to_string();
        }

        Ok(Self {
            cluster_id,
            listen_address,
            http_port: cli.port.or(file.port).unwrap_or(defaults.http_port),
            interval: cli.interval.or(file_interval).unwrap_or(defaults.interval),
            success_threshold: cli
                .success_threshold
                .or(file.successful_hc_cnt)
                .unwrap_or(defaults.success_threshold),
            failure_threshold: cli
                .failure_threshold
                .or(file.failed_hc_cnt)
                .unwrap_or(defaults.failure_threshold),
            state_threshold: cli
                .state_threshold
                .or(file.status_threshold)
                .unwrap_or(defaults.state_threshold),
            log_preset: cli.log_preset.or(file.log_preset).unwrap_or(defaults.log_preset),
        })
    }

    /// `host:port` to bind the web server to.
    pub fn bind_address(&self) -> String {
        if self.listen_address.contains(':') {
            format!("[{}]:{}", self.listen_address, self.http_port)
        } else {
            format!("{}:{}", self.listen_address, self.http_port)
        }
    }

    pub fn checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            interval: self.interval,
            success_threshold: self.success_threshold,
            failure_threshold: self.failure_threshold,
            state_threshold: self.state_threshold,
            ..CheckerConfig::new(self.cluster_id.clone())
        }
    }
}

/// Parse a duration such as "500ms", "30s", "2m", "1h", "1m30s" or a plain
/// number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration: {}", s));
        }
        let num: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid number in duration: {}", s))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(num),
            "s" => Duration::from_secs(num),
            "m" => Duration::from_secs(num * 60),
            "h" => Duration::from_secs(num * 3600),
            "" => return Err(format!("missing unit in duration: {}", s)),
            unit => return Err(format!("invalid unit {:?} in duration: {}", unit, s)),
        };
        rest = &rest[unit_len..];
        total += part;
    }

    Ok(total)
}
