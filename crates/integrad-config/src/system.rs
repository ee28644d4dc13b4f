//! System configuration parsing.
//!
//! ```kdl
//! socket "/var/integrad/integrad.sock"
//! database "/var/integrad/integrad.db"
//! shell "bash"
//! work-dir "/tmp/integrad"
//! workers 2
//! flush-interval-ms 500
//! log-buffer 64
//! max-command-bytes 1048576
//! store {
//!     retries 5
//!     backoff-ms 100
//! }
//! ```

use integrad_store::RetryPolicy;
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::kdl_ext::{require_string_arg, require_u64_arg};
use crate::{ConfigError, ConfigResult};

/// Settings read from a system config file or the command line.
/// Every field is optional; unset fields fall back to the next source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemConfig {
    pub socket: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub shell: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub log_buffer: Option<usize>,
    pub max_command_bytes: Option<usize>,
    pub store_retries: Option<u32>,
    pub store_backoff_ms: Option<u64>,
}

impl SystemConfig {
    /// Read and parse a system config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path)?;
        parse_system_config(&text)
    }

    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: SystemConfig) -> SystemConfig {
        SystemConfig {
            socket: self.socket.or(fallback.socket),
            database: self.database.or(fallback.database),
            shell: self.shell.or(fallback.shell),
            work_dir: self.work_dir.or(fallback.work_dir),
            workers: self.workers.or(fallback.workers),
            flush_interval_ms: self.flush_interval_ms.or(fallback.flush_interval_ms),
            log_buffer: self.log_buffer.or(fallback.log_buffer),
            max_command_bytes: self.max_command_bytes.or(fallback.max_command_bytes),
            store_retries: self.store_retries.or(fallback.store_retries),
            store_backoff_ms: self.store_backoff_ms.or(fallback.store_backoff_ms),
        }
    }
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
        match name {
            "socket" => config.socket = Some(require_string_arg(node)?.into()),
            "database" => config.database = Some(require_string_arg(node)?.into()),
            "shell" => config.shell = Some(require_string_arg(node)?),
            "work-dir" => config.work_dir = Some(require_string_arg(node)?.into()),
            "workers" => config.workers = Some(to_usize(node, require_u64_arg(node)?)?),
            "flush-interval-ms" => config.flush_interval_ms = Some(require_u64_arg(node)?),
            "log-buffer" => config.log_buffer = Some(to_usize(node, require_u64_arg(node)?)?),
            "max-command-bytes" => {
                config.max_command_bytes = Some(to_usize(node, require_u64_arg(node)?)?)
            }
            "store" => parse_store(node, &mut config)?,
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_store(node: &KdlNode, config: &mut SystemConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for child in children.nodes() {
        match child.name().value() {
            "retries" => {
                let retries = require_u64_arg(child)?;
                config.store_retries =
                    Some(u32::try_from(retries).map_err(|_| out_of_range(child, retries))?);
            }
            "backoff-ms" => config.store_backoff_ms = Some(require_u64_arg(child)?),
            _ => {}
        }
    }
    Ok(())
}

fn to_usize(node: &KdlNode, value: u64) -> ConfigResult<usize> {
    usize::try_from(value).map_err(|_| out_of_range(node, value))
}

fn out_of_range(node: &KdlNode, value: u64) -> ConfigError {
    ConfigError::InvalidValue {
        field: node.name().value().to_string(),
        message: format!("{value} is out of range"),
    }
}

/// Fully resolved daemon settings, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub socket: PathBuf,
    pub database: PathBuf,
    pub shell: String,
    pub work_dir: PathBuf,
    pub workers: usize,
    pub flush_interval: Duration,
    pub log_buffer: usize,
    pub max_command_bytes: usize,
    pub store_retries: u32,
    pub store_backoff: Duration,
}

impl DaemonConfig {
    pub const DEFAULT_SOCKET: &'static str = "/var/integrad/integrad.sock";
    pub const DEFAULT_DATABASE: &'static str = "/var/integrad/integrad.db";
    pub const DEFAULT_SHELL: &'static str = "bash";
    pub const DEFAULT_WORK_DIR: &'static str = "/tmp/integrad";

    /// Apply built-in defaults to the unset fields of `system` and validate the result.
    pub fn resolve(system: SystemConfig) -> ConfigResult<Self> {
        let config = Self {
            socket: system
                .socket
                .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_SOCKET)),
            database: system
                .database
                .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_DATABASE)),
            shell: system
                .shell
                .unwrap_or_else(|| Self::DEFAULT_SHELL.to_string()),
            work_dir: system
                .work_dir
                .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_WORK_DIR)),
            workers: system.workers.unwrap_or(1),
            flush_interval: Duration::from_millis(system.flush_interval_ms.unwrap_or(500)),
            log_buffer: system.log_buffer.unwrap_or(64),
            max_command_bytes: system.max_command_bytes.unwrap_or(1024 * 1024),
            store_retries: system.store_retries.unwrap_or(5),
            store_backoff: Duration::from_millis(system.store_backoff_ms.unwrap_or(100)),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("workers", self.workers as u128),
            ("flush-interval-ms", self.flush_interval.as_millis()),
            ("log-buffer", self.log_buffer as u128),
            ("max-command-bytes", self.max_command_bytes as u128),
            ("retries", self.store_retries as u128),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.shell.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "shell".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Retry policy for store operations on background paths.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.store_retries,
            backoff: self.store_backoff,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(Self::DEFAULT_SOCKET),
            database: PathBuf::from(Self::DEFAULT_DATABASE),
            shell: Self::DEFAULT_SHELL.to_string(),
            work_dir: PathBuf::from(Self::DEFAULT_WORK_DIR),
            workers: 1,
            flush_interval: Duration::from_millis(500),
            log_buffer: 64,
            max_command_bytes: 1024 * 1024,
            store_retries: 5,
            store_backoff: Duration::from_millis(100),
        }
    }
}
