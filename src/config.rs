//! Configuration module for sync-socket.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the socket server
#[derive(Parser, Debug)]
#[command(name = "sync-socket")]
#[command(author = "sync-socket authors")]
#[command(version = "0.1.0")]
#[command(about = "A local Unix socket server for sync status queries", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Unix socket path to listen on
    #[arg(short, long)]
    pub socket: Option<PathBuf>,

    /// Size of the per-connection read buffer in bytes
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Path reported by the `paths` request (repeatable)
    #[arg(short = 'p', long = "watch-path")]
    pub watch_paths: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Socket path to bind
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
    /// Read buffer size per connection
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Deserialize)]
pub struct DispatchConfig {
    /// Paths returned for a `paths` request, in order
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            paths: default_paths(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/unix_socket.sock")
}

fn default_buffer_size() -> usize {
    4096
}

fn default_paths() -> Vec<String> {
    vec![
        "/Users/player/projects/sync".to_string(),
        "/Users/player/projects/test".to_string(),
        "/Users/player/projects/navicate".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub socket_path: PathBuf,
    pub buffer_size: usize,
    pub paths: Vec<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let buffer_size = cli.buffer_size.unwrap_or(toml_config.server.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize(buffer_size));
        }

        Ok(Config {
            socket_path: cli.socket.unwrap_or(toml_config.server.socket),
            buffer_size,
            paths: if cli.watch_paths.is_empty() {
                toml_config.dispatch.paths
            } else {
                cli.watch_paths
            },
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidBufferSize(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidBufferSize(size) => {
                write!(f, "Invalid buffer size {size}: must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
