//! Server configuration module.
//!
//! Parses configuration from environment variables for the TaskSync server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 3001 | HTTP / WebSocket server port |
//! | `TASKSYNC_ENABLED` | No | true | Set to `false` to disable file watching |
//! | `TASKSYNC_MAX_REPOSITORIES` | No | 10 | Maximum number of monitored repositories |
//! | `TASKSYNC_DEBOUNCE_MS` | No | 100 | Debounce window for file changes |
//! | `TASKSYNC_ERROR_THRESHOLD` | No | - | Consecutive watch errors before a repository is dropped |
//! | `TASKSYNC_REPOSITORIES` | No | - | Comma-separated repositories to monitor at startup |

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 3001;

/// Default capacity of the monitored-repository set.
pub const DEFAULT_MAX_REPOSITORIES: usize = 10;

/// Default debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Settings for the sync orchestrator and its watch registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// When false, `initialize` skips starting the watch registry.
    pub enabled: bool,

    /// Soft cap on the monitored-repository set; extra adds are ignored.
    pub max_repositories: usize,

    /// Quiet period after the last raw event before the file is read.
    pub debounce: Duration,

    /// Consecutive `TASKS_ERROR`s after which a repository is deregistered.
    /// `None` keeps failing repositories registered indefinitely.
    pub error_threshold: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_repositories: DEFAULT_MAX_REPOSITORIES,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            error_threshold: None,
        }
    }
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Orchestrator and watcher settings.
    pub sync: SyncConfig,

    /// Repositories added right after the orchestrator is initialized.
    pub repositories: Vec<String>,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `PORT` is not a valid u16
    /// - `TASKSYNC_MAX_REPOSITORIES` or `TASKSYNC_ERROR_THRESHOLD` is not a positive integer
    /// - `TASKSYNC_DEBOUNCE_MS` is not a non-negative integer
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tasksync_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port()?;

        let sync = SyncConfig {
            enabled: parse_bool_env("TASKSYNC_ENABLED", true),
            max_repositories: parse_positive_env("TASKSYNC_MAX_REPOSITORIES")?
                .unwrap_or(DEFAULT_MAX_REPOSITORIES),
            debounce: Duration::from_millis(parse_debounce_ms()?),
            error_threshold: parse_positive_env("TASKSYNC_ERROR_THRESHOLD")?
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        };

        let repositories = parse_repositories();

        Ok(Self {
            port,
            sync,
            repositories,
        })
    }
}

/// Parse a boolean environment variable.
///
/// `true`/`1` and `false`/`0` are recognized case-insensitively; anything
/// else, or an unset variable, yields `default`.
fn parse_bool_env(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Ok(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
        _ => default,
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => {
            Err(ConfigError::invalid("PORT", "contains invalid unicode"))
        }
    }
}

/// Parse an optional strictly positive integer.
fn parse_positive_env(name: &str) -> Result<Option<usize>, ConfigError> {
    let raw = match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return Ok(None),
    };

    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::invalid(name, "must be greater than 0")),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(ConfigError::invalid(
            name,
            format!("expected positive integer, got '{raw}'"),
        )),
    }
}

/// Parse TASKSYNC_DEBOUNCE_MS, allowing zero.
fn parse_debounce_ms() -> Result<u64, ConfigError> {
    match env::var("TASKSYNC_DEBOUNCE_MS") {
        Ok(v) if !v.trim().is_empty() => v.trim().parse::<u64>().map_err(|_| {
            ConfigError::invalid(
                "TASKSYNC_DEBOUNCE_MS",
                format!("expected non-negative integer, got '{v}'"),
            )
        }),
        _ => Ok(DEFAULT_DEBOUNCE_MS),
    }
}

/// Parse TASKSYNC_REPOSITORIES as a comma-separated list, skipping blanks.
fn parse_repositories() -> Vec<String> {
    env::var("TASKSYNC_REPOSITORIES")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
