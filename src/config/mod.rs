//! Configuration for the authoritative store server and the sync core.
//!
//! All configuration is loaded from environment variables (optionally from
//! a `.env` file) with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::SyncError;
use crate::models::WeekLength;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to the SQLite file holding the authoritative tree
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_psk = lookup("BOARD_API_PSK").filter(|psk| !psk.is_empty());

        let db_path = lookup("BOARD_DB_PATH")
            .unwrap_or_else(|| "./data/board.sqlite".to_string())
            .into();

        let bind_addr = parse_var(&lookup, "BOARD_BIND_ADDR", "127.0.0.1:8080")?;

        let log_level = lookup("BOARD_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
        })
    }
}

/// Client-side sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether the remote store is used at all. When false the facade runs
    /// from the local cache permanently.
    pub remote_enabled: bool,
    /// Base URL of the authoritative store server
    pub remote_url: String,
    /// Pre-shared key sent with every remote request
    pub api_psk: Option<String>,
    /// Root segment under which all board data lives remotely
    pub namespace: String,
    /// Path to the local cache SQLite file
    pub cache_path: PathBuf,
    /// How often the facade reconciles its mode with connectivity
    pub mode_check_interval: Duration,
    /// How often the HTTP adapter probes the server for connectivity
    pub probe_interval: Duration,
    /// Delay before a dropped subscription stream is reopened
    pub retry_delay: Duration,
    /// Per-request timeout of the HTTP adapter
    pub request_timeout: Duration,
    /// Days shown on the board
    pub week: WeekLength,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_enabled: true,
            remote_url: "http://127.0.0.1:8080".to_string(),
            api_psk: None,
            namespace: "board".to_string(),
            cache_path: PathBuf::from("./data/cache.sqlite"),
            mode_check_interval: Duration::from_secs(5),
            probe_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            week: WeekLength::Five,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let remote_enabled = match lookup("BOARD_REMOTE_ENABLED") {
            Some(value) => parse_bool("BOARD_REMOTE_ENABLED", &value)?,
            None => defaults.remote_enabled,
        };

        let remote_url = lookup("BOARD_REMOTE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.remote_url);

        let namespace = lookup("BOARD_NAMESPACE").unwrap_or(defaults.namespace);
        if namespace.is_empty() || namespace.starts_with('.') || namespace.contains('/') {
            return Err(SyncError::Config(format!(
                "BOARD_NAMESPACE must be a single path segment, got '{}'",
                namespace
            )));
        }

        let week = match lookup("BOARD_WEEK").as_deref() {
            None | Some("5") => WeekLength::Five,
            Some("7") => WeekLength::Seven,
            Some(other) => {
                return Err(SyncError::Config(format!(
                    "BOARD_WEEK must be 5 or 7, got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            remote_enabled,
            remote_url,
            api_psk: lookup("BOARD_API_PSK").filter(|psk| !psk.is_empty()),
            namespace,
            cache_path: lookup("BOARD_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            mode_check_interval: parse_secs(&lookup, "BOARD_MODE_CHECK_SECS", 5)?,
            probe_interval: parse_secs(&lookup, "BOARD_PROBE_SECS", 5)?,
            retry_delay: parse_secs(&lookup, "BOARD_RETRY_SECS", 3)?,
            request_timeout: parse_secs(&lookup, "BOARD_REQUEST_TIMEOUT_SECS", 10)?,
            week,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> Result<T, SyncError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.parse()
        .map_err(|e| SyncError::Config(format!("Invalid {} '{}': {}", key, raw, e)))
}

fn parse_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, SyncError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_var(lookup, key, &default.to_string())?;
    if secs == 0 {
        return Err(SyncError::Config(format!("{} must be at least 1", key)));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SyncError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SyncError::Config(format!(
            "Invalid {} '{}': expected true or false",
            key, value
        ))),
    }
}
