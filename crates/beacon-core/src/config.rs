//! Configuration system for Beacon.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BEACON_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/beacon/config.toml
//!   3. ~/.config/beacon/config.toml

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::{
    ANNOUNCE_GROUP, ANNOUNCE_PORT, DEFAULT_CACHE_CAPACITY, DEFAULT_EXPIRATION_SECS,
    MAX_DATAGRAM_SIZE,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub presence: PresenceConfig,
    pub network: NetworkConfig,
}

/// Startup parameters of the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Expiration used when an announce carries none (or a non-positive one).
    pub default_expiration_secs: u64,
    /// Bound of the raw message → announce index.
    pub content_cache_capacity: usize,
    /// Bound of the path identity → raw message index.
    pub path_cache_capacity: usize,
    /// How long shutdown waits for an in-flight expiration before giving up.
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// IPv4 multicast group to join.
    pub multicast_addr: Ipv4Addr,
    /// UDP port announces arrive on.
    pub port: u16,
    /// Local interface addresses to join the group on. Empty = 0.0.0.0.
    pub interfaces: Vec<Ipv4Addr>,
    /// Receive buffer size per datagram.
    pub max_datagram_size: usize,
    /// Loopback port for the HTTP status endpoint.
    pub api_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            default_expiration_secs: DEFAULT_EXPIRATION_SECS,
            content_cache_capacity: DEFAULT_CACHE_CAPACITY,
            path_cache_capacity: DEFAULT_CACHE_CAPACITY,
            shutdown_grace_ms: 500,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            multicast_addr: ANNOUNCE_GROUP,
            port: ANNOUNCE_PORT,
            interfaces: Vec::new(),
            max_datagram_size: MAX_DATAGRAM_SIZE,
            api_port: 9765,
        }
    }
}

impl PresenceConfig {
    pub fn default_expiration(&self) -> Duration {
        Duration::from_secs(self.default_expiration_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("beacon")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BeaconConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            BeaconConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BEACON_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&BeaconConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply BEACON_* overrides. Unparsable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = &var;
        if let Some(v) = env_parsed(var, "BEACON_PRESENCE__DEFAULT_EXPIRATION_SECS") {
            self.presence.default_expiration_secs = v;
        }
        if let Some(v) = env_parsed(var, "BEACON_PRESENCE__CONTENT_CACHE_CAPACITY") {
            self.presence.content_cache_capacity = v;
        }
        if let Some(v) = env_parsed(var, "BEACON_PRESENCE__PATH_CACHE_CAPACITY") {
            self.presence.path_cache_capacity = v;
        }
        if let Some(v) = env_parsed(var, "BEACON_NETWORK__MULTICAST_ADDR") {
            self.network.multicast_addr = v;
        }
        if let Some(v) = env_parsed(var, "BEACON_NETWORK__PORT") {
            self.network.port = v;
        }
        if let Some(v) = env_parsed(var, "BEACON_NETWORK__API_PORT") {
            self.network.api_port = v;
        }
        if let Some(list) = var("BEACON_NETWORK__INTERFACES") {
            self.network.interfaces = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| parse_or_warn("BEACON_NETWORK__INTERFACES", s))
                .collect();
        }
    }
}

fn env_parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    parse_or_warn(key, &var(key)?)
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "ignoring unparsable config override");
            None
        }
    }
}
