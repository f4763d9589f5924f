// ABOUTME: Process-wide orchestrator configuration parsed from environment variables
// ABOUTME: Selects the container backend once at startup and carries engine timeouts

use crate::constants::*;
use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PUBLIC_ENTRY_HOST: &str = "127.0.0.1";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://arena.db?mode=rwc";
pub const DEFAULT_LABEL_PREFIX: &str = "arena";
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PULL_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REGISTRY_RETENTION_SECS: u64 = 600;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {source}")]
    InvalidNumber {
        name: &'static str,
        source: ParseIntError,
    },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("Unknown container provider: {0}")]
    InvalidProvider(String),
    #[error("Invalid label prefix '{0}': use lowercase letters, digits, '-' or '.'")]
    InvalidLabelPrefix(String),
}

/// Container engine family the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Docker,
    Kubernetes,
    /// In-process engine; no real containers are started
    Memory,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Kubernetes => "k8s",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(ProviderKind::Docker),
            "k8s" | "kubernetes" => Ok(ProviderKind::Kubernetes),
            "memory" => Ok(ProviderKind::Memory),
            _ => Err(ConfigError::InvalidProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// `None` when no provider is configured; creation is rejected in that case
    pub provider: Option<ProviderKind>,
    pub public_entry_host: String,
    pub database_url: String,
    pub label_prefix: String,
    pub stop_timeout: Duration,
    pub pull_timeout: Duration,
    pub sweep_interval: Duration,
    pub registry_retention: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider: None,
            public_entry_host: DEFAULT_PUBLIC_ENTRY_HOST.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
            stop_timeout: Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS),
            pull_timeout: Duration::from_secs(DEFAULT_PULL_TIMEOUT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            registry_retention: Duration::from_secs(DEFAULT_REGISTRY_RETENTION_SECS),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = get(ARENA_PROVIDER)
            .map(|p| p.parse::<ProviderKind>())
            .transpose()?;

        let public_entry_host =
            get(ARENA_PUBLIC_ENTRY_HOST).unwrap_or_else(|| DEFAULT_PUBLIC_ENTRY_HOST.to_string());

        let database_url = get(ARENA_DATABASE_URL)
            .or_else(|| get(DATABASE_URL))
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let label_prefix =
            get(ARENA_LABEL_PREFIX).unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_string());
        if !label_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(ConfigError::InvalidLabelPrefix(label_prefix));
        }

        let secs = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            let value = match get(name) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|source| ConfigError::InvalidNumber { name, source })?,
                None => default,
            };
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
            Ok(Duration::from_secs(value))
        };

        Ok(Self {
            provider,
            public_entry_host,
            database_url,
            label_prefix,
            stop_timeout: secs(ARENA_STOP_TIMEOUT_SECS, DEFAULT_STOP_TIMEOUT_SECS)?,
            pull_timeout: secs(ARENA_PULL_TIMEOUT_SECS, DEFAULT_PULL_TIMEOUT_SECS)?,
            sweep_interval: secs(ARENA_SWEEP_INTERVAL_SECS, DEFAULT_SWEEP_INTERVAL_SECS)?,
            registry_retention: secs(
                ARENA_REGISTRY_RETENTION_SECS,
                DEFAULT_REGISTRY_RETENTION_SECS,
            )?,
        })
    }
}
