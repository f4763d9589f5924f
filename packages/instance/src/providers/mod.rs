// ABOUTME: Container provider trait shared by every engine backend
// ABOUTME: Defines container specs, assigned port bindings and engine-neutral status

use arena_config::{OrchestratorConfig, ProviderKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod docker;
pub mod memory;

pub use docker::DockerProvider;
pub use memory::MemoryProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Container error: {0}")]
    ContainerError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    /// Engine unreachable, as opposed to the engine rejecting a request
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ProviderError::ConnectionError(_) | ProviderError::NotAvailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// What to run for one challenge instance
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub instance_id: String,
    pub image: String,
    pub env_vars: HashMap<String, String>,
    pub exposed_ports: Vec<u16>,
    pub memory_mb: u64,
    pub cpu_cores: f64,
}

/// Container port published on a host port chosen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

impl PortBinding {
    pub fn with_entry_host(mut self, host: &str) -> Self {
        self.entry = Some(format!("{}:{}", host, self.host_port));
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionedContainer {
    pub container_id: String,
    pub ports: Vec<PortBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Created,
    Running,
    Paused,
    Exited,
    Removed,
    Unknown,
}

impl BackendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Removed => "removed",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the container must be stopped before it can be removed
    pub fn needs_stop(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container found on the engine carrying the orchestrator's labels
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub container_id: String,
    pub instance_id: Option<String>,
    pub status: BackendStatus,
}

/// Capability trait every container engine backend implements
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &'static str;

    /// Check if the engine answers
    async fn is_available(&self) -> Result<bool>;

    /// Create and start a container, returning the host ports the engine picked
    async fn setup(&self, spec: &ContainerSpec) -> Result<ProvisionedContainer>;

    /// Current state; a container the engine no longer knows is `Removed`
    async fn inspect(&self, container_id: &str) -> Result<BackendStatus>;

    /// Stop the container and wait until it is no longer running
    async fn stop(&self, container_id: &str) -> Result<()>;

    /// Remove the container; removing a missing container succeeds
    async fn remove(&self, container_id: &str) -> Result<()>;

    /// Every container labelled as managed by this orchestrator
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>>;
}

/// Build the provider selected in configuration. `Ok(None)` means no provider is configured.
pub fn from_config(config: &OrchestratorConfig) -> Result<Option<Arc<dyn Provider>>> {
    match config.provider {
        None => Ok(None),
        Some(ProviderKind::Docker) => {
            let provider = DockerProvider::with_settings(
                &config.label_prefix,
                config.pull_timeout,
                config.stop_timeout,
            )?;
            Ok(Some(Arc::new(provider)))
        }
        Some(ProviderKind::Memory) => Ok(Some(Arc::new(MemoryProvider::new()))),
        Some(ProviderKind::Kubernetes) => Err(ProviderError::ConfigError(
            "the k8s provider is not supported; use docker".to_string(),
        )),
    }
}
