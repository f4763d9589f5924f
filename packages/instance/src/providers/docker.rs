// ABOUTME: Docker provider for challenge containers
// ABOUTME: Uses bollard to pull images, publish exposed ports and tear containers down

use super::{
    BackendStatus, ContainerSpec, ManagedContainer, PortBinding, Provider, ProviderError,
    ProvisionedContainer, Result,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
        WaitContainerOptions,
    },
    errors::Error as DockerError,
    image::CreateImageOptions,
    models::{HostConfig, PortMap},
    Docker,
};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DockerProvider {
    client: Docker,
    label_prefix: String,
    /// Images already pulled by this process
    image_cache: Arc<RwLock<HashSet<String>>>,
    pull_timeout: Duration,
    stop_timeout: Duration,
}

impl DockerProvider {
    pub fn new() -> Result<Self> {
        Self::with_settings("arena", DEFAULT_PULL_TIMEOUT, DEFAULT_STOP_TIMEOUT)
    }

    pub fn with_settings(
        label_prefix: &str,
        pull_timeout: Duration,
        stop_timeout: Duration,
    ) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(Self::with_client(client, label_prefix, pull_timeout, stop_timeout))
    }

    pub fn with_client(
        client: Docker,
        label_prefix: &str,
        pull_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            client,
            label_prefix: label_prefix.to_string(),
            image_cache: Arc::new(RwLock::new(HashSet::new())),
            pull_timeout,
            stop_timeout,
        }
    }

    fn managed_label(&self) -> String {
        format!("{}.managed", self.label_prefix)
    }

    fn instance_label(&self) -> String {
        format!("{}.instance", self.label_prefix)
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.image_cache.read().await.contains(image) {
            debug!("Image {} found in cache, skipping pull", image);
            return Ok(());
        }

        match self.client.inspect_image(image).await {
            Ok(_) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => self.pull_image(image).await?,
            Err(e) => return Err(ProviderError::ImageError(e.to_string())),
        }

        self.image_cache.write().await.insert(image.to_string());
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let pulled = tokio::time::timeout(self.pull_timeout, async {
            while let Some(result) = stream.next().await {
                let progress =
                    result.map_err(|e| ProviderError::ImageError(format!("{}: {}", image, e)))?;
                if let Some(error) = progress.error {
                    return Err(ProviderError::ImageError(format!("{}: {}", image, error)));
                }
                if let Some(status) = progress.status {
                    debug!("Pull status for {}: {}", image, status);
                }
            }
            Ok(())
        })
        .await;

        match pulled {
            Ok(result) => result,
            Err(_) => Err(ProviderError::ImageError(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }

    async fn published_ports(&self, container_id: &str) -> Result<Vec<PortBinding>> {
        let inspect = self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(container_id, e))?;

        Ok(inspect
            .network_settings
            .and_then(|ns| ns.ports)
            .map(|ports| parse_port_map(&ports))
            .unwrap_or_default())
    }

    /// Best-effort cleanup of a container whose setup did not finish
    async fn discard(&self, container_id: &str) {
        if let Err(e) = self.remove(container_id).await {
            warn!(
                "Failed to clean up half-created container {}: {}",
                container_id, e
            );
        }
    }
}

/// Container name derived from the instance id
pub fn container_name(label_prefix: &str, instance_id: &str) -> String {
    format!("{}-{}", label_prefix, instance_id.replace('-', ""))
}

fn to_bollard_config(label_prefix: &str, spec: &ContainerSpec) -> Config<String> {
    let labels = HashMap::from([
        (format!("{}.managed", label_prefix), "true".to_string()),
        (
            format!("{}.instance", label_prefix),
            spec.instance_id.clone(),
        ),
    ]);

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &spec.exposed_ports {
        let key = format!("{}/tcp", port);
        exposed_ports.insert(key.clone(), HashMap::new());
        // No host port: the engine assigns one
        port_bindings.insert(
            key,
            Some(vec![bollard::models::PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: None,
            }]),
        );
    }

    let mut env: Vec<String> = spec
        .env_vars
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.sort();

    let host_config = HostConfig {
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        memory: (spec.memory_mb > 0).then(|| (spec.memory_mb * 1024 * 1024) as i64),
        nano_cpus: (spec.cpu_cores > 0.0).then(|| (spec.cpu_cores * 1_000_000_000.0) as i64),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        labels: Some(labels),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn parse_port_map(ports: &PortMap) -> Vec<PortBinding> {
    let mut bindings = Vec::new();
    for (container_port_str, host_bindings) in ports {
        // Format: "3000/tcp"
        let Some(Ok(container_port)) = container_port_str
            .split('/')
            .next()
            .map(|p| p.parse::<u16>())
        else {
            continue;
        };

        let host_port = host_bindings
            .as_ref()
            .and_then(|b| b.first())
            .and_then(|b| b.host_port.as_ref())
            .and_then(|p| p.parse::<u16>().ok());

        if let Some(host_port) = host_port {
            bindings.push(PortBinding {
                container_port,
                host_port,
                entry: None,
            });
        }
    }
    bindings.sort_by_key(|b| b.container_port);
    bindings
}

fn convert_status(state: &str) -> BackendStatus {
    match state.to_lowercase().as_str() {
        "created" => BackendStatus::Created,
        "running" | "restarting" => BackendStatus::Running,
        "paused" => BackendStatus::Paused,
        "exited" | "dead" => BackendStatus::Exited,
        "removing" => BackendStatus::Removed,
        _ => BackendStatus::Unknown,
    }
}

fn map_error(container_id: &str, error: DockerError) -> ProviderError {
    match error {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => ProviderError::NotFound(container_id.to_string()),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => ProviderError::ContainerError(format!("{} ({}): {}", container_id, status_code, message)),
        other => ProviderError::ConnectionError(other.to_string()),
    }
}

#[async_trait]
impl Provider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn setup(&self, spec: &ContainerSpec) -> Result<ProvisionedContainer> {
        let name = container_name(&self.label_prefix, &spec.instance_id);
        info!("Creating container {} from {}", name, spec.image);

        self.ensure_image(&spec.image).await?;

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let container = self
            .client
            .create_container(Some(options), to_bollard_config(&self.label_prefix, spec))
            .await
            .map_err(|e| map_error(&name, e))?;

        debug!("Created container: {}", container.id);

        if let Err(e) = self
            .client
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&container.id).await;
            return Err(map_error(&container.id, e));
        }

        let ports = match self.published_ports(&container.id).await {
            Ok(ports) => ports,
            Err(e) => {
                self.discard(&container.id).await;
                return Err(e);
            }
        };

        if ports.len() < spec.exposed_ports.len() {
            self.discard(&container.id).await;
            return Err(ProviderError::ContainerError(format!(
                "container {} published {} of {} ports",
                container.id,
                ports.len(),
                spec.exposed_ports.len()
            )));
        }

        Ok(ProvisionedContainer {
            container_id: container.id,
            ports,
        })
    }

    async fn inspect(&self, container_id: &str) -> Result<BackendStatus> {
        let inspect = match self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(BackendStatus::Removed),
            Err(e) => return Err(map_error(container_id, e)),
        };

        Ok(inspect
            .state
            .as_ref()
            .and_then(|state| state.status.as_ref())
            .map(|s| convert_status(s.as_ref()))
            .unwrap_or(BackendStatus::Unknown))
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        info!(
            "Stopping container: {} (timeout: {:?})",
            container_id, self.stop_timeout
        );

        let options = StopContainerOptions {
            t: self.stop_timeout.as_secs() as i64,
        };
        match self.client.stop_container(container_id, Some(options)).await {
            Ok(_) => {}
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(()),
            Err(e) => return Err(map_error(container_id, e)),
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.client.wait_container(container_id, Some(options));
        while let Some(result) = wait.next().await {
            match result {
                Ok(_) => {}
                // Non-zero exit codes surface as errors; the container is stopped either way
                Err(DockerError::DockerContainerWaitError { .. }) => {}
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => {}
                Err(e) => return Err(map_error(container_id, e)),
            }
        }

        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        info!("Removing container: {}", container_id);

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self
            .client
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(e) => Err(map_error(container_id, e)),
        }
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}=true", self.managed_label())],
        )]);
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        let instance_label = self.instance_label();
        Ok(containers
            .into_iter()
            .filter_map(|container| {
                let container_id = container.id?;
                let instance_id = container
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(&instance_label))
                    .cloned();
                let status = container
                    .state
                    .as_deref()
                    .map(convert_status)
                    .unwrap_or(BackendStatus::Unknown);
                Some(ManagedContainer {
                    container_id,
                    instance_id,
                    status,
                })
            })
            .collect())
    }
}
