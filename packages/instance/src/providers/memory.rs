// ABOUTME: In-process provider that simulates a container engine without starting anything
// ABOUTME: Used for local development and deterministic lifecycle tests, with fault injection

use super::{
    BackendStatus, ContainerSpec, ManagedContainer, PortBinding, Provider, ProviderError,
    ProvisionedContainer, Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

const FIRST_HOST_PORT: u16 = 30000;

#[derive(Debug, Clone)]
struct MemoryContainer {
    instance_id: String,
    status: BackendStatus,
}

#[derive(Default)]
struct CallCounts {
    setup: AtomicUsize,
    inspect: AtomicUsize,
    stop: AtomicUsize,
    remove: AtomicUsize,
}

pub struct MemoryProvider {
    containers: RwLock<HashMap<String, MemoryContainer>>,
    next_port: AtomicU16,
    next_id: AtomicUsize,
    available: AtomicBool,
    fail_setup: AtomicBool,
    fail_teardown: AtomicBool,
    calls: CallCounts,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            next_port: AtomicU16::new(FIRST_HOST_PORT),
            next_id: AtomicUsize::new(1),
            available: AtomicBool::new(true),
            fail_setup: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
            calls: CallCounts::default(),
        }
    }

    /// Make the engine look unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make `setup` fail with a container error
    pub fn set_fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }

    /// Make `stop` and `remove` fail with a transient error
    pub fn set_fail_teardown(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    /// Drop a container behind the orchestrator's back
    pub async fn forget(&self, container_id: &str) {
        self.containers.write().await.remove(container_id);
    }

    /// Number of containers the engine still knows about
    pub async fn container_count(&self) -> usize {
        self.containers.read().await.len()
    }

    pub async fn running_count(&self) -> usize {
        self.containers
            .read()
            .await
            .values()
            .filter(|c| c.status == BackendStatus::Running)
            .count()
    }

    pub fn setup_calls(&self) -> usize {
        self.calls.setup.load(Ordering::SeqCst)
    }

    pub fn inspect_calls(&self) -> usize {
        self.calls.inspect.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.calls.stop.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.calls.remove.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProviderError::ConnectionError(
                "memory engine is offline".to_string(),
            ))
        }
    }

    fn check_teardown(&self, container_id: &str) -> Result<()> {
        self.check_available()?;
        if self.fail_teardown.load(Ordering::SeqCst) {
            return Err(ProviderError::ContainerError(format!(
                "injected teardown failure for {}",
                container_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn setup(&self, spec: &ContainerSpec) -> Result<ProvisionedContainer> {
        self.calls.setup.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(ProviderError::ImageError(format!(
                "injected setup failure for {}",
                spec.image
            )));
        }

        let container_id = format!("mem-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let ports = spec
            .exposed_ports
            .iter()
            .map(|&container_port| PortBinding {
                container_port,
                host_port: self.next_port.fetch_add(1, Ordering::SeqCst),
                entry: None,
            })
            .collect();

        self.containers.write().await.insert(
            container_id.clone(),
            MemoryContainer {
                instance_id: spec.instance_id.clone(),
                status: BackendStatus::Running,
            },
        );
        debug!("Started memory container {} for {}", container_id, spec.instance_id);

        Ok(ProvisionedContainer {
            container_id,
            ports,
        })
    }

    async fn inspect(&self, container_id: &str) -> Result<BackendStatus> {
        self.calls.inspect.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .containers
            .read()
            .await
            .get(container_id)
            .map(|c| c.status)
            .unwrap_or(BackendStatus::Removed))
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        self.check_teardown(container_id)?;
        if let Some(container) = self.containers.write().await.get_mut(container_id) {
            container.status = BackendStatus::Exited;
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.calls.remove.fetch_add(1, Ordering::SeqCst);
        self.check_teardown(container_id)?;
        self.containers.write().await.remove(container_id);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>> {
        self.check_available()?;
        let mut managed: Vec<ManagedContainer> = self
            .containers
            .read()
            .await
            .iter()
            .map(|(id, c)| ManagedContainer {
                container_id: id.clone(),
                instance_id: Some(c.instance_id.clone()),
                status: c.status,
            })
            .collect();
        managed.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        Ok(managed)
    }
}
