// ABOUTME: In-memory runtime for one live instance: phase, ports, deadline and expiry timer
// ABOUTME: Drives provisioning, renewal and idempotent teardown against a provider

use crate::providers::{
    BackendStatus, ContainerSpec, PortBinding, Provider, ProviderError, ProvisionedContainer,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Instance is no longer live: {0}")]
    NotLive(String),

    #[error("Duration {0:?} is out of range")]
    InvalidDuration(Duration),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Provisioning,
    Running,
    Renewing,
    Removing,
    Removed,
}

struct RuntimeState {
    phase: Phase,
    container_id: Option<String>,
    ports: Vec<PortBinding>,
    duration: Duration,
    deadline: Option<Instant>,
    /// Dropping the sender cancels the armed expiry
    expiry_cancel: Option<oneshot::Sender<()>>,
    /// Bumped on every arm so a stale expiry can recognise itself
    expiry_generation: u64,
    removed_since: Option<Instant>,
}

pub struct InstanceRuntime {
    id: String,
    provider: Arc<dyn Provider>,
    state: Mutex<RuntimeState>,
    teardown_lock: Mutex<()>,
}

impl InstanceRuntime {
    fn with_state(id: String, provider: Arc<dyn Provider>, state: RuntimeState) -> Arc<Self> {
        Arc::new(Self {
            id,
            provider,
            state: Mutex::new(state),
            teardown_lock: Mutex::new(()),
        })
    }

    /// Start the container and arm expiry at now + `duration`.
    pub async fn provision(
        id: String,
        provider: Arc<dyn Provider>,
        spec: &ContainerSpec,
        duration: Duration,
    ) -> Result<Arc<Self>> {
        expiry_deadline(duration)?;

        let runtime = Self::with_state(
            id,
            provider,
            RuntimeState {
                phase: Phase::Provisioning,
                container_id: None,
                ports: Vec::new(),
                duration,
                deadline: None,
                expiry_cancel: None,
                expiry_generation: 0,
                removed_since: None,
            },
        );

        let ProvisionedContainer {
            container_id,
            ports,
        } = runtime.provider.setup(spec).await?;

        info!(
            "Instance {} running in container {} via {}",
            runtime.id,
            container_id,
            runtime.provider.name()
        );

        {
            let mut state = runtime.state.lock().await;
            state.phase = Phase::Running;
            state.container_id = Some(container_id);
            state.ports = ports;
            let deadline = expiry_deadline(duration).unwrap_or_else(|_| Instant::now());
            runtime.arm_expiry(&mut state, deadline);
        }

        Ok(runtime)
    }

    /// Adopt a container that is already running, with `remaining` time left.
    pub async fn reattach(
        id: String,
        provider: Arc<dyn Provider>,
        container_id: String,
        ports: Vec<PortBinding>,
        duration: Duration,
        remaining: Duration,
    ) -> Arc<Self> {
        let runtime = Self::with_state(
            id,
            provider,
            RuntimeState {
                phase: Phase::Running,
                container_id: Some(container_id),
                ports,
                duration,
                deadline: None,
                expiry_cancel: None,
                expiry_generation: 0,
                removed_since: None,
            },
        );

        {
            let mut state = runtime.state.lock().await;
            let deadline = expiry_deadline(remaining).unwrap_or_else(|_| Instant::now());
            runtime.arm_expiry(&mut state, deadline);
        }

        runtime
    }

    /// Runtime for a container that only needs to be torn down.
    pub fn detached(id: String, provider: Arc<dyn Provider>, container_id: Option<String>) -> Arc<Self> {
        Self::with_state(
            id,
            provider,
            RuntimeState {
                phase: Phase::Removing,
                container_id,
                ports: Vec::new(),
                duration: Duration::ZERO,
                deadline: None,
                expiry_cancel: None,
                expiry_generation: 0,
                removed_since: None,
            },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn ports(&self) -> Vec<PortBinding> {
        self.state.lock().await.ports.clone()
    }

    pub async fn container_id(&self) -> Option<String> {
        self.state.lock().await.container_id.clone()
    }

    pub async fn duration(&self) -> Duration {
        self.state.lock().await.duration
    }

    pub async fn deadline(&self) -> Option<Instant> {
        self.state.lock().await.deadline
    }

    /// Time since teardown completed, `None` while not removed
    pub async fn removed_for(&self) -> Option<Duration> {
        self.state
            .lock()
            .await
            .removed_since
            .map(|since| Instant::now().saturating_duration_since(since))
    }

    fn arm_expiry(self: &Arc<Self>, state: &mut RuntimeState, deadline: Instant) {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        state.expiry_generation += 1;
        state.deadline = Some(deadline);
        // Replacing the sender drops the previous one, which cancels its wait
        state.expiry_cancel = Some(cancel_tx);

        let generation = state.expiry_generation;
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep_until(deadline) => {}
                _ = cancel_rx => {
                    debug!("Expiry {} for instance {} cancelled", generation, runtime.id);
                    return;
                }
            }
            runtime.expire(generation).await;
        });
    }

    async fn expire(&self, generation: u64) {
        {
            let mut state = self.state.lock().await;
            if state.expiry_generation != generation || state.phase != Phase::Running {
                debug!("Stale expiry {} for instance {} ignored", generation, self.id);
                return;
            }
            state.phase = Phase::Removing;
            state.expiry_cancel = None;
        }

        info!("Instance {} expired, tearing down", self.id);
        if let Err(e) = self.teardown().await {
            warn!(
                "Teardown of expired instance {} failed, left for retry: {}",
                self.id, e
            );
        }
    }

    /// Cancel the current expiry and re-arm it `duration` from now.
    /// Fails once the instance has started going away, and leaves the
    /// current expiry untouched on any error.
    pub async fn renew(self: &Arc<Self>, duration: Duration) -> Result<Instant> {
        let mut state = self.state.lock().await;
        match state.phase {
            Phase::Running => {}
            _ => return Err(RuntimeError::NotLive(self.id.clone())),
        }
        let deadline = expiry_deadline(duration)?;

        state.phase = Phase::Renewing;
        state.expiry_cancel = None;
        state.duration = duration;
        self.arm_expiry(&mut state, deadline);
        state.phase = Phase::Running;

        debug!("Instance {} renewed for {:?}", self.id, duration);
        Ok(deadline)
    }

    /// Live backend status; no backend call once removed
    pub async fn status(&self) -> std::result::Result<BackendStatus, ProviderError> {
        let container_id = {
            let state = self.state.lock().await;
            if state.phase == Phase::Removed {
                return Ok(BackendStatus::Removed);
            }
            state.container_id.clone()
        };

        match container_id {
            Some(container_id) => self.provider.inspect(&container_id).await,
            None => Ok(BackendStatus::Unknown),
        }
    }

    /// Stop and remove the container. Safe to call any number of times, from any task.
    /// On failure the runtime stays `Removing` so a later call can retry.
    pub async fn teardown(&self) -> Result<()> {
        let _guard = self.teardown_lock.lock().await;

        let container_id = {
            let mut state = self.state.lock().await;
            if state.phase == Phase::Removed {
                return Ok(());
            }
            state.phase = Phase::Removing;
            state.expiry_cancel = None;
            state.container_id.clone()
        };

        if let Some(container_id) = container_id {
            self.teardown_container(&container_id).await?;
        }

        let mut state = self.state.lock().await;
        state.phase = Phase::Removed;
        state.removed_since = Some(Instant::now());
        info!("Instance {} removed", self.id);
        Ok(())
    }

    async fn teardown_container(&self, container_id: &str) -> Result<()> {
        let status = match self.provider.inspect(container_id).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => BackendStatus::Removed,
            Err(e) => return Err(e.into()),
        };

        if status == BackendStatus::Removed {
            debug!("Container {} already gone", container_id);
            return Ok(());
        }

        if status.needs_stop() {
            ignore_not_found(self.provider.stop(container_id).await)?;
        }
        ignore_not_found(self.provider.remove(container_id).await)?;
        Ok(())
    }
}

fn expiry_deadline(duration: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(duration)
        .ok_or(RuntimeError::InvalidDuration(duration))
}

fn ignore_not_found(result: std::result::Result<(), ProviderError>) -> Result<()> {
    match result {
        Err(e) if !e.is_not_found() => Err(e.into()),
        _ => Ok(()),
    }
}
