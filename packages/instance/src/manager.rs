// ABOUTME: Orchestration facade that creates, queries, renews and removes challenge instances
// ABOUTME: Combines the challenge catalog, the provider, the registry and persisted records

use crate::challenge::{ChallengeCatalog, ChallengeError, MAX_DURATION_SECS};
use crate::providers::{BackendStatus, ContainerSpec, PortBinding, Provider, ProviderError};
use crate::registry::InstanceRegistry;
use crate::runtime::{InstanceRuntime, RuntimeError};
use crate::storage::{Instance, InstanceFilter, InstanceStore, StorageError};
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("No container provider is configured")]
    NotConfigured,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Container backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Challenge error: {0}")]
    Challenge(ChallengeError),
}

pub type Result<T> = std::result::Result<T, ManagerError>;

impl From<ChallengeError> for ManagerError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::NotFound(id) => ManagerError::NotFound(format!("challenge {}", id)),
            other => ManagerError::Challenge(other),
        }
    }
}

impl From<ProviderError> for ManagerError {
    fn from(err: ProviderError) -> Self {
        if err.is_unavailable() {
            ManagerError::BackendUnavailable(err.to_string())
        } else {
            ManagerError::ProvisioningFailed(err.to_string())
        }
    }
}

impl From<RuntimeError> for ManagerError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotLive(id) => ManagerError::NotFound(format!("instance {}", id)),
            RuntimeError::InvalidDuration(d) => {
                ManagerError::InvalidDuration(format!("{:?} is out of range", d))
            }
            RuntimeError::Provider(e) => e.into(),
        }
    }
}

/// Who an instance belongs to
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceOwner {
    pub user_id: String,
    pub team_id: Option<String>,
    pub game_id: Option<String>,
}

/// Instance record enriched with live status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceView {
    pub id: String,
    pub user_id: String,
    pub team_id: Option<String>,
    pub game_id: Option<String>,
    pub challenge_id: String,
    /// Present only for detailed queries and on creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    pub entries: Vec<PortBinding>,
    pub removed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: BackendStatus,
    /// Scheduled to be live but no runtime tracks it in this process
    pub degraded: bool,
}

impl InstanceView {
    fn from_record(
        record: Instance,
        status: BackendStatus,
        degraded: bool,
        detailed: bool,
    ) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            team_id: record.team_id,
            game_id: record.game_id,
            challenge_id: record.challenge_id,
            flag: detailed.then_some(record.flag),
            entries: record.entries,
            removed_at: record.removed_at,
            created_at: record.created_at,
            status,
            degraded,
        }
    }
}

/// Current wall-clock time at the precision instance records keep
pub(crate) fn now_secs() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_opt(now.timestamp(), 0).single().unwrap_or(now)
}

/// Removal deadline `duration` after `at`, within the allowed instance lifetime
pub(crate) fn deadline_after(at: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    let out_of_range = || {
        ManagerError::InvalidDuration(format!(
            "{}s exceeds the maximum of {}s",
            duration.as_secs(),
            MAX_DURATION_SECS
        ))
    };
    if duration.as_secs() > MAX_DURATION_SECS {
        return Err(out_of_range());
    }

    i64::try_from(duration.as_secs())
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .ok_or_else(out_of_range)
}

pub struct InstanceManager {
    provider: Option<Arc<dyn Provider>>,
    registry: Arc<InstanceRegistry>,
    store: Arc<dyn InstanceStore>,
    catalog: Arc<dyn ChallengeCatalog>,
    public_entry_host: String,
}

impl InstanceManager {
    pub fn new(
        provider: Option<Arc<dyn Provider>>,
        registry: Arc<InstanceRegistry>,
        store: Arc<dyn InstanceStore>,
        catalog: Arc<dyn ChallengeCatalog>,
        public_entry_host: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            catalog,
            public_entry_host: public_entry_host.into(),
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub(crate) fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn ChallengeCatalog> {
        &self.catalog
    }

    pub(crate) fn provider(&self) -> Result<Arc<dyn Provider>> {
        self.provider.clone().ok_or(ManagerError::NotConfigured)
    }

    /// Provision a new instance of `challenge_id` for `owner`
    pub async fn create(&self, challenge_id: &str, owner: InstanceOwner) -> Result<InstanceView> {
        let provider = self.provider()?;
        let challenge = self.catalog.get_challenge_descriptor(challenge_id).await?;
        // Reject before anything is started on the engine
        deadline_after(now_secs(), challenge.duration())?;

        let id = Uuid::new_v4().to_string();
        let flag = challenge.generate_flag();
        let spec = ContainerSpec {
            instance_id: id.clone(),
            image: challenge.image.clone(),
            env_vars: challenge.render_env(&id, &flag),
            exposed_ports: challenge.container_ports(),
            memory_mb: challenge.memory_limit_mb,
            cpu_cores: challenge.cpu_cores,
        };

        info!(
            "Creating instance {} of challenge {} for user {}",
            id, challenge_id, owner.user_id
        );

        let runtime = InstanceRuntime::provision(id.clone(), provider, &spec, challenge.duration())
            .await
            .map_err(|e| {
                error!("Failed to provision instance {}: {}", id, e);
                ManagerError::from(e)
            })?;

        let entries: Vec<PortBinding> = runtime
            .ports()
            .await
            .into_iter()
            .map(|p| p.with_entry_host(&self.public_entry_host))
            .collect();

        let created_at = now_secs();
        let removed_at = match deadline_after(created_at, challenge.duration()) {
            Ok(removed_at) => removed_at,
            Err(e) => {
                if let Err(teardown) = runtime.teardown().await {
                    warn!("Teardown of instance {} failed: {}", id, teardown);
                }
                return Err(e);
            }
        };
        let record = Instance {
            id: id.clone(),
            user_id: owner.user_id,
            team_id: owner.team_id,
            game_id: owner.game_id,
            challenge_id: challenge.id.clone(),
            flag,
            entries,
            container_ref: runtime.container_id().await,
            removed_at,
            created_at,
            reclaimed: false,
        };

        if let Err(e) = self.store.insert_instance(&record).await {
            error!("Failed to persist instance {}, tearing down: {}", id, e);
            if let Err(teardown) = runtime.teardown().await {
                warn!("Teardown of unpersisted instance {} failed: {}", id, teardown);
            }
            return Err(e.into());
        }

        self.registry.put(id, runtime).await;

        Ok(InstanceView::from_record(
            record,
            BackendStatus::Running,
            false,
            true,
        ))
    }

    async fn live(&self, id: &str) -> Result<(Instance, Arc<InstanceRuntime>)> {
        let record = self
            .store
            .find_instance_by_id(id)
            .await?
            .ok_or_else(|| ManagerError::NotFound(format!("instance {}", id)))?;
        let runtime = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| ManagerError::NotFound(format!("instance {}", id)))?;
        Ok((record, runtime))
    }

    /// Live status of an instance this process tracks
    pub async fn status(&self, id: &str) -> Result<InstanceView> {
        let (record, runtime) = self.live(id).await?;
        let status = runtime
            .status()
            .await
            .map_err(|e| ManagerError::BackendUnavailable(e.to_string()))?;
        Ok(InstanceView::from_record(record, status, false, false))
    }

    /// Extend by the challenge duration, measured from now
    pub async fn renew(&self, id: &str) -> Result<DateTime<Utc>> {
        let (record, runtime) = self.live(id).await?;
        let duration = runtime.duration().await;
        self.renew_with(record, runtime, duration).await
    }

    /// Extend by a caller-supplied duration, measured from now
    pub async fn renew_for(&self, id: &str, duration: Duration) -> Result<DateTime<Utc>> {
        let (record, runtime) = self.live(id).await?;
        self.renew_with(record, runtime, duration).await
    }

    async fn renew_with(
        &self,
        record: Instance,
        runtime: Arc<InstanceRuntime>,
        duration: Duration,
    ) -> Result<DateTime<Utc>> {
        let removed_at = deadline_after(now_secs(), duration)?;
        runtime.renew(duration).await?;

        // Only a record that has not been reclaimed in the meantime moves forward
        if !self.store.extend_instance(&record.id, removed_at).await? {
            return Err(ManagerError::NotFound(format!("instance {}", record.id)));
        }

        info!("Instance {} renewed until {}", record.id, removed_at);
        Ok(removed_at)
    }

    /// Tear the instance down now. Repeated calls succeed.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let (mut record, runtime) = self.live(id).await?;

        match runtime.teardown().await {
            Ok(()) => record.reclaimed = true,
            Err(e) => warn!(
                "Teardown of instance {} failed, will be retried: {}",
                id, e
            ),
        }

        let now = now_secs();
        if record.removed_at > now {
            record.removed_at = now;
        }
        self.store.update_instance(&record).await?;
        Ok(())
    }

    /// Query records and attach a live probe to each
    pub async fn find(&self, filter: InstanceFilter) -> Result<Vec<InstanceView>> {
        let mut filter = filter;
        if filter.team_id.is_some() && filter.game_id.is_some() {
            filter.user_id = None;
        }

        let records = self.store.find_instances(&filter).await?;
        let now = now_secs();
        let views = records
            .into_iter()
            .map(|record| self.enrich(record, now, filter.detailed));
        Ok(join_all(views).await)
    }

    pub async fn find_by_id(&self, id: &str, detailed: bool) -> Result<InstanceView> {
        let record = self
            .store
            .find_instance_by_id(id)
            .await?
            .ok_or_else(|| ManagerError::NotFound(format!("instance {}", id)))?;
        Ok(self.enrich(record, now_secs(), detailed).await)
    }

    async fn enrich(&self, record: Instance, now: DateTime<Utc>, detailed: bool) -> InstanceView {
        match self.registry.get(&record.id).await {
            Some(runtime) => {
                let status = runtime.status().await.unwrap_or_else(|e| {
                    warn!("Status probe for instance {} failed: {}", record.id, e);
                    BackendStatus::Unknown
                });
                InstanceView::from_record(record, status, false, detailed)
            }
            None => {
                let degraded = !record.is_expired_at(now);
                InstanceView::from_record(record, BackendStatus::Removed, degraded, detailed)
            }
        }
    }

    /// Tear down the container behind a record, whether or not a runtime tracks it,
    /// and mark the record reclaimed. Returns whether the teardown completed.
    pub async fn reclaim(&self, record: &Instance) -> Result<bool> {
        let runtime = match self.registry.get(&record.id).await {
            Some(runtime) => runtime,
            None => InstanceRuntime::detached(
                record.id.clone(),
                self.provider()?,
                record.container_ref.clone(),
            ),
        };

        if let Err(e) = runtime.teardown().await {
            warn!("Reclaiming instance {} failed: {}", record.id, e);
            return Ok(false);
        }

        if !record.reclaimed {
            let mut updated = record.clone();
            updated.reclaimed = true;
            self.store.update_instance(&updated).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{ChallengeDescriptor, ExposedPort, FlagKind, SqliteChallengeCatalog};
    use crate::providers::MemoryProvider;
    use crate::runtime::Phase;
    use crate::storage::{connect_memory, InstanceStorage};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn challenge() -> ChallengeDescriptor {
        ChallengeDescriptor {
            id: "web-101".to_string(),
            image: "arena/web-101:latest".to_string(),
            exposed_ports: vec![ExposedPort {
                port: 80,
                description: "http".to_string(),
            }],
            env_templates: BTreeMap::new(),
            memory_limit_mb: 64,
            cpu_cores: 0.5,
            duration_secs: 600,
            flag_template: "flag{[UUID]}".to_string(),
            flag_env: "FLAG".to_string(),
            flag_kind: FlagKind::Dynamic,
        }
    }

    fn owner(user: &str) -> InstanceOwner {
        InstanceOwner {
            user_id: user.to_string(),
            ..Default::default()
        }
    }

    async fn setup_with(
        provider: Option<Arc<dyn Provider>>,
    ) -> (InstanceManager, Arc<InstanceStorage>) {
        let pool = connect_memory().await.unwrap();
        let catalog = SqliteChallengeCatalog::new(pool.clone());
        catalog.upsert_challenge(&challenge()).await.unwrap();
        let store = Arc::new(InstanceStorage::new(pool));

        let manager = InstanceManager::new(
            provider,
            Arc::new(InstanceRegistry::new()),
            store.clone(),
            Arc::new(catalog),
            "ctf.local",
        );
        (manager, store)
    }

    async fn setup() -> (InstanceManager, Arc<MemoryProvider>, Arc<InstanceStorage>) {
        let provider = Arc::new(MemoryProvider::new());
        let backend: Arc<dyn Provider> = provider.clone();
        let (manager, store) = setup_with(Some(backend)).await;
        (manager, provider, store)
    }

    #[tokio::test]
    async fn test_create_without_provider() {
        let (manager, _) = setup_with(None).await;
        let err = manager.create("web-101", owner("alice")).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotConfigured));
    }

    #[tokio::test]
    async fn test_create_unknown_challenge() {
        let (manager, provider, _) = setup().await;
        let err = manager.create("nope", owner("alice")).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
        assert_eq!(provider.setup_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_persists_and_registers() {
        let (manager, provider, store) = setup().await;
        let before = now_secs();

        let view = manager.create("web-101", owner("alice")).await.unwrap();

        assert_eq!(view.status, BackendStatus::Running);
        assert_eq!(view.entries.len(), 1);
        assert_eq!(
            view.entries[0].entry,
            Some(format!("ctf.local:{}", view.entries[0].host_port))
        );
        assert!(view.flag.as_deref().unwrap().starts_with("flag{"));
        let expected = deadline_after(before, Duration::from_secs(600)).unwrap();
        assert!(view.removed_at >= expected);
        assert!(view.removed_at <= expected + chrono::Duration::seconds(2));

        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert_eq!(record.flag, view.flag.clone().unwrap());
        assert!(record.container_ref.is_some());
        assert_eq!(manager.registry().len().await, 1);
        assert_eq!(provider.running_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_reports_provisioning_failure() {
        let (manager, provider, store) = setup().await;
        provider.set_fail_setup(true);

        let err = manager.create("web-101", owner("alice")).await.unwrap_err();
        assert!(matches!(err, ManagerError::ProvisioningFailed(_)));
        assert!(manager.registry().is_empty().await);
        assert!(store
            .find_instances(&InstanceFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_reports_backend_unavailable() {
        let (manager, provider, _) = setup().await;
        provider.set_available(false);

        let err = manager.create("web-101", owner("alice")).await.unwrap_err();
        assert!(matches!(err, ManagerError::BackendUnavailable(_)));
    }

    struct FailingStore;

    #[async_trait]
    impl InstanceStore for FailingStore {
        async fn insert_instance(&self, instance: &Instance) -> crate::storage::Result<()> {
            Err(StorageError::NotFound(instance.id.clone()))
        }

        async fn update_instance(&self, instance: &Instance) -> crate::storage::Result<()> {
            Err(StorageError::NotFound(instance.id.clone()))
        }

        async fn extend_instance(
            &self,
            id: &str,
            _removed_at: DateTime<Utc>,
        ) -> crate::storage::Result<bool> {
            Err(StorageError::NotFound(id.to_string()))
        }

        async fn find_instance_by_id(&self, _id: &str) -> crate::storage::Result<Option<Instance>> {
            Ok(None)
        }

        async fn find_instances(
            &self,
            _filter: &InstanceFilter,
        ) -> crate::storage::Result<Vec<Instance>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_create_tears_down_when_persist_fails() {
        let pool = connect_memory().await.unwrap();
        let catalog = SqliteChallengeCatalog::new(pool);
        catalog.upsert_challenge(&challenge()).await.unwrap();
        let provider = Arc::new(MemoryProvider::new());
        let backend: Arc<dyn Provider> = provider.clone();
        let manager = InstanceManager::new(
            Some(backend),
            Arc::new(InstanceRegistry::new()),
            Arc::new(FailingStore),
            Arc::new(catalog),
            "ctf.local",
        );

        let err = manager.create("web-101", owner("alice")).await.unwrap_err();
        assert!(matches!(err, ManagerError::Storage(_)));
        assert_eq!(provider.container_count().await, 0);
        assert!(manager.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let (manager, _, _) = setup().await;
        assert!(matches!(
            manager.status("missing").await.unwrap_err(),
            ManagerError::NotFound(_)
        ));
        assert!(matches!(
            manager.renew("missing").await.unwrap_err(),
            ManagerError::NotFound(_)
        ));
        assert!(matches!(
            manager.remove("missing").await.unwrap_err(),
            ManagerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_remove_twice() {
        let (manager, provider, store) = setup().await;
        let view = manager.create("web-101", owner("alice")).await.unwrap();

        manager.remove(&view.id).await.unwrap();
        manager.remove(&view.id).await.unwrap();

        assert_eq!(provider.remove_calls(), 1);
        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert!(record.reclaimed);
        assert!(record.removed_at <= now_secs());
        assert_eq!(
            manager.status(&view.id).await.unwrap().status,
            BackendStatus::Removed
        );
    }

    #[tokio::test]
    async fn test_remove_with_failing_backend_stays_retryable() {
        let (manager, provider, store) = setup().await;
        let view = manager.create("web-101", owner("alice")).await.unwrap();
        provider.set_fail_teardown(true);

        manager.remove(&view.id).await.unwrap();

        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert!(!record.reclaimed);
        let runtime = manager.registry().get(&view.id).await.unwrap();
        assert_eq!(runtime.phase().await, Phase::Removing);

        provider.set_fail_teardown(false);
        manager.remove(&view.id).await.unwrap();
        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert!(record.reclaimed);
        assert_eq!(provider.container_count().await, 0);
    }

    #[tokio::test]
    async fn test_renew_after_remove_is_not_found() {
        let (manager, _, _) = setup().await;
        let view = manager.create("web-101", owner("alice")).await.unwrap();
        manager.remove(&view.id).await.unwrap();

        let err = manager.renew(&view.id).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_renew_for_persists_deadline() {
        let (manager, _, store) = setup().await;
        let view = manager.create("web-101", owner("alice")).await.unwrap();

        let deadline = manager
            .renew_for(&view.id, Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(deadline > view.removed_at);
        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert_eq!(record.removed_at, deadline);
    }

    #[tokio::test]
    async fn test_find_strips_flags_unless_detailed() {
        let (manager, _, _) = setup().await;
        manager.create("web-101", owner("alice")).await.unwrap();
        manager.create("web-101", owner("bob")).await.unwrap();

        let plain = manager
            .find(InstanceFilter {
                user_id: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].flag, None);
        assert_eq!(plain[0].status, BackendStatus::Running);

        let detailed = manager
            .find(InstanceFilter {
                user_id: Some("alice".to_string()),
                detailed: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(detailed[0].flag.is_some());
    }

    #[tokio::test]
    async fn test_find_team_and_game_supersede_user() {
        let (manager, _, _) = setup().await;
        let team_owner = InstanceOwner {
            user_id: "alice".to_string(),
            team_id: Some("red".to_string()),
            game_id: Some("finals".to_string()),
        };
        manager.create("web-101", team_owner).await.unwrap();

        let found = manager
            .find(InstanceFilter {
                user_id: Some("someone-else".to_string()),
                team_id: Some("red".to_string()),
                game_id: Some("finals".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_find_marks_untracked_live_records_degraded() {
        let (manager, _, store) = setup().await;
        let view = manager.create("web-101", owner("alice")).await.unwrap();
        manager.registry().delete(&view.id).await;

        let found = manager.find_by_id(&view.id, false).await.unwrap();
        assert_eq!(found.status, BackendStatus::Removed);
        assert!(found.degraded);

        // Queries never write
        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert!(!record.reclaimed);
    }

    #[tokio::test]
    async fn test_reclaim_untracked_record() {
        let (manager, provider, store) = setup().await;
        let view = manager.create("web-101", owner("alice")).await.unwrap();
        manager.registry().delete(&view.id).await;

        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert!(manager.reclaim(&record).await.unwrap());

        assert_eq!(provider.container_count().await, 0);
        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert!(record.reclaimed);
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_duration_before_setup() {
        let pool = connect_memory().await.unwrap();
        let catalog = SqliteChallengeCatalog::new(pool.clone());
        let mut huge = challenge();
        huge.duration_secs = 1_000_000_000_000_000;
        catalog.upsert_challenge(&huge).await.unwrap();

        let provider = Arc::new(MemoryProvider::new());
        let backend: Arc<dyn Provider> = provider.clone();
        let store = Arc::new(InstanceStorage::new(pool));
        let manager = InstanceManager::new(
            Some(backend),
            Arc::new(InstanceRegistry::new()),
            store.clone(),
            Arc::new(catalog),
            "ctf.local",
        );

        let err = manager.create("web-101", owner("alice")).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidDuration(_)));
        assert_eq!(provider.setup_calls(), 0);
        assert_eq!(provider.container_count().await, 0);
        assert!(manager.registry().is_empty().await);
        assert!(store
            .find_instances(&InstanceFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_renew_for_out_of_range_leaves_instance_untouched() {
        let (manager, _, store) = setup().await;
        let view = manager.create("web-101", owner("alice")).await.unwrap();
        let runtime = manager.registry().get(&view.id).await.unwrap();
        let deadline = runtime.deadline().await;

        for duration in [Duration::MAX, Duration::from_secs(MAX_DURATION_SECS + 1)] {
            let err = manager.renew_for(&view.id, duration).await.unwrap_err();
            assert!(matches!(err, ManagerError::InvalidDuration(_)));
        }

        assert_eq!(runtime.phase().await, Phase::Running);
        assert_eq!(runtime.deadline().await, deadline);
        assert_eq!(runtime.duration().await, Duration::from_secs(600));
        let record = store.find_instance_by_id(&view.id).await.unwrap().unwrap();
        assert_eq!(record.removed_at, view.removed_at);

        manager.renew(&view.id).await.unwrap();
    }

    #[test]
    fn test_deadline_after_bounds() {
        let at = now_secs();
        assert_eq!(
            deadline_after(at, Duration::from_secs(60)).unwrap(),
            at + chrono::Duration::seconds(60)
        );
        assert!(deadline_after(at, Duration::from_secs(MAX_DURATION_SECS)).is_ok());
        assert!(matches!(
            deadline_after(at, Duration::from_secs(MAX_DURATION_SECS + 1)),
            Err(ManagerError::InvalidDuration(_))
        ));
        assert!(deadline_after(at, Duration::MAX).is_err());
    }
}
