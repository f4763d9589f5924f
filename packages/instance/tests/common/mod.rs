// ABOUTME: Shared fixtures for instance integration tests
// ABOUTME: In-process store and catalog so paused-clock tests never wait on a database thread

#![allow(dead_code)]

use arena_instance::challenge;
use arena_instance::storage;
use arena_instance::{
    ChallengeCatalog, ChallengeDescriptor, ChallengeError, ContainerProvider, ExposedPort,
    FlagKind, Instance, InstanceFilter, InstanceManager, InstanceOwner, InstanceRegistry,
    InstanceStore, MemoryProvider,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const CHALLENGE_ID: &str = "web-101";
pub const DURATION_SECS: u64 = 60;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Instance>>,
}

impl MemoryStore {
    pub async fn get(&self, id: &str) -> Option<Instance> {
        self.records.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn insert_instance(&self, instance: &Instance) -> storage::Result<()> {
        self.records
            .lock()
            .await
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn update_instance(&self, instance: &Instance) -> storage::Result<()> {
        let mut records = self.records.lock().await;
        match records.get_mut(&instance.id) {
            Some(existing) => {
                *existing = instance.clone();
                Ok(())
            }
            None => Err(storage::StorageError::NotFound(instance.id.clone())),
        }
    }

    async fn extend_instance(&self, id: &str, removed_at: DateTime<Utc>) -> storage::Result<bool> {
        let mut records = self.records.lock().await;
        match records.get_mut(id) {
            Some(existing) if !existing.reclaimed => {
                existing.removed_at = removed_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_instance_by_id(&self, id: &str) -> storage::Result<Option<Instance>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn find_instances(&self, filter: &InstanceFilter) -> storage::Result<Vec<Instance>> {
        let now = Utc::now();
        let field_matches = |want: &Option<String>, have: Option<&String>| match want {
            Some(want) => have == Some(want),
            None => true,
        };

        let mut found: Vec<Instance> = self
            .records
            .lock()
            .await
            .values()
            .filter(|r| field_matches(&filter.id, Some(&r.id)))
            .filter(|r| field_matches(&filter.user_id, Some(&r.user_id)))
            .filter(|r| field_matches(&filter.team_id, r.team_id.as_ref()))
            .filter(|r| field_matches(&filter.game_id, r.game_id.as_ref()))
            .filter(|r| field_matches(&filter.challenge_id, Some(&r.challenge_id)))
            .filter(|r| filter.is_available.map_or(true, |a| a == !r.is_expired_at(now)))
            .filter(|r| filter.reclaimed.map_or(true, |c| c == r.reclaimed))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

pub struct StaticCatalog {
    challenges: HashMap<String, ChallengeDescriptor>,
}

impl StaticCatalog {
    pub fn with(challenge: ChallengeDescriptor) -> Self {
        Self {
            challenges: HashMap::from([(challenge.id.clone(), challenge)]),
        }
    }
}

#[async_trait]
impl ChallengeCatalog for StaticCatalog {
    async fn get_challenge_descriptor(&self, id: &str) -> challenge::Result<ChallengeDescriptor> {
        self.challenges
            .get(id)
            .cloned()
            .ok_or_else(|| ChallengeError::NotFound(id.to_string()))
    }
}

pub fn web_challenge() -> ChallengeDescriptor {
    ChallengeDescriptor {
        id: CHALLENGE_ID.to_string(),
        image: "arena/web-101:latest".to_string(),
        exposed_ports: vec![
            ExposedPort {
                port: 80,
                description: "http".to_string(),
            },
            ExposedPort {
                port: 22,
                description: "ssh".to_string(),
            },
        ],
        env_templates: BTreeMap::from([(
            "INSTANCE".to_string(),
            "{{instance_id}}".to_string(),
        )]),
        memory_limit_mb: 128,
        cpu_cores: 0.5,
        duration_secs: DURATION_SECS,
        flag_template: "flag{[UUID]}".to_string(),
        flag_env: "FLAG".to_string(),
        flag_kind: FlagKind::Dynamic,
    }
}

pub struct TestEnv {
    pub manager: Arc<InstanceManager>,
    pub provider: Arc<MemoryProvider>,
    pub store: Arc<MemoryStore>,
}

pub fn setup() -> TestEnv {
    let provider = Arc::new(MemoryProvider::new());
    let backend: Arc<dyn ContainerProvider> = provider.clone();
    let store = Arc::new(MemoryStore::default());
    let catalog = StaticCatalog::with(web_challenge());

    let manager = Arc::new(InstanceManager::new(
        Some(backend),
        Arc::new(InstanceRegistry::new()),
        store.clone(),
        Arc::new(catalog),
        "ctf.example.com",
    ));

    TestEnv {
        manager,
        provider,
        store,
    }
}

pub fn owner(user: &str) -> InstanceOwner {
    InstanceOwner {
        user_id: user.to_string(),
        team_id: None,
        game_id: None,
    }
}

/// Let spawned expiry tasks run after the clock moves
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
