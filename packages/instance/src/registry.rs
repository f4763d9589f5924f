// ABOUTME: Process-wide map from instance id to its runtime
// ABOUTME: Owned by whoever constructs it and shared by Arc, never global

use crate::runtime::{InstanceRuntime, Phase};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct InstanceRegistry {
    runtimes: RwLock<HashMap<String, Arc<InstanceRuntime>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace
    pub async fn put(&self, id: String, runtime: Arc<InstanceRuntime>) {
        self.runtimes.write().await.insert(id, runtime);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<InstanceRuntime>> {
        self.runtimes.read().await.get(id).cloned()
    }

    pub async fn delete(&self, id: &str) -> Option<Arc<InstanceRuntime>> {
        self.runtimes.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.runtimes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runtimes.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.runtimes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn snapshot(&self) -> Vec<Arc<InstanceRuntime>> {
        self.runtimes.read().await.values().cloned().collect()
    }

    /// Drop runtimes that finished teardown more than `retention` ago. Returns how many went.
    pub async fn prune_removed(&self, retention: Duration) -> usize {
        let mut expired = Vec::new();
        for runtime in self.snapshot().await {
            if let Some(age) = runtime.removed_for().await {
                if age >= retention {
                    expired.push(runtime);
                }
            }
        }

        let mut runtimes = self.runtimes.write().await;
        let mut pruned = 0;
        for runtime in expired {
            // Only drop the entry if it was not replaced meanwhile
            let same = runtimes
                .get(runtime.id())
                .is_some_and(|current| Arc::ptr_eq(current, &runtime));
            if same {
                runtimes.remove(runtime.id());
                pruned += 1;
            }
        }

        if pruned > 0 {
            debug!("Pruned {} removed instance runtimes", pruned);
        }
        pruned
    }

    /// Number of runtimes in the given phase
    pub async fn count_in_phase(&self, phase: Phase) -> usize {
        let mut count = 0;
        for runtime in self.snapshot().await {
            if runtime.phase().await == phase {
                count += 1;
            }
        }
        count
    }
}
