// ABOUTME: Restart recovery that matches engine containers against persisted instance records
// ABOUTME: Tears down containers nobody should own and re-attaches or reports live ones

use crate::manager::{now_secs, InstanceManager, ManagerError, Result};
use crate::runtime::InstanceRuntime;
use crate::storage::InstanceFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconcileOptions {
    /// Report only; touch neither the engine nor the registry
    pub dry_run: bool,
    /// Adopt containers of live records instead of only reporting them
    pub reattach: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconcileReport {
    pub scanned: usize,
    /// Containers torn down (or that would be, on a dry run)
    pub torn_down: usize,
    pub reattached: usize,
    /// Live records without a runtime in this process
    pub degraded: Vec<String>,
    pub errors: Vec<String>,
}

impl InstanceManager {
    /// Bring the registry in line with what the engine is actually running
    pub async fn reconcile(&self, options: ReconcileOptions) -> Result<ReconcileReport> {
        let provider = self.provider()?;
        let containers = provider
            .list_managed()
            .await
            .map_err(|e| ManagerError::BackendUnavailable(e.to_string()))?;

        info!(
            "Reconciling {} managed containers from '{}'",
            containers.len(),
            provider.name()
        );

        let now = now_secs();
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        for container in containers {
            report.scanned += 1;

            let record = match &container.instance_id {
                Some(instance_id) => self.store().find_instance_by_id(instance_id).await?,
                None => None,
            };

            if let Some(runtime) = match &container.instance_id {
                Some(id) => self.registry().get(id).await,
                None => None,
            } {
                if runtime.container_id().await.as_deref() == Some(container.container_id.as_str())
                {
                    seen.insert(runtime.id().to_string());
                    continue;
                }
            }

            let live = record
                .as_ref()
                .filter(|r| !r.reclaimed && !r.is_expired_at(now));

            match live {
                Some(record) => {
                    seen.insert(record.id.clone());
                    if !options.reattach {
                        report.degraded.push(record.id.clone());
                        continue;
                    }
                    if options.dry_run {
                        report.reattached += 1;
                        continue;
                    }

                    let remaining = (record.removed_at - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    let duration = match self
                        .catalog()
                        .get_challenge_descriptor(&record.challenge_id)
                        .await
                    {
                        Ok(challenge) => challenge.duration(),
                        Err(e) => {
                            warn!(
                                "Challenge {} of instance {} unavailable, renewing by the recorded span: {}",
                                record.challenge_id, record.id, e
                            );
                            (record.removed_at - record.created_at)
                                .to_std()
                                .unwrap_or(remaining)
                        }
                    };
                    let runtime = InstanceRuntime::reattach(
                        record.id.clone(),
                        provider.clone(),
                        container.container_id.clone(),
                        record.entries.clone(),
                        duration,
                        remaining,
                    )
                    .await;
                    self.registry().put(record.id.clone(), runtime).await;
                    info!(
                        "Re-attached instance {} to container {} ({:?} left)",
                        record.id, container.container_id, remaining
                    );
                    report.reattached += 1;
                }
                None => {
                    warn!(
                        "Container {} has no live instance record (instance: {:?})",
                        container.container_id, container.instance_id
                    );
                    if options.dry_run {
                        report.torn_down += 1;
                        continue;
                    }

                    let id = container
                        .instance_id
                        .clone()
                        .unwrap_or_else(|| container.container_id.clone());
                    let runtime = InstanceRuntime::detached(
                        id,
                        provider.clone(),
                        Some(container.container_id.clone()),
                    );
                    match runtime.teardown().await {
                        Ok(()) => {
                            report.torn_down += 1;
                            if let Some(record) = record.filter(|r| !r.reclaimed) {
                                let mut updated = record;
                                updated.reclaimed = true;
                                self.store().update_instance(&updated).await?;
                            }
                        }
                        Err(e) => {
                            let message = format!(
                                "Failed to tear down container {}: {}",
                                container.container_id, e
                            );
                            warn!("{}", message);
                            report.errors.push(message);
                        }
                    }
                }
            }
        }

        // Live records whose container is gone entirely
        let live_records = self
            .store()
            .find_instances(&InstanceFilter {
                is_available: Some(true),
                ..Default::default()
            })
            .await?;
        for record in live_records {
            if seen.contains(&record.id) || self.registry().get(&record.id).await.is_some() {
                continue;
            }
            report.degraded.push(record.id);
        }

        info!(
            "Reconcile{}: scanned {}, torn down {}, re-attached {}, degraded {}, errors {}",
            if options.dry_run { " (dry run)" } else { "" },
            report.scanned,
            report.torn_down,
            report.reattached,
            report.degraded.len(),
            report.errors.len()
        );

        Ok(report)
    }
}
