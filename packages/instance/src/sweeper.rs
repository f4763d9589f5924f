// ABOUTME: Periodic background sweep of expired instances
// ABOUTME: Retries failed teardowns, reclaims untracked records and prunes old runtimes

use crate::manager::InstanceManager;
use crate::storage::InstanceFilter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepReport {
    pub reclaimed: usize,
    pub failed: usize,
    pub pruned: usize,
}

pub struct ExpirySweeper {
    manager: Arc<InstanceManager>,
    interval: Duration,
    retention: Duration,
    running: Arc<RwLock<bool>>,
}

impl ExpirySweeper {
    pub fn new(manager: Arc<InstanceManager>, interval: Duration, retention: Duration) -> Self {
        Self {
            manager,
            interval,
            retention,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the sweep loop
    pub async fn start(&self) {
        let mut running = self.running.write().await;
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let manager = self.manager.clone();
        let running_flag = self.running.clone();
        let interval = self.interval;
        let retention = self.retention;

        tokio::spawn(async move {
            info!("Expiry sweeper started (interval: {:?})", interval);

            loop {
                if !*running_flag.read().await {
                    info!("Expiry sweeper stopped");
                    break;
                }

                match Self::sweep(&manager, retention).await {
                    Ok(report) if report != SweepReport::default() => {
                        info!(
                            "Sweep reclaimed {}, failed {}, pruned {}",
                            report.reclaimed, report.failed, report.pruned
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!("Expiry sweep failed: {}", e),
                }

                time::sleep(interval).await;
            }
        });
    }

    /// Stop the sweep loop after its current pass
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// One pass, outside the loop
    pub async fn sweep_once(&self) -> crate::manager::Result<SweepReport> {
        Self::sweep(&self.manager, self.retention).await
    }

    async fn sweep(
        manager: &Arc<InstanceManager>,
        retention: Duration,
    ) -> crate::manager::Result<SweepReport> {
        let mut report = SweepReport::default();

        let due = manager
            .store()
            .find_instances(&InstanceFilter {
                is_available: Some(false),
                reclaimed: Some(false),
                ..Default::default()
            })
            .await?;

        for record in due {
            match manager.reclaim(&record).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    warn!("Failed to reclaim instance {}: {}", record.id, e);
                    report.failed += 1;
                }
            }
        }

        report.pruned = manager.registry().prune_removed(retention).await;
        Ok(report)
    }
}
