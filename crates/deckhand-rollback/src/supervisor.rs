//! Monitor supervisor: owns one auto-rollback task per deployment.
//!
//! Each task gets a shutdown channel and a completion flag. Finished tasks
//! leave their outcome behind (including errors), so nothing a monitor
//! decides is lost when nobody is awaiting it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::manager::{MonitorOutcome, RollbackManager};
use crate::trigger::RollbackTrigger;

/// Final state of a monitor task. Errors are kept as their message.
pub type MonitorReport = Result<MonitorOutcome, String>;

/// Finished reports kept before the oldest are evicted.
pub const MAX_REPORTS: usize = 1024;

/// A report tagged with the generation of the monitor that produced it.
type Reports = HashMap<String, (u64, MonitorReport)>;

struct MonitorSlot {
    generation: u64,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

pub struct MonitorSupervisor {
    manager: Arc<RollbackManager>,
    /// Active monitors: deployment_id → slot.
    slots: Arc<RwLock<HashMap<String, MonitorSlot>>>,
    /// Last report per deployment_id, at most `MAX_REPORTS`.
    reports: Arc<RwLock<Reports>>,
    next_generation: AtomicU64,
}

impl MonitorSupervisor {
    pub fn new(manager: Arc<RollbackManager>) -> Self {
        Self {
            manager,
            slots: Arc::new(RwLock::new(HashMap::new())),
            reports: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Start watching a deployment. A monitor already running for the same
    /// deployment is told to shut down and replaced.
    pub async fn start(&self, deployment_id: &str, trigger: RollbackTrigger) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let id = deployment_id.to_string();
        let manager = self.manager.clone();
        let slots = self.slots.clone();
        let reports = self.reports.clone();

        // Hold the slot table until the slot is registered so a task that
        // finishes immediately still finds itself.
        let mut active = self.slots.write().await;
        self.reports.write().await.remove(deployment_id);

        let handle = tokio::spawn(async move {
            // The monitor runs in its own task so a panic still ends in a report.
            let monitor = {
                let id = id.clone();
                tokio::spawn(async move {
                    manager
                        .monitor_and_auto_rollback(&id, &trigger, shutdown_rx)
                        .await
                })
            };
            let report = match monitor.await {
                Ok(outcome) => outcome.map_err(|e| e.to_string()),
                Err(e) if e.is_panic() => Err(format!("monitor panicked: {e}")),
                Err(e) => Err(format!("monitor task cancelled: {e}")),
            };
            log_report(&id, &report);

            // A replaced monitor must not clobber its successor's state.
            let mut slots = slots.write().await;
            let superseded = slots.get(&id).is_some_and(|s| s.generation != generation);
            if !superseded {
                slots.remove(&id);
                keep_report(&mut *reports.write().await, id.clone(), generation, report);
            }
            drop(slots);
            let _ = done_tx.send(true);
        });

        if let Some(old) = active.insert(
            deployment_id.to_string(),
            MonitorSlot {
                generation,
                handle,
                shutdown_tx,
                done_rx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            debug!(deployment = %deployment_id, "replaced running monitor");
        }
        drop(active);

        info!(deployment = %deployment_id, "auto-rollback monitor scheduled");
    }

    /// Signal a monitor to stop and wait for it to exit.
    pub async fn stop(&self, deployment_id: &str) {
        let slot = self.slots.write().await.remove(deployment_id);
        if let Some(slot) = slot {
            let _ = slot.shutdown_tx.send(true);
            if let Err(e) = slot.handle.await {
                warn!(deployment = %deployment_id, error = %e, "monitor task ended abnormally");
            }
            info!(deployment = %deployment_id, "auto-rollback monitor stopped");
        }
    }

    /// Stop every monitor (for graceful shutdown).
    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.slots.write().await.drain().collect();
        for (_, slot) in &drained {
            let _ = slot.shutdown_tx.send(true);
        }
        for (id, slot) in drained {
            if let Err(e) = slot.handle.await {
                warn!(deployment = %id, error = %e, "monitor task ended abnormally");
            }
        }
        info!("all auto-rollback monitors stopped");
    }

    pub async fn is_monitoring(&self, deployment_id: &str) -> bool {
        self.slots.read().await.contains_key(deployment_id)
    }

    /// Deployment ids with a running monitor, sorted.
    pub async fn active_monitors(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.slots.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The report of the last finished monitor for a deployment.
    pub async fn outcome(&self, deployment_id: &str) -> Option<MonitorReport> {
        self.reports
            .read()
            .await
            .get(deployment_id)
            .map(|(_, report)| report.clone())
    }

    /// Wait for the running monitor (if any) to finish, then return its report.
    pub async fn wait(&self, deployment_id: &str) -> Option<MonitorReport> {
        let done = self
            .slots
            .read()
            .await
            .get(deployment_id)
            .map(|s| s.done_rx.clone());
        if let Some(mut done) = done {
            // Err means the task went away without reporting; fall through.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.outcome(deployment_id).await
    }
}

fn keep_report(reports: &mut Reports, id: String, generation: u64, report: MonitorReport) {
    reports.insert(id, (generation, report));
    while reports.len() > MAX_REPORTS {
        let oldest = reports
            .iter()
            .min_by_key(|(_, (generation, _))| *generation)
            .map(|(id, _)| id.clone());
        match oldest {
            Some(id) => {
                reports.remove(&id);
            }
            None => break,
        }
    }
}

fn log_report(deployment_id: &str, report: &MonitorReport) {
    match report {
        Ok(MonitorOutcome::WindowElapsed { checks }) => {
            info!(deployment = %deployment_id, checks, "monitor finished: window elapsed");
        }
        Ok(MonitorOutcome::Cancelled) => {
            debug!(deployment = %deployment_id, "monitor finished: cancelled");
        }
        Ok(MonitorOutcome::RolledBack { reason, rollback_id, .. }) => {
            warn!(deployment = %deployment_id, rollback = %rollback_id, reason = %reason, "monitor finished: rolled back");
        }
        Ok(MonitorOutcome::RollbackFailed { reason, error }) => {
            error!(deployment = %deployment_id, reason = %reason, error = %error, "monitor finished: rollback failed");
        }
        Err(e) => {
            error!(deployment = %deployment_id, error = %e, "monitor failed");
        }
    }
}
