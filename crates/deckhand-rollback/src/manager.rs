//! History queries, manual rollback and metric-driven auto-rollback.
//!
//! A rollback is an ordinary direct deployment of an earlier record's
//! version and image. Its record links back to the deployment that was
//! current when it started through `rollback_from`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use deckhand_rollout::{DeploymentConfig, DeploymentExecutor, DeploymentMonitor, DeploymentResult, Strategy};
use deckhand_state::{DeploymentHistory, DeploymentRecord, DeploymentStatus};

use crate::error::{RollbackError, RollbackResult};
use crate::trends::RollbackTrends;
use crate::trigger::RollbackTrigger;

/// `deployed_by` recorded on rollbacks started by a monitor.
pub const AUTO_ROLLBACK_ACTOR: &str = "auto-rollback";

/// How a monitoring run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MonitorOutcome {
    /// The window elapsed without a breach.
    WindowElapsed { checks: u32 },
    /// Shutdown was signalled before the window elapsed.
    Cancelled,
    /// A threshold was breached and the rollback deployment succeeded.
    RolledBack {
        reason: String,
        rollback_id: String,
        result: DeploymentResult,
    },
    /// A threshold was breached but the rollback could not be completed.
    RollbackFailed { reason: String, error: String },
}

pub struct RollbackManager {
    history: Arc<dyn DeploymentHistory>,
    executor: Arc<DeploymentExecutor>,
    monitor: Arc<dyn DeploymentMonitor>,
    /// One async lock per `project/environment`.
    guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RollbackManager {
    pub fn new(
        history: Arc<dyn DeploymentHistory>,
        executor: Arc<DeploymentExecutor>,
        monitor: Arc<dyn DeploymentMonitor>,
    ) -> Self {
        Self {
            history,
            executor,
            monitor,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Records for a project/environment pair, newest first.
    pub fn list_deployments(
        &self,
        project_id: &str,
        environment: &str,
        limit: Option<usize>,
    ) -> RollbackResult<Vec<DeploymentRecord>> {
        let mut records = self.history.list_for(project_id, environment)?;
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// The newest record whose status is `success`.
    pub fn get_last_successful_deployment(
        &self,
        project_id: &str,
        environment: &str,
    ) -> RollbackResult<DeploymentRecord> {
        self.history
            .list_for(project_id, environment)?
            .into_iter()
            .find(|r| r.status == DeploymentStatus::Success)
            .ok_or(RollbackError::NoSuccessfulDeployment)
    }

    /// Redeploy `target_id` directly and record it as a rollback of the
    /// current deployment.
    ///
    /// The rollback record is written whether or not the redeploy
    /// succeeded; a failed redeploy is returned as
    /// [`RollbackError::Execute`].
    pub async fn rollback(
        &self,
        project_id: &str,
        environment: &str,
        target_id: &str,
        initiated_by: &str,
    ) -> RollbackResult<DeploymentResult> {
        let guard = self.guard(project_id, environment);
        let _held = guard.lock().await;
        let (_, result) = self
            .rollback_locked(project_id, environment, target_id, initiated_by, None)
            .await?;
        Ok(result)
    }

    /// Roll back to the newest successful deployment other than the current one.
    pub async fn rollback_to_last_successful(
        &self,
        project_id: &str,
        environment: &str,
        initiated_by: &str,
    ) -> RollbackResult<DeploymentResult> {
        let guard = self.guard(project_id, environment);
        let _held = guard.lock().await;
        let (_, result) = self
            .rollback_to_last_successful_locked(project_id, environment, initiated_by, None)
            .await?;
        Ok(result)
    }

    /// Watch a deployment's metrics for the trigger's window and roll back
    /// on the first breach.
    ///
    /// Returns once the window elapses, a rollback has been attempted, or
    /// `shutdown` flips to true (or its sender is dropped). The outcome is
    /// also written to the watched record when a rollback was attempted.
    pub async fn monitor_and_auto_rollback(
        &self,
        deployment_id: &str,
        trigger: &RollbackTrigger,
        mut shutdown: watch::Receiver<bool>,
    ) -> RollbackResult<MonitorOutcome> {
        let record = self
            .history
            .get(deployment_id)?
            .ok_or_else(|| RollbackError::NotFound(deployment_id.to_string()))?;
        let checks = trigger.checks();
        let failure_limit = trigger.consecutive_failures.max(1);
        let mut consecutive_failures = 0;

        info!(
            deployment = %deployment_id,
            version = %record.version,
            checks,
            interval_ms = trigger.poll_interval.as_millis() as u64,
            "auto-rollback monitor started"
        );

        if *shutdown.borrow() {
            return Ok(MonitorOutcome::Cancelled);
        }

        for check in 1..=checks {
            tokio::select! {
                _ = tokio::time::sleep(trigger.poll_interval) => {}
                _ = shutdown.changed() => {
                    debug!(deployment = %deployment_id, check, "auto-rollback monitor cancelled");
                    return Ok(MonitorOutcome::Cancelled);
                }
            }

            let breach = match self.monitor.get_metrics(&record.version).await {
                Ok(metrics) => {
                    consecutive_failures = 0;
                    debug!(
                        deployment = %deployment_id,
                        check,
                        error_rate = metrics.error_rate,
                        latency_ms = metrics.latency_ms,
                        "metrics sampled"
                    );
                    trigger.evaluate(&metrics)
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        deployment = %deployment_id,
                        check,
                        consecutive_failures,
                        error = %format!("{e:#}"),
                        "metrics sampling failed"
                    );
                    (consecutive_failures >= failure_limit).then(|| {
                        format!("metrics unavailable for {consecutive_failures} consecutive checks: {e:#}")
                    })
                }
            };

            if let Some(reason) = breach {
                return self.auto_rollback(&record, reason).await;
            }
        }

        info!(deployment = %deployment_id, checks, "monitoring window elapsed without breach");
        Ok(MonitorOutcome::WindowElapsed { checks })
    }

    /// Rollback statistics for a project over the last `days` days.
    pub fn analyze_rollback_trends(&self, project_id: &str, days: u32) -> RollbackResult<RollbackTrends> {
        let records = self.history.list_for_project(project_id)?;
        Ok(RollbackTrends::summarize(project_id, days, &records, Utc::now()))
    }

    async fn auto_rollback(&self, watched: &DeploymentRecord, reason: String) -> RollbackResult<MonitorOutcome> {
        let guard = self.guard(&watched.project_id, &watched.environment);
        let _held = guard.lock().await;

        warn!(
            deployment = %watched.id,
            version = %watched.version,
            reason = %reason,
            "threshold breached, rolling back"
        );

        let mut marked = self.history.get(&watched.id)?.unwrap_or_else(|| watched.clone());
        marked.status = DeploymentStatus::RolledBack;
        marked.rollback_reason = Some(reason.clone());
        self.history.update(&marked)?;

        let attempt = self
            .rollback_to_last_successful_locked(
                &watched.project_id,
                &watched.environment,
                AUTO_ROLLBACK_ACTOR,
                Some(reason.clone()),
            )
            .await;

        match attempt {
            Ok((rollback_id, result)) => {
                info!(deployment = %watched.id, rollback = %rollback_id, version = %result.version, "auto-rollback completed");
                Ok(MonitorOutcome::RolledBack {
                    reason,
                    rollback_id,
                    result,
                })
            }
            Err(e) => {
                let error = e.to_string();
                error!(deployment = %watched.id, reason = %reason, error = %error, "auto-rollback failed");
                marked.rollback_reason = Some(format!("{reason}; rollback failed: {error}"));
                if let Err(e) = self.history.update(&marked) {
                    error!(deployment = %watched.id, error = %e, "failed to record auto-rollback failure");
                }
                Ok(MonitorOutcome::RollbackFailed { reason, error })
            }
        }
    }

    async fn rollback_to_last_successful_locked(
        &self,
        project_id: &str,
        environment: &str,
        initiated_by: &str,
        reason: Option<String>,
    ) -> RollbackResult<(String, DeploymentResult)> {
        let records = self.history.list_for(project_id, environment)?;
        let current = records.first().map(|r| r.id.as_str());
        let target = records
            .iter()
            .find(|r| Some(r.id.as_str()) != current && r.status == DeploymentStatus::Success)
            .ok_or(RollbackError::NoSuccessfulDeployment)?;

        self.rollback_locked(project_id, environment, &target.id, initiated_by, reason)
            .await
    }

    /// Caller holds the pair's guard.
    async fn rollback_locked(
        &self,
        project_id: &str,
        environment: &str,
        target_id: &str,
        initiated_by: &str,
        reason: Option<String>,
    ) -> RollbackResult<(String, DeploymentResult)> {
        let target = self
            .history
            .get(target_id)?
            .ok_or_else(|| RollbackError::NotFound(target_id.to_string()))?;
        if !target.belongs_to(project_id, environment) {
            return Err(RollbackError::Invalid(format!(
                "deployment {target_id} belongs to {}/{}, not {project_id}/{environment}",
                target.project_id, target.environment
            )));
        }

        let records = self.history.list_for(project_id, environment)?;
        let current = records
            .first()
            .ok_or_else(|| RollbackError::NotFound(target_id.to_string()))?;
        if current.id == target.id {
            return Err(RollbackError::Invalid(format!(
                "deployment {target_id} is already current"
            )));
        }

        let config = rollback_config(&target, initiated_by);
        info!(
            project = %project_id,
            environment = %environment,
            from = %current.id,
            to = %target.id,
            version = %target.version,
            initiated_by = %initiated_by,
            "rolling back"
        );

        let (result, failure) = match self.executor.execute(&config).await {
            Ok(result) => (result, None),
            Err(e) => {
                let partial = e.result().cloned();
                match partial {
                    Some(result) => (result, Some(e)),
                    None => return Err(e.into()),
                }
            }
        };

        let mut record = result.to_record(&config);
        record.rollback_from = Some(current.id.clone());
        if reason.is_some() {
            record.rollback_reason = reason;
        }
        self.history.append(&record)?;

        match failure {
            None => {
                info!(rollback = %record.id, version = %record.version, "rollback deployed");
                Ok((record.id, result))
            }
            Some(e) => {
                warn!(rollback = %record.id, error = %e, "rollback deployment did not succeed");
                Err(RollbackError::Execute(e))
            }
        }
    }

    fn guard(&self, project_id: &str, environment: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        // Nobody outside the table holds these, so nobody can be waiting on them.
        guards.retain(|_, guard| Arc::strong_count(guard) > 1);
        guards
            .entry(format!("{project_id}/{environment}"))
            .or_default()
            .clone()
    }
}

/// A direct redeploy of `target`, reusing its recorded settings when present.
fn rollback_config(target: &DeploymentRecord, initiated_by: &str) -> DeploymentConfig {
    let mut config = DeploymentConfig::from_snapshot(&target.config).unwrap_or_else(|| {
        DeploymentConfig::new(&target.project_id, &target.environment, &target.version, &target.image)
    });
    config.project_id = target.project_id.clone();
    config.environment = target.environment.clone();
    config.version = target.version.clone();
    config.image = target.image.clone();
    config.strategy = Strategy::Direct;
    config.deployed_by = initiated_by.to_string();
    config
}
