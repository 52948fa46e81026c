//! Step log produced by every execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deckhand_state::{DeploymentRecord, DeploymentStatus, StrategyKind};

use crate::strategy::DeploymentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Success,
    Failed,
}

/// One discrete action taken during a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStep {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentStep {
    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Outcome of a deployment, with the ordered step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub version: String,
    pub strategy: StrategyKind,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub steps: Vec<DeploymentStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,
}

impl DeploymentResult {
    pub(crate) fn start(version: &str, strategy: StrategyKind) -> Self {
        Self {
            version: version.to_string(),
            strategy,
            status: DeploymentStatus::Success,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: 0,
            steps: Vec::new(),
            rollback_reason: None,
        }
    }

    /// Open a step; returns its index for [`Self::finish_step`].
    pub(crate) fn begin_step(&mut self, name: impl Into<String>) -> usize {
        self.steps.push(DeploymentStep {
            name: name.into(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        });
        self.steps.len() - 1
    }

    pub(crate) fn finish_step(&mut self, index: usize, error: Option<String>) {
        if let Some(step) = self.steps.get_mut(index) {
            step.completed_at = Some(Utc::now());
            step.status = if error.is_some() {
                StepStatus::Failed
            } else {
                StepStatus::Success
            };
            step.error = error;
        }
    }

    /// Stamp completion time, duration and final status.
    pub(crate) fn complete(&mut self, status: DeploymentStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }

    pub fn step(&self, name: &str) -> Option<&DeploymentStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// The first failed step, if any.
    pub fn failed_step(&self) -> Option<&DeploymentStep> {
        self.steps.iter().find(|s| s.is_failed())
    }

    /// Build the history record for this run under a fresh id.
    pub fn to_record(&self, config: &DeploymentConfig) -> DeploymentRecord {
        DeploymentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: config.project_id.clone(),
            environment: config.environment.clone(),
            version: self.version.clone(),
            image: config.image.clone(),
            strategy: self.strategy,
            status: self.status,
            deployed_by: config.deployed_by.clone(),
            deployed_at: self.started_at,
            rollback_from: None,
            config: config.snapshot(),
            duration_ms: self.duration_ms,
            rollback_reason: self.rollback_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_record_outcome_and_timing() {
        let mut result = DeploymentResult::start("v2", StrategyKind::Direct);
        let deploy = result.begin_step("Deploy");
        result.finish_step(deploy, None);
        let health = result.begin_step("Health Check");
        assert_eq!(result.steps[health].status, StepStatus::Running);
        result.finish_step(health, Some("503 Service Unavailable".into()));
        result.complete(DeploymentStatus::Failed);

        assert_eq!(result.step_names(), vec!["Deploy", "Health Check"]);
        assert_eq!(result.step("Deploy").unwrap().status, StepStatus::Success);
        let failed = result.failed_step().unwrap();
        assert_eq!(failed.name, "Health Check");
        assert_eq!(failed.error.as_deref(), Some("503 Service Unavailable"));
        assert!(failed.completed_at.unwrap() >= failed.started_at);
        assert!(result.completed_at.unwrap() >= result.started_at);
        assert_eq!(result.status, DeploymentStatus::Failed);
    }

    #[test]
    fn record_carries_config_snapshot() {
        let mut config = DeploymentConfig::new("proj-1", "staging", "v3", "app:v3");
        config.deployed_by = "alice".into();
        let mut result = DeploymentResult::start("v3", StrategyKind::Direct);
        result.rollback_reason = Some("canary failed at 25% traffic".into());
        result.complete(DeploymentStatus::RolledBack);

        let record = result.to_record(&config);
        assert!(!record.id.is_empty());
        assert!(record.belongs_to("proj-1", "staging"));
        assert_eq!(record.status, DeploymentStatus::RolledBack);
        assert_eq!(record.deployed_by, "alice");
        assert_eq!(record.config["image"], "app:v3");
        assert!(!record.is_rollback());
        assert_eq!(record.rollback_reason, result.rollback_reason);
    }
}
