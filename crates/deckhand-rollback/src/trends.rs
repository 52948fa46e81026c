//! Rollback statistics over a look-back window.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use deckhand_state::DeploymentRecord;

const UNSPECIFIED_REASON: &str = "unspecified";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackTrends {
    pub project_id: String,
    pub period_days: u32,
    pub total_deployments: usize,
    pub total_rollbacks: usize,
    /// Rollbacks per deployment, 0.0 when nothing was deployed.
    pub rollback_rate: f64,
    /// Rollback count per recorded reason.
    pub reasons: BTreeMap<String, usize>,
    /// Rollback count per environment name.
    pub by_environment: BTreeMap<String, usize>,
}

impl RollbackTrends {
    /// Summarize `records` deployed within `days` of `now`.
    ///
    /// A record counts as a rollback when it was rolled back or when it is
    /// itself a rollback deployment.
    pub fn summarize(
        project_id: &str,
        days: u32,
        records: &[DeploymentRecord],
        now: DateTime<Utc>,
    ) -> Self {
        let cutoff = now - Duration::days(i64::from(days));
        let mut trends = Self {
            project_id: project_id.to_string(),
            period_days: days,
            total_deployments: 0,
            total_rollbacks: 0,
            rollback_rate: 0.0,
            reasons: BTreeMap::new(),
            by_environment: BTreeMap::new(),
        };

        let in_window = records
            .iter()
            .filter(|r| r.project_id == project_id && r.deployed_at >= cutoff);
        for record in in_window {
            trends.total_deployments += 1;
            if !record.counts_as_rollback() {
                continue;
            }
            trends.total_rollbacks += 1;
            let reason = record
                .rollback_reason
                .as_deref()
                .filter(|r| !r.is_empty())
                .unwrap_or(UNSPECIFIED_REASON);
            *trends.reasons.entry(reason.to_string()).or_default() += 1;
            *trends
                .by_environment
                .entry(record.environment.clone())
                .or_default() += 1;
        }

        if trends.total_deployments > 0 {
            trends.rollback_rate = trends.total_rollbacks as f64 / trends.total_deployments as f64;
        }
        trends
    }
}

#[cfg(test)]
mod tests {
    use deckhand_state::{DeploymentStatus, StrategyKind};

    use super::*;

    fn record(id: &str, env: &str, status: DeploymentStatus, age_days: i64) -> DeploymentRecord {
        DeploymentRecord {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            environment: env.to_string(),
            version: format!("v-{id}"),
            image: format!("app:{id}"),
            strategy: StrategyKind::Rolling,
            status,
            deployed_by: "ci".to_string(),
            deployed_at: Utc::now() - Duration::days(age_days),
            rollback_from: None,
            config: Default::default(),
            duration_ms: 1200,
            rollback_reason: None,
        }
    }

    #[test]
    fn counts_rolled_back_and_rollback_records() {
        let mut rolled_back = record("d2", "production", DeploymentStatus::RolledBack, 1);
        rolled_back.rollback_reason = Some("error rate 9.00% exceeded threshold 5.00%".into());
        let mut rollback = record("d3", "production", DeploymentStatus::Success, 1);
        rollback.rollback_from = Some("d2".into());
        rollback.rollback_reason = Some("error rate 9.00% exceeded threshold 5.00%".into());
        let mut manual = record("d5", "staging", DeploymentStatus::Success, 2);
        manual.rollback_from = Some("d4".into());

        let records = vec![
            record("d1", "production", DeploymentStatus::Success, 3),
            rolled_back,
            rollback,
            record("d4", "staging", DeploymentStatus::Success, 2),
            manual,
            record("old", "production", DeploymentStatus::RolledBack, 45),
        ];

        let trends = RollbackTrends::summarize("proj-1", 30, &records, Utc::now());
        assert_eq!(trends.total_deployments, 5);
        assert_eq!(trends.total_rollbacks, 3);
        assert!((trends.rollback_rate - 0.6).abs() < 1e-9);
        assert_eq!(trends.reasons["error rate 9.00% exceeded threshold 5.00%"], 2);
        assert_eq!(trends.reasons[UNSPECIFIED_REASON], 1);
        assert_eq!(trends.by_environment["production"], 2);
        assert_eq!(trends.by_environment["staging"], 1);
    }

    #[test]
    fn empty_history_has_zero_rate() {
        let trends = RollbackTrends::summarize("proj-1", 7, &[], Utc::now());
        assert_eq!(trends.total_deployments, 0);
        assert_eq!(trends.rollback_rate, 0.0);
        assert!(trends.reasons.is_empty());
    }
}
