//! Deployment strategies and their configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use deckhand_state::StrategyKind;

use crate::error::ExecuteError;

/// How to roll out a new version. Closed: every variant is handled by the
/// executor, and strategies that need settings carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum Strategy {
    /// Deploy everything at once, then health check. Never rolls back.
    Direct,
    /// Replace instances in sequential batches.
    Rolling(RolloutConfig),
    /// Stand up a parallel copy and switch all traffic at once.
    BlueGreen,
    /// Shift traffic to the new version in escalating weights.
    Canary(CanaryConfig),
    /// Delete the old version, then create the new one.
    Recreate,
    /// Roll out per user segment, then per region.
    Progressive(ProgressiveConfig),
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Rolling(RolloutConfig::default())
    }
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Direct => StrategyKind::Direct,
            Self::Rolling(_) => StrategyKind::Rolling,
            Self::BlueGreen => StrategyKind::BlueGreen,
            Self::Canary(_) => StrategyKind::Canary,
            Self::Recreate => StrategyKind::Recreate,
            Self::Progressive(_) => StrategyKind::Progressive,
        }
    }

    /// Assemble a strategy from a tag and optional sub-configs.
    ///
    /// Rolling and canary fall back to their defaults; progressive has no
    /// sensible default and is rejected without a config.
    pub fn from_parts(
        kind: StrategyKind,
        rollout: Option<RolloutConfig>,
        canary: Option<CanaryConfig>,
        progressive: Option<ProgressiveConfig>,
    ) -> Result<Self, ExecuteError> {
        Ok(match kind {
            StrategyKind::Direct => Self::Direct,
            StrategyKind::Rolling => Self::Rolling(rollout.unwrap_or_default()),
            StrategyKind::BlueGreen => Self::BlueGreen,
            StrategyKind::Canary => Self::Canary(canary.unwrap_or_default()),
            StrategyKind::Recreate => Self::Recreate,
            StrategyKind::Progressive => Self::Progressive(progressive.ok_or_else(|| {
                ExecuteError::InvalidConfig(
                    "progressive strategy requires a progressive config".to_string(),
                )
            })?),
        })
    }
}

/// Configuration for rolling updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Number of replicas to update per batch. Zero is treated as one.
    pub batch_size: u32,
    /// Seconds to wait between batches.
    pub batch_interval_secs: u64,
    /// Remove the new version when a batch fails.
    pub auto_rollback: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_interval_secs: 30,
            auto_rollback: true,
        }
    }
}

/// Configuration for canary deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// First traffic weight (percent).
    pub initial_weight: u32,
    /// Weights to escalate through after the first one.
    pub increments: Vec<u32>,
    /// Seconds to observe each weight before sampling.
    pub step_duration_secs: u64,
    /// Error rate (fraction) above which the canary is rolled back.
    pub failure_threshold: f64,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            initial_weight: 10,
            increments: vec![25, 50, 100],
            step_duration_secs: 300,
            failure_threshold: 0.05,
        }
    }
}

impl CanaryConfig {
    /// The full escalation schedule, clamped to 100%.
    pub fn weights(&self) -> Vec<u32> {
        std::iter::once(self.initial_weight)
            .chain(self.increments.iter().copied())
            .map(|w| w.min(100))
            .collect()
    }
}

/// Configuration for progressive delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressiveConfig {
    pub user_segments: Vec<String>,
    pub regions: Vec<String>,
}

/// A deployment request handed to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub project_id: String,
    pub environment: String,
    pub strategy: Strategy,
    pub version: String,
    pub image: String,
    pub replicas: u32,
    /// Empty means "no health endpoint"; health steps are skipped.
    #[serde(default)]
    pub health_check_url: String,
    #[serde(default = "default_health_timeout_secs")]
    pub health_check_timeout_secs: u64,
    #[serde(default)]
    pub deployed_by: String,
}

fn default_health_timeout_secs() -> u64 {
    30
}

impl DeploymentConfig {
    /// A direct deployment of `version`/`image` with default settings.
    pub fn new(project_id: &str, environment: &str, version: &str, image: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            environment: environment.to_string(),
            strategy: Strategy::Direct,
            version: version.to_string(),
            image: image.to_string(),
            replicas: 1,
            health_check_url: String::new(),
            health_check_timeout_secs: default_health_timeout_secs(),
            deployed_by: String::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_health_check(mut self, url: &str, timeout_secs: u64) -> Self {
        self.health_check_url = url.to_string();
        self.health_check_timeout_secs = timeout_secs;
        self
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    /// JSON snapshot stored on the deployment record.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    /// Rebuild a config from a record snapshot, if it holds one.
    pub fn from_snapshot(snapshot: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        serde_json::from_value(serde_json::Value::Object(snapshot.clone())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_rolling() {
        match Strategy::default() {
            Strategy::Rolling(cfg) => {
                assert_eq!(cfg.batch_size, 1);
                assert_eq!(cfg.batch_interval_secs, 30);
                assert!(cfg.auto_rollback);
            }
            other => panic!("expected Rolling, got {other:?}"),
        }
    }

    #[test]
    fn canary_default_schedule() {
        assert_eq!(CanaryConfig::default().weights(), vec![10, 25, 50, 100]);

        let custom = CanaryConfig {
            initial_weight: 5,
            increments: vec![150],
            ..Default::default()
        };
        assert_eq!(custom.weights(), vec![5, 100]);
    }

    #[test]
    fn progressive_requires_config() {
        let err = Strategy::from_parts(StrategyKind::Progressive, None, None, None).unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidConfig(_)));

        let ok = Strategy::from_parts(
            StrategyKind::Progressive,
            None,
            None,
            Some(ProgressiveConfig::default()),
        )
        .unwrap();
        assert_eq!(ok.kind(), StrategyKind::Progressive);
    }

    #[test]
    fn unknown_strategy_tag_is_rejected_on_parse() {
        let json = r#"{"project_id":"p","environment":"e","strategy":{"type":"shadow"},
                       "version":"v2","image":"app:v2","replicas":2}"#;
        assert!(serde_json::from_str::<DeploymentConfig>(json).is_err());
    }

    #[test]
    fn snapshot_roundtrips_through_record_form() {
        let config = DeploymentConfig::new("p", "prod", "v2", "app:v2")
            .with_strategy(Strategy::Canary(CanaryConfig::default()))
            .with_replicas(4)
            .with_health_check("http://app/healthz", 5);

        let snapshot = config.snapshot();
        assert_eq!(snapshot["strategy"]["type"], "canary");
        assert_eq!(DeploymentConfig::from_snapshot(&snapshot), Some(config));
    }
}
