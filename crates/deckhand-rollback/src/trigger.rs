//! Thresholds that trigger an automatic rollback.

use std::collections::BTreeMap;
use std::time::Duration;

use deckhand_rollout::{DeploymentMetrics, breaches};

/// When to give up on a deployment.
///
/// `error_rate_threshold` is a fraction; `cpu_threshold` and
/// `memory_threshold` are percentages. Custom thresholds are upper bounds on
/// entries of [`DeploymentMetrics::custom`].
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackTrigger {
    pub error_rate_threshold: f64,
    pub latency_threshold: Duration,
    pub failed_requests_threshold: u64,
    /// Sampling failures in a row that count as a breach.
    pub consecutive_failures: u32,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub custom_thresholds: BTreeMap<String, f64>,
    pub monitoring_window: Duration,
    pub poll_interval: Duration,
}

impl Default for RollbackTrigger {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.05,
            latency_threshold: Duration::from_millis(500),
            failed_requests_threshold: 100,
            consecutive_failures: 3,
            cpu_threshold: 95.0,
            memory_threshold: 90.0,
            custom_thresholds: BTreeMap::new(),
            monitoring_window: Duration::from_secs(300),
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl RollbackTrigger {
    /// Number of polls that fit in the monitoring window, at least one.
    pub fn checks(&self) -> u32 {
        if self.poll_interval.is_zero() {
            return 1;
        }
        let checks = self.monitoring_window.as_nanos() / self.poll_interval.as_nanos();
        u32::try_from(checks).unwrap_or(u32::MAX).max(1)
    }

    /// The first breached threshold, as a human-readable reason. A non-finite
    /// sample counts as a breach of its threshold.
    pub fn evaluate(&self, metrics: &DeploymentMetrics) -> Option<String> {
        if breaches(metrics.error_rate, self.error_rate_threshold) {
            return Some(format!(
                "error rate {:.2}% exceeded threshold {:.2}%",
                metrics.error_rate * 100.0,
                self.error_rate_threshold * 100.0
            ));
        }
        if breaches(metrics.latency_ms, self.latency_threshold.as_secs_f64() * 1000.0) {
            return Some(format!(
                "latency {:.0}ms exceeded threshold {}ms",
                metrics.latency_ms,
                self.latency_threshold.as_millis()
            ));
        }
        if breaches(metrics.cpu_usage, self.cpu_threshold) {
            return Some(format!(
                "cpu usage {:.1}% exceeded threshold {:.1}%",
                metrics.cpu_usage, self.cpu_threshold
            ));
        }
        if breaches(metrics.memory_usage, self.memory_threshold) {
            return Some(format!(
                "memory usage {:.1}% exceeded threshold {:.1}%",
                metrics.memory_usage, self.memory_threshold
            ));
        }
        if metrics.failed_requests > self.failed_requests_threshold {
            return Some(format!(
                "{} failed requests exceeded threshold {}",
                metrics.failed_requests, self.failed_requests_threshold
            ));
        }
        self.custom_thresholds.iter().find_map(|(name, max)| {
            let value = metrics.custom.get(name)?;
            breaches(*value, *max).then(|| format!("{name} {value} exceeded threshold {max}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> DeploymentMetrics {
        DeploymentMetrics {
            error_rate: 0.01,
            latency_ms: 120.0,
            cpu_usage: 40.0,
            memory_usage: 55.0,
            failed_requests: 3,
            success_rate: 0.99,
            ..Default::default()
        }
    }

    #[test]
    fn healthy_metrics_pass() {
        assert_eq!(RollbackTrigger::default().evaluate(&healthy()), None);
    }

    #[test]
    fn error_rate_is_checked_first() {
        let metrics = DeploymentMetrics {
            error_rate: 0.12,
            latency_ms: 900.0,
            ..healthy()
        };
        let reason = RollbackTrigger::default().evaluate(&metrics).unwrap();
        assert!(reason.starts_with("error rate 12.00%"), "{reason}");
    }

    #[test]
    fn each_threshold_breaches_on_its_own() {
        let trigger = RollbackTrigger::default();
        let cases = [
            (DeploymentMetrics { latency_ms: 750.0, ..healthy() }, "latency"),
            (DeploymentMetrics { cpu_usage: 97.5, ..healthy() }, "cpu usage"),
            (DeploymentMetrics { memory_usage: 93.0, ..healthy() }, "memory usage"),
            (DeploymentMetrics { failed_requests: 250, ..healthy() }, "failed requests"),
        ];
        for (metrics, expected) in cases {
            let reason = trigger.evaluate(&metrics).unwrap();
            assert!(reason.contains(expected), "{reason}");
        }
    }

    #[test]
    fn out_of_range_latency_is_a_breach() {
        let metrics = DeploymentMetrics {
            latency_ms: 1e300,
            ..healthy()
        };
        let reason = RollbackTrigger::default().evaluate(&metrics).unwrap();
        assert!(reason.starts_with("latency"), "{reason}");
    }

    #[test]
    fn non_finite_samples_are_breaches() {
        let trigger = RollbackTrigger::default();
        let cases = [
            (DeploymentMetrics { error_rate: f64::NAN, ..healthy() }, "error rate"),
            (DeploymentMetrics { latency_ms: f64::INFINITY, ..healthy() }, "latency"),
            (DeploymentMetrics { cpu_usage: f64::NAN, ..healthy() }, "cpu usage"),
            (DeploymentMetrics { memory_usage: f64::INFINITY, ..healthy() }, "memory usage"),
        ];
        for (metrics, expected) in cases {
            let reason = trigger.evaluate(&metrics).unwrap();
            assert!(reason.starts_with(expected), "{reason}");
        }
    }

    #[test]
    fn custom_thresholds_apply_to_reported_metrics_only() {
        let trigger = RollbackTrigger {
            custom_thresholds: BTreeMap::from([
                ("queue_depth".to_string(), 1000.0),
                ("gc_pause_ms".to_string(), 50.0),
            ]),
            ..Default::default()
        };

        let mut metrics = healthy();
        metrics.custom.insert("queue_depth".to_string(), 400.0);
        assert_eq!(trigger.evaluate(&metrics), None);

        metrics.custom.insert("queue_depth".to_string(), 1500.0);
        let reason = trigger.evaluate(&metrics).unwrap();
        assert!(reason.starts_with("queue_depth"), "{reason}");
    }

    #[test]
    fn checks_cover_the_window() {
        assert_eq!(RollbackTrigger::default().checks(), 10);

        let short = RollbackTrigger {
            monitoring_window: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            ..Default::default()
        };
        assert_eq!(short.checks(), 1);
    }
}
