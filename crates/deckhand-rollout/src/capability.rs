//! Capabilities the executor consumes.
//!
//! Each trait is object-safe and returns boxed futures so executors can hold
//! `Arc<dyn …>` handles and tests can swap in mocks.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Boxed, sendable future returned by capability methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What to run: one version of a workload in one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub project_id: String,
    pub environment: String,
    pub version: String,
    pub image: String,
    /// Desired instance count of this version after the call.
    pub replicas: u32,
    /// Rollout scope for progressive delivery, e.g. `segment:beta` or `region:eu-west-1`.
    pub scope: Option<String>,
}

/// Schedules workloads onto compute.
pub trait ContainerRunner: Send + Sync {
    /// Bring `spec.version` up to `spec.replicas` instances.
    fn deploy<'a>(&'a self, spec: &'a WorkloadSpec) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Tear down every instance of a version.
    fn remove<'a>(&'a self, version: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Probes a health endpoint.
pub trait HealthChecker: Send + Sync {
    /// Ok if the endpoint answered healthy within `timeout`.
    fn check<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Probe several endpoints, returning how many were healthy.
    fn check_multiple<'a>(
        &'a self,
        urls: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, anyhow::Result<usize>> {
        Box::pin(async move {
            let mut healthy = 0;
            for url in urls {
                if self.check(url, timeout).await.is_ok() {
                    healthy += 1;
                }
            }
            Ok(healthy)
        })
    }
}

/// Routes live traffic between versions.
pub trait LoadBalancer: Send + Sync {
    /// Route `percent` (0–100) of traffic to `version`.
    fn set_traffic_weight<'a>(
        &'a self,
        version: &'a str,
        percent: u32,
    ) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Move all traffic from one version to another.
    fn switch_traffic<'a>(&'a self, from: &'a str, to: &'a str)
    -> BoxFuture<'a, anyhow::Result<()>>;

    /// Current version → percent mapping.
    fn get_traffic_distribution(&self) -> BoxFuture<'_, anyhow::Result<BTreeMap<String, u32>>>;
}

/// Live metrics for one deployed version.
///
/// `error_rate` and `success_rate` are fractions (0.0–1.0); `cpu_usage` and
/// `memory_usage` are percentages (0–100).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentMetrics {
    pub error_rate: f64,
    pub latency_ms: f64,
    pub request_rate: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub success_rate: f64,
    pub failed_requests: u64,
    pub custom: BTreeMap<String, f64>,
}

impl DeploymentMetrics {
    /// Reported latency. Values too large to represent, or NaN, saturate at
    /// `Duration::MAX`.
    pub fn latency(&self) -> Duration {
        if self.latency_ms.is_nan() {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64(self.latency_ms.max(0.0) / 1000.0).unwrap_or(Duration::MAX)
    }
}

/// Whether a sampled value is over its limit. Non-finite samples always are.
pub fn breaches(value: f64, threshold: f64) -> bool {
    !value.is_finite() || value > threshold
}

/// Samples metrics for a deployed version.
pub trait DeploymentMonitor: Send + Sync {
    fn get_metrics<'a>(&'a self, version: &'a str) -> BoxFuture<'a, anyhow::Result<DeploymentMetrics>>;

    fn get_error_rate<'a>(&'a self, version: &'a str) -> BoxFuture<'a, anyhow::Result<f64>> {
        Box::pin(async move { Ok(self.get_metrics(version).await?.error_rate) })
    }

    fn get_latency<'a>(&'a self, version: &'a str) -> BoxFuture<'a, anyhow::Result<Duration>> {
        Box::pin(async move { Ok(self.get_metrics(version).await?.latency()) })
    }
}
