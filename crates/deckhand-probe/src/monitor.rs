//! Metrics sampling over HTTP.
//!
//! The monitor fetches a JSON document shaped like [`DeploymentMetrics`]
//! from a per-version URL. Missing fields default to zero.

use std::time::Duration;

use tracing::debug;

use deckhand_rollout::{BoxFuture, DeploymentMetrics, DeploymentMonitor};

use crate::client::http_get;
use crate::error::ProbeError;

/// Placeholder replaced by the version being sampled.
pub const VERSION_PLACEHOLDER: &str = "{version}";

#[derive(Debug, Clone)]
pub struct HttpMetricsMonitor {
    url_template: String,
    timeout: Duration,
}

impl HttpMetricsMonitor {
    /// `url_template` may contain `{version}`, e.g.
    /// `http://metrics.internal/versions/{version}`.
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url_for(&self, version: &str) -> String {
        self.url_template.replace(VERSION_PLACEHOLDER, version)
    }

    /// Fetch and decode metrics for `version`.
    pub async fn fetch(&self, version: &str) -> Result<DeploymentMetrics, ProbeError> {
        let url = self.url_for(version);
        let (status, body) = http_get(&url, self.timeout).await?;
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }
        let metrics: DeploymentMetrics =
            serde_json::from_slice(&body).map_err(|e| ProbeError::Decode(e.to_string()))?;
        debug!(
            version,
            error_rate = metrics.error_rate,
            latency_ms = metrics.latency_ms,
            "metrics sampled"
        );
        Ok(metrics)
    }
}

impl DeploymentMonitor for HttpMetricsMonitor {
    fn get_metrics<'a>(&'a self, version: &'a str) -> BoxFuture<'a, anyhow::Result<DeploymentMetrics>> {
        Box::pin(async move { Ok(self.fetch(version).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server;

    #[tokio::test]
    async fn fetches_metrics_for_the_requested_version() {
        let server = test_server::serve(vec![(
            200,
            r#"{"error_rate":0.031,"latency_ms":250.0,"cpu_usage":41.0,"failed_requests":7}"#
                .to_string(),
        )])
        .await;
        let monitor = HttpMetricsMonitor::new(format!("{}/versions/{{version}}/metrics", server.base));

        let metrics = monitor.get_metrics("v42").await.unwrap();
        assert_eq!(metrics.error_rate, 0.031);
        assert_eq!(metrics.failed_requests, 7);
        assert_eq!(metrics.memory_usage, 0.0);
        assert_eq!(server.paths(), vec!["/versions/v42/metrics"]);

        let latency = monitor.get_latency("v42").await.unwrap();
        assert_eq!(latency, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn non_success_and_garbage_are_errors() {
        let server = test_server::serve(vec![
            (404, String::new()),
            (200, "not json".to_string()),
        ])
        .await;
        let monitor = HttpMetricsMonitor::new(server.base.clone());

        assert!(matches!(monitor.fetch("v1").await, Err(ProbeError::Status(404))));
        assert!(matches!(monitor.fetch("v1").await, Err(ProbeError::Decode(_))));
    }
}
