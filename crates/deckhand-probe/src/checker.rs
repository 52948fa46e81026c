//! HTTP health checks.
//!
//! A probe is healthy when the endpoint answers 2xx within the timeout.
//! Freshly deployed versions often need a moment to start listening, so
//! the checker can retry a bounded number of times before giving up.

use std::time::Duration;

use tracing::{debug, warn};

use deckhand_rollout::{BoxFuture, HealthChecker};

use crate::client::http_get;
use crate::error::ProbeError;

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    /// The endpoint returned 2xx.
    Healthy,
    /// The endpoint answered with a non-2xx status.
    Unhealthy(u16),
    /// The probe could not complete (connection error, timeout).
    Failed(String),
}

impl ProbeResult {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Probe `url` once.
pub async fn probe(url: &str, timeout: Duration) -> ProbeResult {
    match http_get(url, timeout).await {
        Ok((status, _)) if status.is_success() => ProbeResult::Healthy,
        Ok((status, _)) => {
            debug!(%url, %status, "health probe non-2xx");
            ProbeResult::Unhealthy(status.as_u16())
        }
        Err(e) => {
            debug!(%url, error = %e, "health probe failed");
            ProbeResult::Failed(e.to_string())
        }
    }
}

/// [`HealthChecker`] backed by plain HTTP probes.
#[derive(Debug, Clone)]
pub struct HttpHealthChecker {
    /// Extra attempts after the first failed probe.
    retries: u32,
    retry_delay: Duration,
}

impl Default for HttpHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHealthChecker {
    /// A checker that probes exactly once.
    pub fn new() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    async fn check_with_retries(&self, url: &str, timeout: Duration) -> Result<(), ProbeError> {
        let mut attempt = 0;
        loop {
            let err = match http_get(url, timeout).await {
                Ok((status, _)) if status.is_success() => return Ok(()),
                Ok((status, _)) => ProbeError::Status(status.as_u16()),
                Err(e) => e,
            };

            if attempt >= self.retries {
                warn!(%url, attempts = attempt + 1, error = %err, "health check failed");
                return Err(err);
            }
            attempt += 1;
            debug!(%url, attempt, error = %err, "health check failed, retrying");
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

impl HealthChecker for HttpHealthChecker {
    fn check<'a>(&'a self, url: &'a str, timeout: Duration) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.check_with_retries(url, timeout).await?;
            Ok(())
        })
    }
}
