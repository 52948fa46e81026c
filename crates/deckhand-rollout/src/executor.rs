//! Deployment executor: runs a strategy and records every step.
//!
//! Steps run strictly in order. Each capability call becomes one
//! [`DeploymentStep`](crate::result::DeploymentStep); a failing step ends
//! the run, optionally after compensating steps (rollback, traffic reset).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use deckhand_state::DeploymentStatus;

use crate::capability::{
    ContainerRunner, DeploymentMonitor, HealthChecker, LoadBalancer, WorkloadSpec, breaches,
};
use crate::error::ExecuteError;
use crate::result::DeploymentResult;
use crate::strategy::{CanaryConfig, DeploymentConfig, ProgressiveConfig, RolloutConfig, Strategy};
use crate::traffic::dominant_version;

/// Error rate (fraction) above which a blue-green switch is reverted.
pub const BLUE_GREEN_ERROR_THRESHOLD: f64 = 0.05;

/// Fixed waits used by strategies that do not carry their own timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorTimings {
    /// How long to watch green after switching traffic.
    pub blue_green_window: Duration,
    /// Pause after each progressive segment or region.
    pub progressive_pause: Duration,
}

impl Default for ExecutorTimings {
    fn default() -> Self {
        Self {
            blue_green_window: Duration::from_secs(30),
            progressive_pause: Duration::from_secs(30),
        }
    }
}

/// Runs deployments against injected infrastructure capabilities.
pub struct DeploymentExecutor {
    runner: Arc<dyn ContainerRunner>,
    health: Arc<dyn HealthChecker>,
    balancer: Arc<dyn LoadBalancer>,
    monitor: Arc<dyn DeploymentMonitor>,
    timings: ExecutorTimings,
}

impl DeploymentExecutor {
    pub fn new(
        runner: Arc<dyn ContainerRunner>,
        health: Arc<dyn HealthChecker>,
        balancer: Arc<dyn LoadBalancer>,
        monitor: Arc<dyn DeploymentMonitor>,
    ) -> Self {
        Self {
            runner,
            health,
            balancer,
            monitor,
            timings: ExecutorTimings::default(),
        }
    }

    pub fn with_timings(mut self, timings: ExecutorTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn timings(&self) -> ExecutorTimings {
        self.timings
    }

    /// Run `config` to completion.
    ///
    /// Returns the result on success. Any other outcome is an error that
    /// still carries the full step log.
    pub async fn execute(&self, config: &DeploymentConfig) -> Result<DeploymentResult, ExecuteError> {
        validate(config)?;

        info!(
            project = %config.project_id,
            environment = %config.environment,
            version = %config.version,
            strategy = %config.strategy.kind(),
            replicas = config.replicas,
            "starting deployment"
        );

        let outcome = match &config.strategy {
            Strategy::Direct => self.direct(config).await,
            Strategy::Rolling(rolling) => self.rolling(config, rolling).await,
            Strategy::BlueGreen => self.blue_green(config).await,
            Strategy::Canary(canary) => self.canary(config, canary).await,
            Strategy::Recreate => self.recreate(config).await,
            Strategy::Progressive(progressive) => self.progressive(config, progressive).await,
        };

        match &outcome {
            Ok(result) => info!(
                version = %config.version,
                steps = result.steps.len(),
                duration_ms = result.duration_ms,
                "deployment succeeded"
            ),
            Err(e) => warn!(version = %config.version, error = %e, "deployment did not succeed"),
        }
        outcome
    }

    async fn direct(&self, config: &DeploymentConfig) -> Result<DeploymentResult, ExecuteError> {
        let mut result = DeploymentResult::start(&config.version, config.strategy.kind());

        let spec = workload(config, config.replicas, None);
        if let Err(e) = run_step(&mut result, "Deploy", self.runner.deploy(&spec)).await {
            return Err(fail(result, "Deploy", e));
        }
        if let Err(e) = self.health_step(&mut result, "Health Check", config).await {
            return Err(fail(result, "Health Check", e));
        }
        succeed(result)
    }

    async fn rolling(
        &self,
        config: &DeploymentConfig,
        rolling: &RolloutConfig,
    ) -> Result<DeploymentResult, ExecuteError> {
        let mut result = DeploymentResult::start(&config.version, config.strategy.kind());
        let batch_size = rolling.batch_size.max(1);
        let batches = config.replicas.div_ceil(batch_size);
        let interval = Duration::from_secs(rolling.batch_interval_secs);

        debug!(version = %config.version, batches, batch_size, "rolling update planned");

        for batch in 1..=batches {
            let updated = (batch * batch_size).min(config.replicas);
            let spec = workload(config, updated, None);

            let deploy_step = format!("Deploy Batch {batch}");
            let deployed = run_step(&mut result, &deploy_step, self.runner.deploy(&spec)).await;
            let outcome = match deployed {
                Ok(()) => {
                    let health_step = format!("Health Check Batch {batch}");
                    self.health_step(&mut result, &health_step, config)
                        .await
                        .map_err(|e| (health_step, e))
                }
                Err(e) => Err((deploy_step, e)),
            };

            if let Err((step, error)) = outcome {
                if !rolling.auto_rollback {
                    return Err(fail(result, &step, error));
                }
                warn!(version = %config.version, batch, "batch failed, rolling back");
                if let Err(e) = run_step(&mut result, "Rollback", self.runner.remove(&config.version)).await {
                    return Err(fail(result, "Rollback", e));
                }
                return Err(roll_back(result, format!("batch {batch} failed: {error}")));
            }

            debug!(version = %config.version, batch, batches, updated, "batch complete");
            if batch < batches {
                pause(interval).await;
            }
        }

        succeed(result)
    }

    async fn blue_green(&self, config: &DeploymentConfig) -> Result<DeploymentResult, ExecuteError> {
        let mut result = DeploymentResult::start(&config.version, config.strategy.kind());
        let green = config.version.as_str();
        let blue = self.active_version(green).await.unwrap_or_else(|| "blue".to_string());

        let spec = workload(config, config.replicas, None);
        if let Err(e) = run_step(&mut result, "Deploy Green", self.runner.deploy(&spec)).await {
            return Err(fail(result, "Deploy Green", e));
        }
        if let Err(e) = self.health_step(&mut result, "Health Check Green", config).await {
            return Err(fail(result, "Health Check Green", e));
        }
        if let Err(e) = run_step(
            &mut result,
            "Switch Traffic",
            self.balancer.switch_traffic(&blue, green),
        )
        .await
        {
            return Err(fail(result, "Switch Traffic", e));
        }
        info!(blue = %blue, green, "traffic switched to green");

        let window = self.timings.blue_green_window;
        let watched = run_step(&mut result, "Monitor", async {
            pause(window).await;
            let metrics = self.monitor.get_metrics(green).await?;
            if breaches(metrics.error_rate, BLUE_GREEN_ERROR_THRESHOLD) {
                anyhow::bail!(
                    "error rate {:.2}% exceeded {:.2}%",
                    metrics.error_rate * 100.0,
                    BLUE_GREEN_ERROR_THRESHOLD * 100.0
                );
            }
            Ok(())
        })
        .await;

        if let Err(e) = watched {
            warn!(blue = %blue, green, error = %e, "green degraded, switching back");
            if let Err(e) = run_step(
                &mut result,
                "Switch Back",
                self.balancer.switch_traffic(green, &blue),
            )
            .await
            {
                return Err(fail(result, "Switch Back", e));
            }
            return Err(roll_back(result, format!("green failed monitoring: {e}")));
        }

        succeed(result)
    }

    async fn canary(
        &self,
        config: &DeploymentConfig,
        canary: &CanaryConfig,
    ) -> Result<DeploymentResult, ExecuteError> {
        let mut result = DeploymentResult::start(&config.version, config.strategy.kind());
        let version = config.version.as_str();
        let step_duration = Duration::from_secs(canary.step_duration_secs);

        let spec = workload(config, config.replicas, None);
        if let Err(e) = run_step(&mut result, "Deploy Canary", self.runner.deploy(&spec)).await {
            return Err(fail(result, "Deploy Canary", e));
        }
        if let Err(e) = self.health_step(&mut result, "Health Check Canary", config).await {
            return Err(fail(result, "Health Check Canary", e));
        }

        for weight in canary.weights() {
            let set_step = format!("Set Traffic {weight}%");
            if let Err(e) = run_step(
                &mut result,
                &set_step,
                self.balancer.set_traffic_weight(version, weight),
            )
            .await
            {
                return Err(fail(result, &set_step, e));
            }

            pause(step_duration).await;

            let sampled = run_step(&mut result, format!("Monitor {weight}%"), async {
                let error_rate = self.monitor.get_error_rate(version).await?;
                if breaches(error_rate, canary.failure_threshold) {
                    anyhow::bail!(
                        "error rate {:.2}% exceeded threshold {:.2}%",
                        error_rate * 100.0,
                        canary.failure_threshold * 100.0
                    );
                }
                Ok(())
            })
            .await;

            if let Err(e) = sampled {
                warn!(version, weight, error = %e, "canary degraded, resetting traffic");
                if let Err(e) = run_step(
                    &mut result,
                    "Reset Traffic",
                    self.balancer.set_traffic_weight(version, 0),
                )
                .await
                {
                    return Err(fail(result, "Reset Traffic", e));
                }
                return Err(roll_back(result, format!("canary failed at {weight}% traffic: {e}")));
            }

            debug!(version, weight, "canary weight healthy");
        }

        succeed(result)
    }

    async fn recreate(&self, config: &DeploymentConfig) -> Result<DeploymentResult, ExecuteError> {
        let mut result = DeploymentResult::start(&config.version, config.strategy.kind());

        if let Some(old) = self.active_version(&config.version).await {
            let step = format!("Delete Old {old}");
            if let Err(e) = run_step(&mut result, &step, self.runner.remove(&old)).await {
                return Err(fail(result, &step, e));
            }
        }

        let step = format!("Create {}", config.version);
        let spec = workload(config, config.replicas, None);
        if let Err(e) = run_step(&mut result, &step, self.runner.deploy(&spec)).await {
            return Err(fail(result, &step, e));
        }
        if let Err(e) = self.health_step(&mut result, "Health Check", config).await {
            return Err(fail(result, "Health Check", e));
        }
        succeed(result)
    }

    async fn progressive(
        &self,
        config: &DeploymentConfig,
        progressive: &ProgressiveConfig,
    ) -> Result<DeploymentResult, ExecuteError> {
        let mut result = DeploymentResult::start(&config.version, config.strategy.kind());
        let pause_for = self.timings.progressive_pause;

        let stages = progressive
            .user_segments
            .iter()
            .map(|s| ("Segment", format!("segment:{s}"), s))
            .chain(progressive.regions.iter().map(|r| ("Region", format!("region:{r}"), r)));

        for (label, scope, name) in stages {
            let deploy_step = format!("Deploy {label} {name}");
            let spec = workload(config, config.replicas, Some(scope));
            if let Err(e) = run_step(&mut result, &deploy_step, self.runner.deploy(&spec)).await {
                return Err(fail(result, &deploy_step, e));
            }
            // Observing never fails on its own; it is a timed hold before widening.
            let _ = run_step(&mut result, format!("Observe {label} {name}"), async {
                pause(pause_for).await;
                anyhow::Ok(())
            })
            .await;
        }

        if let Err(e) = self.health_step(&mut result, "Health Check", config).await {
            return Err(fail(result, "Health Check", e));
        }
        succeed(result)
    }

    /// Health check as a step. Skipped entirely when no URL is configured.
    async fn health_step(
        &self,
        result: &mut DeploymentResult,
        name: &str,
        config: &DeploymentConfig,
    ) -> Result<(), String> {
        if config.health_check_url.is_empty() {
            debug!(step = name, "no health check url, skipping");
            return Ok(());
        }
        run_step(
            result,
            name,
            self.health
                .check(&config.health_check_url, config.health_check_timeout()),
        )
        .await
    }

    /// The version currently holding the most traffic, other than `incoming`.
    async fn active_version(&self, incoming: &str) -> Option<String> {
        match self.balancer.get_traffic_distribution().await {
            Ok(distribution) => dominant_version(&distribution, incoming),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "failed to read traffic distribution");
                None
            }
        }
    }
}

fn validate(config: &DeploymentConfig) -> Result<(), ExecuteError> {
    if config.version.trim().is_empty() {
        return Err(ExecuteError::InvalidConfig("version must not be empty".to_string()));
    }
    if let Strategy::Progressive(progressive) = &config.strategy {
        if progressive.user_segments.is_empty() && progressive.regions.is_empty() {
            return Err(ExecuteError::InvalidConfig(
                "progressive config names no user segments or regions".to_string(),
            ));
        }
    }
    Ok(())
}

fn workload(config: &DeploymentConfig, replicas: u32, scope: Option<String>) -> WorkloadSpec {
    WorkloadSpec {
        project_id: config.project_id.clone(),
        environment: config.environment.clone(),
        version: config.version.clone(),
        image: config.image.clone(),
        replicas,
        scope,
    }
}

/// Run one step, recording its timing and outcome on `result`.
async fn run_step<F>(
    result: &mut DeploymentResult,
    name: impl Into<String>,
    action: F,
) -> Result<(), String>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let name = name.into();
    let index = result.begin_step(name.clone());
    debug!(step = %name, "step started");

    match action.await {
        Ok(()) => {
            result.finish_step(index, None);
            Ok(())
        }
        Err(e) => {
            let error = format!("{e:#}");
            warn!(step = %name, error = %error, "step failed");
            result.finish_step(index, Some(error.clone()));
            Err(error)
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

fn succeed(mut result: DeploymentResult) -> Result<DeploymentResult, ExecuteError> {
    result.complete(DeploymentStatus::Success);
    Ok(result)
}

fn fail(mut result: DeploymentResult, step: &str, error: String) -> ExecuteError {
    result.complete(DeploymentStatus::Failed);
    ExecuteError::Failed {
        step: step.to_string(),
        error,
        result: Box::new(result),
    }
}

fn roll_back(mut result: DeploymentResult, reason: String) -> ExecuteError {
    result.rollback_reason = Some(reason.clone());
    result.complete(DeploymentStatus::RolledBack);
    ExecuteError::RolledBack {
        reason,
        result: Box::new(result),
    }
}
