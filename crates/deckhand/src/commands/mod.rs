pub mod deploy;
pub mod env;
pub mod history;
pub mod keygen;
pub mod rollback;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context as _, bail};

use deckhand_env::EnvironmentManager;
use deckhand_probe::{HttpHealthChecker, HttpMetricsMonitor};
use deckhand_rollback::RollbackManager;
use deckhand_rollout::{
    BoxFuture, DeploymentExecutor, DeploymentMetrics, DeploymentMonitor, DeploymentResult, StepStatus,
};
use deckhand_state::{DeploymentHistory, DeploymentStatus, EnvironmentStore, FileStore, StateStore};

use crate::config::{Backend, Config};
use crate::hooks::{CommandBalancer, CommandRunner, ShellHooks};

/// Opened stores plus the config every command is built from.
pub struct Context {
    pub config: Config,
    environments: Arc<dyn EnvironmentStore>,
    history: Arc<dyn DeploymentHistory>,
}

impl Context {
    pub fn open(config: Config) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let (environments, history): (Arc<dyn EnvironmentStore>, Arc<dyn DeploymentHistory>) =
            match storage.backend {
                Backend::File => {
                    let store = Arc::new(
                        FileStore::open(&storage.root, &storage.history_root)
                            .context("failed to open file store")?,
                    );
                    (store.clone(), store)
                }
                Backend::Redb => {
                    if let Some(parent) = storage.redb_path.parent() {
                        std::fs::create_dir_all(parent).with_context(|| {
                            format!("failed to create {}", parent.display())
                        })?;
                    }
                    let store = StateStore::open(&storage.redb_path).with_context(|| {
                        format!("failed to open {}", storage.redb_path.display())
                    })?;
                    (Arc::new(store.clone()), Arc::new(store))
                }
            };
        tracing::debug!(backend = ?storage.backend, "state store opened");
        Ok(Self {
            config,
            environments,
            history,
        })
    }

    pub fn environment_store(&self) -> Arc<dyn EnvironmentStore> {
        self.environments.clone()
    }

    pub fn history(&self) -> Arc<dyn DeploymentHistory> {
        self.history.clone()
    }

    /// Environment manager keyed with the configured secret key.
    pub fn environments(&self) -> anyhow::Result<EnvironmentManager> {
        Ok(EnvironmentManager::new(
            self.environments.clone(),
            self.config.cipher()?,
        ))
    }

    /// Version of the newest successful deployment for the pair.
    pub fn serving_version(&self, project_id: &str, environment: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .history
            .list_for(project_id, environment)?
            .into_iter()
            .find(|r| r.status == DeploymentStatus::Success)
            .map(|r| r.version))
    }

    pub fn monitor(&self) -> anyhow::Result<Arc<dyn DeploymentMonitor>> {
        Ok(match &self.config.monitor.metrics_url {
            Some(url) => Arc::new(
                HttpMetricsMonitor::new(url.clone())
                    .with_timeout(self.config.monitor.metrics_timeout()?),
            ),
            None => Arc::new(NoMetrics),
        })
    }

    /// Executor wired to the shell hooks for one project/environment pair.
    pub fn executor(&self, project_id: &str, environment: &str) -> anyhow::Result<Arc<DeploymentExecutor>> {
        let hooks = Arc::new(ShellHooks::new(self.config.hooks.clone(), project_id, environment));
        let serving = self.serving_version(project_id, environment)?;
        let health = HttpHealthChecker::new().with_retries(
            self.config.rollout.health_retries,
            self.config.rollout.health_retry_delay()?,
        );

        let executor = DeploymentExecutor::new(
            Arc::new(CommandRunner::new(hooks.clone())),
            Arc::new(health),
            Arc::new(CommandBalancer::new(hooks, serving.as_deref())),
            self.monitor()?,
        )
        .with_timings(self.config.timings()?);
        Ok(Arc::new(executor))
    }

    pub fn rollback_manager(&self, project_id: &str, environment: &str) -> anyhow::Result<Arc<RollbackManager>> {
        Ok(Arc::new(RollbackManager::new(
            self.history.clone(),
            self.executor(project_id, environment)?,
            self.monitor()?,
        )))
    }
}

/// Stand-in monitor when no metrics endpoint is configured.
struct NoMetrics;

impl DeploymentMonitor for NoMetrics {
    fn get_metrics<'a>(&'a self, _version: &'a str) -> BoxFuture<'a, anyhow::Result<DeploymentMetrics>> {
        Box::pin(async { bail!("no metrics source configured (set monitor.metrics_url)") })
    }
}

/// The invoking user, for lock ownership and audit fields.
pub fn current_user() -> String {
    std::env::var("DECKHAND_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "deckhand".to_string())
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_result(result: &DeploymentResult) {
    println!(
        "{} {} ({}) in {}ms",
        result.version, result.status, result.strategy, result.duration_ms
    );
    for step in &result.steps {
        let mark = match step.status {
            StepStatus::Success => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Running => "…",
        };
        match &step.error {
            Some(error) => println!("  {mark} {}: {error}", step.name),
            None => println!("  {mark} {}", step.name),
        }
    }
    if let Some(reason) = &result.rollback_reason {
        println!("  rolled back: {reason}");
    }
}
