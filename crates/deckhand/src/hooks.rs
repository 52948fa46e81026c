//! Shell-hook implementations of the container and traffic capabilities.
//!
//! Each operation renders a command template from `[hooks]` and runs it
//! through the configured shell. A non-zero exit fails the operation with
//! the hook's stderr.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::process::Command;
use tracing::debug;

use deckhand_rollout::{BoxFuture, ContainerRunner, LoadBalancer, TrafficTable, WorkloadSpec};

use crate::config::HooksConfig;

/// Replace `{name}` placeholders. Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

pub struct ShellHooks {
    config: HooksConfig,
    project_id: String,
    environment: String,
}

impl ShellHooks {
    pub fn new(config: HooksConfig, project_id: &str, environment: &str) -> Self {
        Self {
            config,
            project_id: project_id.to_string(),
            environment: environment.to_string(),
        }
    }

    async fn run(&self, hook: &str, template: Option<&str>, vars: &[(&str, &str)]) -> anyhow::Result<()> {
        let Some(template) = template else {
            bail!("no `{hook}` hook configured in [hooks]");
        };
        let mut all = vec![
            ("project", self.project_id.as_str()),
            ("environment", self.environment.as_str()),
        ];
        all.extend_from_slice(vars);
        let command = render(template, &all);

        debug!(hook, %command, "running hook");
        let output = Command::new(&self.config.shell)
            .arg("-c")
            .arg(&command)
            .output()
            .await
            .with_context(|| format!("failed to spawn `{hook}` hook"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("`{hook}` hook exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

/// [`ContainerRunner`] driven by the `deploy` and `remove` hooks.
pub struct CommandRunner {
    hooks: Arc<ShellHooks>,
}

impl CommandRunner {
    pub fn new(hooks: Arc<ShellHooks>) -> Self {
        Self { hooks }
    }
}

impl ContainerRunner for CommandRunner {
    fn deploy<'a>(&'a self, spec: &'a WorkloadSpec) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let replicas = spec.replicas.to_string();
            let vars = [
                ("version", spec.version.as_str()),
                ("image", spec.image.as_str()),
                ("replicas", replicas.as_str()),
                ("scope", spec.scope.as_deref().unwrap_or("")),
            ];
            self.hooks
                .run("deploy", self.hooks.config.deploy.as_deref(), &vars)
                .await
        })
    }

    fn remove<'a>(&'a self, version: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.hooks
                .run("remove", self.hooks.config.remove.as_deref(), &[("version", version)])
                .await
        })
    }
}

/// [`LoadBalancer`] driven by the `traffic` and `switch` hooks.
///
/// Hooks cannot report the live split, so the balancer keeps its own
/// table, seeded with the version currently serving.
pub struct CommandBalancer {
    hooks: Arc<ShellHooks>,
    table: TrafficTable,
}

impl CommandBalancer {
    pub fn new(hooks: Arc<ShellHooks>, serving: Option<&str>) -> Self {
        let table = match serving {
            Some(version) => TrafficTable::serving(version),
            None => TrafficTable::new(),
        };
        Self { hooks, table }
    }
}

impl LoadBalancer for CommandBalancer {
    fn set_traffic_weight<'a>(&'a self, version: &'a str, percent: u32) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let percent_str = percent.to_string();
            self.hooks
                .run(
                    "traffic",
                    self.hooks.config.traffic.as_deref(),
                    &[("version", version), ("percent", percent_str.as_str())],
                )
                .await?;
            self.table.set(version, percent);
            Ok(())
        })
    }

    fn switch_traffic<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            match self.hooks.config.switch.as_deref() {
                Some(template) => {
                    self.hooks
                        .run("switch", Some(template), &[("from", from), ("to", to)])
                        .await?;
                }
                None => {
                    let traffic = self.hooks.config.traffic.as_deref();
                    self.hooks
                        .run("traffic", traffic, &[("version", to), ("percent", "100")])
                        .await?;
                    self.hooks
                        .run("traffic", traffic, &[("version", from), ("percent", "0")])
                        .await?;
                }
            }
            self.table.switch(from, to);
            Ok(())
        })
    }

    fn get_traffic_distribution(&self) -> BoxFuture<'_, anyhow::Result<BTreeMap<String, u32>>> {
        Box::pin(async move { Ok(self.table.distribution()) })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn hooks(config: HooksConfig) -> Arc<ShellHooks> {
        Arc::new(ShellHooks::new(config, "shop", "production"))
    }

    fn log_to(path: &Path, line: &str) -> Option<String> {
        Some(format!("echo \"{line}\" >> {}", path.display()))
    }

    fn read_log(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn render_substitutes_known_placeholders() {
        let out = render(
            "deploy {project}/{environment} {image} x{replicas} {unknown}",
            &[
                ("project", "shop"),
                ("environment", "staging"),
                ("image", "shop:v2"),
                ("replicas", "3"),
            ],
        );
        assert_eq!(out, "deploy shop/staging shop:v2 x3 {unknown}");
    }

    #[tokio::test]
    async fn deploy_hook_receives_the_workload() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("hooks.log");
        let runner = CommandRunner::new(hooks(HooksConfig {
            deploy: log_to(&log, "{project} {environment} {version} {image} {replicas} [{scope}]"),
            remove: log_to(&log, "remove {version}"),
            ..Default::default()
        }));

        let spec = WorkloadSpec {
            project_id: "shop".into(),
            environment: "production".into(),
            version: "v2".into(),
            image: "shop:v2".into(),
            replicas: 3,
            scope: Some("region:eu".into()),
        };
        runner.deploy(&spec).await.unwrap();
        runner.remove("v2").await.unwrap();

        assert_eq!(
            read_log(&log),
            vec!["shop production v2 shop:v2 3 [region:eu]", "remove v2"]
        );
    }

    #[tokio::test]
    async fn missing_hook_is_an_error() {
        let runner = CommandRunner::new(hooks(HooksConfig::default()));
        let err = runner.remove("v1").await.unwrap_err();
        assert!(err.to_string().contains("no `remove` hook"), "{err}");
    }

    #[tokio::test]
    async fn failing_hook_reports_stderr() {
        let runner = CommandRunner::new(hooks(HooksConfig {
            remove: Some("echo 'image not found' >&2; exit 3".into()),
            ..Default::default()
        }));
        let err = runner.remove("v1").await.unwrap_err().to_string();
        assert!(err.contains("image not found"), "{err}");
    }

    #[tokio::test]
    async fn balancer_tracks_weights_it_applied() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("traffic.log");
        let balancer = CommandBalancer::new(
            hooks(HooksConfig {
                traffic: log_to(&log, "{version}={percent}"),
                ..Default::default()
            }),
            Some("v1"),
        );

        balancer.set_traffic_weight("v2", 25).await.unwrap();
        let dist = balancer.get_traffic_distribution().await.unwrap();
        assert_eq!(dist["v2"], 25);
        assert_eq!(dist["v1"], 75);

        // No switch hook: the cutover is two weight changes.
        balancer.switch_traffic("v1", "v2").await.unwrap();
        let dist = balancer.get_traffic_distribution().await.unwrap();
        assert_eq!(dist.get("v2"), Some(&100));
        assert_eq!(dist.get("v1"), None);

        assert_eq!(read_log(&log), vec!["v2=25", "v2=100", "v1=0"]);
    }

    #[tokio::test]
    async fn failed_traffic_hook_leaves_table_untouched() {
        let balancer = CommandBalancer::new(
            hooks(HooksConfig {
                traffic: Some("exit 1".into()),
                ..Default::default()
            }),
            Some("v1"),
        );
        assert!(balancer.set_traffic_weight("v2", 50).await.is_err());
        let dist = balancer.get_traffic_distribution().await.unwrap();
        assert_eq!(dist.get("v1"), Some(&100));
        assert_eq!(dist.len(), 1);
    }
}
