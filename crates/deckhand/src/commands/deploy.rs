use anyhow::{Context as _, bail};
use clap::Args;
use tracing::info;

use deckhand_rollback::MonitorSupervisor;
use deckhand_rollout::{CanaryConfig, DeploymentConfig, ProgressiveConfig, RolloutConfig, Strategy};
use deckhand_state::{Environment, StrategyKind};

use super::{Context, current_user, print_json, print_result, watch};
use crate::config::{Config, parse_duration};

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Project id.
    pub project: String,
    /// Environment name within the project.
    pub environment: String,
    #[arg(long)]
    pub version: String,
    #[arg(long)]
    pub image: String,
    /// direct, rolling, blue-green, canary, recreate or progressive.
    #[arg(long, default_value = "rolling")]
    pub strategy: StrategyKind,
    /// Defaults to the environment's minimum replica count.
    #[arg(long)]
    pub replicas: Option<u32>,
    /// Health endpoint probed after deploy steps. Omit to skip health checks.
    #[arg(long)]
    pub health_url: Option<String>,
    /// Health probe timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub health_timeout: u64,

    // ── rolling ──
    #[arg(long, default_value_t = 1)]
    pub batch_size: u32,
    /// Wait between batches (e.g. "30s"). Defaults to rollout.rolling_delay.
    #[arg(long)]
    pub batch_interval: Option<String>,
    /// Leave a failed batch in place instead of removing it.
    #[arg(long)]
    pub no_auto_rollback: bool,

    // ── canary ──
    /// Traffic schedule in percent, e.g. "10,25,50,100".
    #[arg(long, value_delimiter = ',')]
    pub canary_weights: Vec<u32>,
    #[arg(long, default_value = "5m")]
    pub canary_step: String,
    /// Error rate (fraction) that fails a canary step.
    #[arg(long, default_value_t = 0.05)]
    pub canary_threshold: f64,

    // ── progressive ──
    #[arg(long, value_delimiter = ',')]
    pub segments: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Recorded as the deployer. Defaults to the current user.
    #[arg(long)]
    pub by: Option<String>,
    /// Monitor the deployment afterwards and roll back on a breach.
    #[arg(long)]
    pub watch: bool,
    /// Output format: text or json.
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

/// Assemble the executor request from CLI arguments and the target environment.
pub fn build_config(args: &DeployArgs, env: &Environment, config: &Config) -> anyhow::Result<DeploymentConfig> {
    let rollout = RolloutConfig {
        batch_size: args.batch_size,
        batch_interval_secs: match &args.batch_interval {
            Some(s) => parse_duration(s).with_context(|| format!("invalid --batch-interval {s:?}"))?,
            None => config.rollout.rolling_delay()?,
        }
        .as_secs(),
        auto_rollback: !args.no_auto_rollback,
    };

    let mut canary = CanaryConfig {
        step_duration_secs: parse_duration(&args.canary_step)
            .with_context(|| format!("invalid --canary-step {:?}", args.canary_step))?
            .as_secs(),
        failure_threshold: args.canary_threshold,
        ..Default::default()
    };
    if let Some((first, rest)) = args.canary_weights.split_first() {
        canary.initial_weight = *first;
        canary.increments = rest.to_vec();
    }

    let progressive = (!args.segments.is_empty() || !args.regions.is_empty()).then(|| ProgressiveConfig {
        user_segments: args.segments.clone(),
        regions: args.regions.clone(),
    });

    let strategy = Strategy::from_parts(args.strategy, Some(rollout), Some(canary), progressive)?;

    let replicas = args
        .replicas
        .or_else(|| env.resources.as_ref().map(|r| r.min_replicas))
        .unwrap_or(1)
        .max(1);

    let mut request = DeploymentConfig::new(&args.project, &args.environment, &args.version, &args.image)
        .with_strategy(strategy)
        .with_replicas(replicas);
    if let Some(url) = &args.health_url {
        request = request.with_health_check(url, args.health_timeout);
    }
    request.deployed_by = args.by.clone().unwrap_or_else(current_user);
    Ok(request)
}

pub async fn deploy(ctx: &Context, args: DeployArgs) -> anyhow::Result<()> {
    let env = ctx
        .environment_store()
        .list_environments()?
        .into_iter()
        .find(|e| e.project_id == args.project && e.name == args.environment)
        .with_context(|| {
            format!(
                "environment {} not found in project {} (create it with `deckhand env create`)",
                args.environment, args.project
            )
        })?;
    if env.locked {
        bail!("environment {} is locked by {}", env.name, env.lock_holder());
    }

    let request = build_config(&args, &env, &ctx.config)?;
    let needs_metrics = matches!(request.strategy.kind(), StrategyKind::BlueGreen | StrategyKind::Canary);
    if ctx.config.monitor.metrics_url.is_none() {
        if needs_metrics {
            bail!("{} deployments need monitor.metrics_url", request.strategy.kind());
        }
        if args.watch {
            bail!("--watch needs monitor.metrics_url");
        }
    }

    let executor = ctx.executor(&args.project, &args.environment)?;
    let (result, failure) = match executor.execute(&request).await {
        Ok(result) => (result, None),
        Err(e) if e.result().is_none() => return Err(e.into()),
        Err(e) => {
            let message = e.to_string();
            match e.into_result() {
                Some(result) => (result, Some(message)),
                None => bail!(message),
            }
        }
    };

    let record = result.to_record(&request);
    ctx.history().append(&record)?;
    info!(deployment = %record.id, status = %record.status, "deployment recorded");

    if args.format == "json" {
        print_json(&record)?;
    } else {
        println!("Deployment {}", record.id);
        print_result(&result);
    }

    if let Some(message) = failure {
        bail!(message);
    }

    if args.watch {
        let supervisor = MonitorSupervisor::new(ctx.rollback_manager(&args.project, &args.environment)?);
        let trigger = ctx.config.trigger()?;
        if args.format != "json" {
            println!("Watching {} for {:?}…", record.version, trigger.monitoring_window);
        }
        watch::supervise(&supervisor, &record.id, trigger, &args.format).await?;
    }
    Ok(())
}
