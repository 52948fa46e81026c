use anyhow::Context as _;
use tokio::sync::watch;
use tracing::info;

use deckhand_rollback::{MonitorOutcome, MonitorSupervisor, RollbackTrigger};

use super::{Context, print_json, print_result};

/// Monitor a recorded deployment in the foreground. Ctrl-C cancels.
pub async fn watch(ctx: &Context, deployment_id: &str, format: &str) -> anyhow::Result<()> {
    let record = ctx
        .history()
        .get(deployment_id)?
        .with_context(|| format!("deployment {deployment_id} not found"))?;
    let manager = ctx.rollback_manager(&record.project_id, &record.environment)?;
    let trigger = ctx.config.trigger()?;

    info!(
        deployment = %deployment_id,
        version = %record.version,
        checks = trigger.checks(),
        "watching deployment"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = manager.monitor_and_auto_rollback(deployment_id, &trigger, shutdown_rx);
    tokio::pin!(monitor);

    let outcome = tokio::select! {
        outcome = &mut monitor => outcome?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping monitor");
            let _ = shutdown_tx.send(true);
            monitor.await?
        }
    };
    report(&outcome, format)
}

/// Start a supervised monitor for a fresh deployment and wait for it.
pub async fn supervise(
    supervisor: &MonitorSupervisor,
    deployment_id: &str,
    trigger: RollbackTrigger,
    format: &str,
) -> anyhow::Result<()> {
    supervisor.start(deployment_id, trigger).await;

    let result = tokio::select! {
        result = supervisor.wait(deployment_id) => result,
        _ = tokio::signal::ctrl_c() => {
            supervisor.stop(deployment_id).await;
            supervisor.outcome(deployment_id).await
        }
    };
    match result {
        Some(Ok(outcome)) => report(&outcome, format),
        Some(Err(e)) => anyhow::bail!("monitor failed: {e}"),
        None => Ok(()),
    }
}

fn report(outcome: &MonitorOutcome, format: &str) -> anyhow::Result<()> {
    if format == "json" {
        return print_json(outcome);
    }
    match outcome {
        MonitorOutcome::WindowElapsed { checks } => {
            println!("✓ Healthy for the whole window ({checks} checks)");
        }
        MonitorOutcome::Cancelled => println!("Monitoring cancelled"),
        MonitorOutcome::RolledBack {
            reason,
            rollback_id,
            result,
        } => {
            println!("✗ Rolled back ({reason})");
            println!("  rollback deployment: {rollback_id}");
            print_result(result);
        }
        MonitorOutcome::RollbackFailed { reason, error } => {
            anyhow::bail!("threshold breached ({reason}) and rollback failed: {error}");
        }
    }
    Ok(())
}
