use chrono::Utc;

use deckhand_rollback::RollbackTrends;

use super::{Context, print_json};

pub fn history(
    ctx: &Context,
    project: &str,
    environment: &str,
    limit: Option<usize>,
    format: &str,
) -> anyhow::Result<()> {
    let records = ctx
        .history()
        .list_for(project, environment)?
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .collect::<Vec<_>>();

    if format == "json" {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No deployments for {project}/{environment}");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<11}  {:<11}  {:<20}  {}",
        "ID", "VERSION", "STRATEGY", "STATUS", "DEPLOYED", "BY"
    );
    for record in &records {
        let mut by = record.deployed_by.clone();
        if let Some(from) = &record.rollback_from {
            by.push_str(&format!(" (rollback of {from})"));
        }
        println!(
            "{:<36}  {:<12}  {:<11}  {:<11}  {:<20}  {}",
            record.id,
            record.version,
            record.strategy.as_str(),
            record.status.to_string(),
            record.deployed_at.format("%Y-%m-%d %H:%M:%S"),
            by
        );
        if let Some(reason) = &record.rollback_reason {
            println!("{:<36}  reason: {reason}", "");
        }
    }
    Ok(())
}

pub fn trends(ctx: &Context, project: &str, days: u32, format: &str) -> anyhow::Result<()> {
    let records = ctx.history().list_for_project(project)?;
    let trends = RollbackTrends::summarize(project, days, &records, Utc::now());

    if format == "json" {
        return print_json(&trends);
    }
    println!("Rollback trends for {project} (last {days} days)");
    println!("  Deployments:   {}", trends.total_deployments);
    println!("  Rollbacks:     {}", trends.total_rollbacks);
    println!("  Rollback rate: {:.1}%", trends.rollback_rate * 100.0);
    if !trends.reasons.is_empty() {
        println!("  Reasons:");
        for (reason, count) in &trends.reasons {
            println!("    {count:>4}  {reason}");
        }
    }
    if !trends.by_environment.is_empty() {
        println!("  By environment:");
        for (env, count) in &trends.by_environment {
            println!("    {count:>4}  {env}");
        }
    }
    Ok(())
}
