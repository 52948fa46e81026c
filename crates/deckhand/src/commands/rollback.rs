use tracing::info;

use super::{Context, current_user, print_json, print_result};

/// Roll a project/environment back to `target`, or to the last successful
/// deployment before the current one.
pub async fn rollback(
    ctx: &Context,
    project: &str,
    environment: &str,
    target: Option<&str>,
    by: Option<&str>,
    format: &str,
) -> anyhow::Result<()> {
    let manager = ctx.rollback_manager(project, environment)?;
    let initiated_by = by.map(str::to_string).unwrap_or_else(current_user);

    let result = match target {
        Some(id) => manager.rollback(project, environment, id, &initiated_by).await?,
        None => {
            manager
                .rollback_to_last_successful(project, environment, &initiated_by)
                .await?
        }
    };
    info!(project, environment, version = %result.version, "rollback complete");

    if format == "json" {
        print_json(&result)
    } else {
        println!("✓ Rolled back {project}/{environment} to {}", result.version);
        print_result(&result);
        Ok(())
    }
}
