use anyhow::Context as _;

use deckhand_state::{Environment, EnvironmentType};

use super::{Context, current_user, print_json};

const MASK: &str = "********";

/// Parse `KEY=VALUE`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub struct CreateRequest {
    pub project: String,
    pub name: String,
    pub env_type: String,
    pub variables: Vec<(String, String)>,
    pub secrets: Vec<(String, String)>,
    pub domains: Vec<String>,
}

pub fn create(ctx: &Context, req: CreateRequest, format: &str) -> anyhow::Result<()> {
    let manager = ctx.environments()?;
    let mut env = Environment::new(&req.project, &req.name, EnvironmentType::from(req.env_type));
    env.variables.extend(req.variables);
    env.secrets.extend(req.secrets);
    env.domains = req.domains;

    let created = manager.create_environment(env)?;
    if format == "json" {
        return print_json(&masked(created));
    }
    println!("✓ Created {} environment {} ({})", created.env_type, created.name, created.id);
    Ok(())
}

pub fn get(ctx: &Context, id: &str, show_secrets: bool, format: &str) -> anyhow::Result<()> {
    let env = if show_secrets {
        ctx.environments()?.get_environment(id)?
    } else {
        let stored = ctx
            .environment_store()
            .get_environment(id)?
            .with_context(|| format!("environment not found: {id}"))?;
        masked(stored)
    };

    if format == "json" {
        return print_json(&env);
    }
    print_environment(&env);
    Ok(())
}

/// Listing never decrypts, so it works without the secret key.
pub fn list(ctx: &Context, project: &str, format: &str) -> anyhow::Result<()> {
    let mut envs: Vec<_> = ctx
        .environment_store()
        .list_environments()?
        .into_iter()
        .filter(|e| e.project_id == project)
        .map(masked)
        .collect();
    envs.sort_by(|a, b| a.name.cmp(&b.name));

    if format == "json" {
        return print_json(&envs);
    }
    if envs.is_empty() {
        println!("No environments in project {project}");
        return Ok(());
    }
    println!("{:<36}  {:<16}  {:<12}  {}", "ID", "NAME", "TYPE", "LOCK");
    for env in &envs {
        let lock = if env.locked { env.lock_holder() } else { "-" };
        println!("{:<36}  {:<16}  {:<12}  {}", env.id, env.name, env.env_type.as_str(), lock);
    }
    Ok(())
}

pub fn update_variables(
    ctx: &Context,
    id: &str,
    set: Vec<(String, String)>,
    unset: Vec<String>,
) -> anyhow::Result<()> {
    let manager = ctx.environments()?;
    let mut env = manager.get_environment(id)?;
    for key in &unset {
        env.variables.remove(key);
    }
    let changed = set.len() + unset.len();
    env.variables.extend(set);
    manager.update_environment(env)?;
    println!("✓ Updated {changed} variable(s) on {id}");
    Ok(())
}

pub fn set_secret(ctx: &Context, id: &str, name: &str, value: &str) -> anyhow::Result<()> {
    ctx.environments()?.set_secret(id, name, value)?;
    println!("✓ Secret {name} stored on {id}");
    Ok(())
}

pub fn unset_secret(ctx: &Context, id: &str, name: &str) -> anyhow::Result<()> {
    if ctx.environments()?.delete_secret(id, name)? {
        println!("✓ Secret {name} removed from {id}");
    } else {
        println!("Secret {name} not set on {id}");
    }
    Ok(())
}

pub fn delete(ctx: &Context, id: &str) -> anyhow::Result<()> {
    ctx.environments()?.delete_environment(id)?;
    println!("✓ Deleted environment {id}");
    Ok(())
}

pub fn lock(ctx: &Context, id: &str, user: Option<&str>) -> anyhow::Result<()> {
    let user = user.map(str::to_string).unwrap_or_else(current_user);
    ctx.environments()?.lock_environment(id, &user)?;
    println!("✓ Locked {id} as {user}");
    Ok(())
}

pub fn unlock(ctx: &Context, id: &str, user: Option<&str>) -> anyhow::Result<()> {
    let user = user.map(str::to_string).unwrap_or_else(current_user);
    ctx.environments()?.unlock_environment(id, &user)?;
    println!("✓ Unlocked {id}");
    Ok(())
}

pub fn clone(ctx: &Context, source: &str, name: &str, env_type: &str, format: &str) -> anyhow::Result<()> {
    let cloned = ctx
        .environments()?
        .clone_environment(source, name, EnvironmentType::from(env_type))?;
    if format == "json" {
        return print_json(&masked(cloned));
    }
    println!(
        "✓ Cloned {source} into {} ({}, {} secret(s) copied)",
        cloned.name,
        cloned.id,
        cloned.secrets.len()
    );
    Ok(())
}

pub fn promote(ctx: &Context, source: &str, target: &str) -> anyhow::Result<()> {
    let promoted = ctx.environments()?.promote_environment(source, target)?;
    println!(
        "✓ Promoted variables from {source} into {} ({} variable(s))",
        promoted.name,
        promoted.variables.len()
    );
    Ok(())
}

fn masked(mut env: Environment) -> Environment {
    for value in env.secrets.values_mut() {
        *value = MASK.to_string();
    }
    env
}

fn print_environment(env: &Environment) {
    println!("{} ({})", env.name, env.id);
    println!("  project:  {}", env.project_id);
    println!("  type:     {}", env.env_type);
    if env.locked {
        println!("  locked:   by {}", env.lock_holder());
    }
    if !env.domains.is_empty() {
        println!("  domains:  {}", env.domains.join(", "));
    }
    if let Some(r) = &env.resources {
        println!(
            "  cpu:      {}-{}  memory: {}-{}  replicas: {}-{}",
            r.cpu_min, r.cpu_max, r.memory_min, r.memory_max, r.min_replicas, r.max_replicas
        );
    }
    for (key, value) in &env.variables {
        println!("  var       {key}={value}");
    }
    for (key, value) in &env.secrets {
        println!("  secret    {key}={value}");
    }
}
