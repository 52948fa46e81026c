//! deckhand: deployment orchestration from the command line.
//!
//! Deploys versions with one of six strategies, keeps an audit history,
//! rolls back manually or on metric breaches, and manages environments
//! with encrypted secrets.
//!
//! # Usage
//!
//! ```text
//! deckhand env create shop production --type production --var LOG_LEVEL=info
//! deckhand deploy shop production --version v2 --image shop:v2 --strategy canary --watch
//! deckhand rollback shop production
//! deckhand trends shop --days 30
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod hooks;

use commands::Context;
use commands::deploy::DeployArgs;
use commands::env::{CreateRequest, parse_key_value};
use config::Config;

const DEFAULT_CONFIG: &str = "deckhand.toml";

#[derive(Parser)]
#[command(
    name = "deckhand",
    about = "Deployment orchestration: strategies, rollbacks, environments",
    version
)]
struct Cli {
    /// Config file. A missing default file means built-in defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage environments.
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },
    /// Deploy a version with the chosen strategy.
    Deploy(DeployArgs),
    /// Roll back to a specific deployment, or to the last successful one.
    Rollback {
        project: String,
        environment: String,
        /// Deployment id to return to.
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        by: Option<String>,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Deployment history for a project/environment, newest first.
    History {
        project: String,
        environment: String,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Rollback statistics for a project.
    Trends {
        project: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Watch a deployment's metrics and roll back on a breach. Ctrl-C stops.
    Watch {
        deployment_id: String,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Generate a secret encryption key.
    Keygen,
}

#[derive(Subcommand)]
enum EnvAction {
    /// Create an environment.
    Create {
        project: String,
        name: String,
        /// production, staging, development, preview, testing, demo or a custom label.
        #[arg(short = 't', long = "type", default_value = "development")]
        env_type: String,
        #[arg(long = "var", value_parser = parse_key_value)]
        variables: Vec<(String, String)>,
        #[arg(long = "secret", value_parser = parse_key_value)]
        secrets: Vec<(String, String)>,
        #[arg(long = "domain")]
        domains: Vec<String>,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Show one environment. Secrets are masked unless --show-secrets.
    Get {
        id: String,
        #[arg(long)]
        show_secrets: bool,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// List a project's environments.
    List {
        project: String,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Set or remove plain variables.
    UpdateVar {
        id: String,
        #[arg(value_parser = parse_key_value)]
        set: Vec<(String, String)>,
        #[arg(long)]
        unset: Vec<String>,
    },
    /// Store one encrypted secret.
    SetSecret { id: String, name: String, value: String },
    /// Remove one secret.
    UnsetSecret { id: String, name: String },
    /// Delete an environment.
    Delete { id: String },
    /// Take the environment lock.
    Lock {
        id: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Release the environment lock.
    Unlock {
        id: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Copy an environment under a new name.
    Clone {
        source: String,
        name: String,
        #[arg(short = 't', long = "type", default_value = "development")]
        env_type: String,
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Merge variables from one environment into another.
    Promote { source: String, target: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Command::Keygen = cli.command {
        commands::keygen::keygen();
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load(path, true)?,
        None => Config::load(DEFAULT_CONFIG.as_ref(), false)?,
    };
    let ctx = Context::open(config)?;

    match cli.command {
        Command::Env { action } => run_env(&ctx, action),
        Command::Deploy(args) => commands::deploy::deploy(&ctx, args).await,
        Command::Rollback {
            project,
            environment,
            to,
            by,
            format,
        } => {
            commands::rollback::rollback(
                &ctx,
                &project,
                &environment,
                to.as_deref(),
                by.as_deref(),
                &format,
            )
            .await
        }
        Command::History {
            project,
            environment,
            limit,
            format,
        } => commands::history::history(&ctx, &project, &environment, limit, &format),
        Command::Trends { project, days, format } => {
            commands::history::trends(&ctx, &project, days, &format)
        }
        Command::Watch {
            deployment_id,
            format,
        } => commands::watch::watch(&ctx, &deployment_id, &format).await,
        Command::Keygen => Ok(()),
    }
}

fn run_env(ctx: &Context, action: EnvAction) -> anyhow::Result<()> {
    use commands::env;

    match action {
        EnvAction::Create {
            project,
            name,
            env_type,
            variables,
            secrets,
            domains,
            format,
        } => env::create(
            ctx,
            CreateRequest {
                project,
                name,
                env_type,
                variables,
                secrets,
                domains,
            },
            &format,
        ),
        EnvAction::Get {
            id,
            show_secrets,
            format,
        } => env::get(ctx, &id, show_secrets, &format),
        EnvAction::List { project, format } => env::list(ctx, &project, &format),
        EnvAction::UpdateVar { id, set, unset } => env::update_variables(ctx, &id, set, unset),
        EnvAction::SetSecret { id, name, value } => env::set_secret(ctx, &id, &name, &value),
        EnvAction::UnsetSecret { id, name } => env::unset_secret(ctx, &id, &name),
        EnvAction::Delete { id } => env::delete(ctx, &id),
        EnvAction::Lock { id, user } => env::lock(ctx, &id, user.as_deref()),
        EnvAction::Unlock { id, user } => env::unlock(ctx, &id, user.as_deref()),
        EnvAction::Clone {
            source,
            name,
            env_type,
            format,
        } => env::clone(ctx, &source, &name, &env_type, &format),
        EnvAction::Promote { source, target } => env::promote(ctx, &source, &target),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,deckhand=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn env_create_collects_repeated_pairs() {
        let cli = Cli::try_parse_from([
            "deckhand", "env", "create", "shop", "staging", "--type", "staging", "--var", "A=1", "--var",
            "B=2", "--secret", "TOKEN=abc",
        ])
        .unwrap();
        let Command::Env {
            action: EnvAction::Create {
                variables, secrets, env_type, ..
            },
        } = cli.command
        else {
            panic!("expected env create");
        };
        assert_eq!(env_type, "staging");
        let pairs = |v: &[(&str, &str)]| -> Vec<(String, String)> {
            v.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        assert_eq!(variables, pairs(&[("A", "1"), ("B", "2")]));
        assert_eq!(secrets, pairs(&[("TOKEN", "abc")]));
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from(["deckhand", "history", "shop", "production", "--log-json", "-c", "x.toml"])
            .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }
}
