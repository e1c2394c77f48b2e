//! tenantctl — deploys and operates one tenant's services on a host.
//!
//! # Usage
//!
//! ```text
//! tenantctl --config /etc/tenantgrid/tenantgrid.toml deploy acme.toml
//! tenantctl rollback
//! tenantctl status --format json
//! ```
//!
//! Exit codes: 0 succeeded, 2 partial failure, 3 failed, 1 for
//! operational errors.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod context;

#[derive(Parser)]
#[command(
    name = "tenantctl",
    about = "TenantGrid — tenant-driven deployment orchestrator",
    version,
    propagate_version = true
)]
struct Cli {
    /// Orchestrator configuration file. Built-in defaults when absent.
    #[arg(long, short, global = true, env = "TENANTGRID_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Output format of command results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a tenant selection.
    ///
    /// Renders the configuration, writes the environment, ensures networks
    /// and starts core, landing and selected services in that order before
    /// verifying health.
    Deploy {
        /// Selection document (.toml or .json).
        selection: PathBuf,
        /// Roll back to the pre-deploy snapshot if the attempt fails.
        #[arg(long)]
        rollback_on_failure: bool,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show how a selection resolves against the rendered topology.
    Resolve {
        selection: PathBuf,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Restore a configuration snapshot (latest restorable when no id).
    Rollback {
        id: Option<String>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Manage configuration snapshots.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Print one sample of unit health, host usage and reachability.
    Status {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Sample status periodically until interrupted.
    Monitor {
        /// Sampling interval, e.g. "30s".
        #[arg(short, long, default_value = "30s")]
        interval: String,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List recorded deployment attempts for a tenant.
    History {
        /// Tenant id. Defaults to the tenant currently deployed.
        #[arg(short, long)]
        tenant: Option<String>,
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Snapshot the current effective configuration.
    Create,
    /// List snapshots, oldest first.
    List {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Delete the oldest snapshots, keeping the newest `keep`.
    Prune {
        #[arg(long)]
        keep: usize,
    },
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,tenantgrid=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log_format) {
        eprintln!("error: failed to initialise logging: {e}");
        return ExitCode::from(1);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let ctx = context::Context::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Deploy {
            selection,
            rollback_on_failure,
            format,
        } => commands::deploy::deploy(&ctx, &selection, rollback_on_failure, format).await,
        Commands::Resolve { selection, format } => {
            commands::deploy::resolve(&ctx, &selection, format).await
        }
        Commands::Rollback { id, format } => {
            commands::rollback::rollback(&ctx, id.as_deref(), format).await
        }
        Commands::Snapshot { action } => match action {
            SnapshotAction::Create => commands::snapshot::create(&ctx),
            SnapshotAction::List { format } => commands::snapshot::list(&ctx, format),
            SnapshotAction::Prune { keep } => commands::snapshot::prune(&ctx, keep),
        },
        Commands::Status { format } => commands::status::status(&ctx, format).await,
        Commands::Monitor { interval, format } => {
            commands::status::monitor(&ctx, &interval, format).await
        }
        Commands::History {
            tenant,
            limit,
            format,
        } => commands::history::history(&ctx, tenant.as_deref(), limit, format),
    }
}
