//! proxy-reconciler
//!
//! # Architecture Overview
//!
//! ```text
//!   gitlab.rb ──▶ config::parser ──▶ ServiceConfig ──▶ reconcile::Reconciler
//!                                                       │  validate (tls)
//!                                                       │  diff (snapshot)
//!                                                       ▼
//!                      applied.json ◀── commit ◀── proxy::NginxControl
//!                                                  (site files, hup/restart)
//! ```
//!
//! `run` keeps going: file watcher, SIGHUP and retries feed the same
//! reconciler until SIGINT/SIGTERM.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use proxy_reconciler::config::loader::{load_service_config, load_settings};
use proxy_reconciler::config::{render, validate_config, ReconcilerSettings};
use proxy_reconciler::diff::{diff, AppliedSnapshot, AppliedState};
use proxy_reconciler::lifecycle::{Daemon, Shutdown, Signals};
use proxy_reconciler::observability::{logging, metrics};
use proxy_reconciler::proxy::{render_state, NginxControl};
use proxy_reconciler::reconcile::{ReconcileError, Reconciler};

#[derive(Parser)]
#[command(name = "proxy-reconciler")]
#[command(about = "Reconcile GitLab nginx fronts with gitlab.rb", long_about = None)]
struct Cli {
    /// Reconciler settings (TOML). Built-in defaults when omitted.
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a settings file
    Check { file: PathBuf },
    /// Show the operations needed to apply a settings file
    Plan { file: PathBuf },
    /// Apply a settings file once
    Apply { file: PathBuf },
    /// Print the canonical form of a settings file, or its nginx sites
    Render {
        file: PathBuf,
        #[arg(long)]
        nginx: bool,
    },
    /// Watch the configured source file and keep nginx reconciled
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => ReconcilerSettings::default(),
    };

    logging::init_logging(&settings.observability.log_level);

    match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Plan { file } => plan(&file, &settings).await,
        Commands::Apply { file } => apply(&file, &settings).await,
        Commands::Render { file, nginx } => {
            let parsed = load_service_config(&file)?;
            if nginx {
                for site in render_state(&AppliedState::from(&parsed.services)).sites {
                    println!("# {}\n{}", site.file_name, site.contents);
                }
            } else {
                print!("{}", render(&parsed.services));
            }
            Ok(())
        }
        Commands::Run => run(settings).await,
    }
}

fn check(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_service_config(file)?;
    for warning in &parsed.warnings {
        println!("warning: {warning}");
    }
    match validate_config(&parsed.services) {
        Ok(()) => {
            println!("{}: ok", file.display());
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                println!("error: {error}");
            }
            Err(ReconcileError::Validation(errors).into())
        }
    }
}

async fn plan(file: &Path, settings: &ReconcilerSettings) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_service_config(file)?;
    if let Err(errors) = validate_config(&parsed.services) {
        for error in &errors {
            println!("error: {error}");
        }
        return Err(ReconcileError::Validation(errors).into());
    }

    let applied = AppliedSnapshot::load(&settings.source.state_path).await?;
    let plan = diff(&applied, &parsed.services);
    if plan.is_empty() {
        println!("No changes (version {}).", plan.base_version);
        return Ok(());
    }
    println!("{} operation(s) against version {}:", plan.len(), plan.base_version);
    for (idx, operation) in plan.iter().enumerate() {
        println!("  {:>2}. {}", idx + 1, operation);
    }
    Ok(())
}

async fn build_reconciler(
    settings: &ReconcilerSettings,
) -> Result<Reconciler<NginxControl>, Box<dyn std::error::Error>> {
    let snapshot = AppliedSnapshot::load(&settings.source.state_path).await?;
    tracing::info!(
        version = snapshot.version,
        state_path = %settings.source.state_path.display(),
        "Applied snapshot loaded"
    );
    Ok(Reconciler::new(
        NginxControl::new(&settings.nginx),
        snapshot,
        Duration::from_secs(settings.timeouts.operation_secs),
    )
    .with_state_path(&settings.source.state_path))
}

async fn apply(file: &Path, settings: &ReconcilerSettings) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_service_config(file)?;
    let reconciler = build_reconciler(settings).await?;

    match reconciler.reconcile(parsed.services).await {
        Ok(report) if report.applied.is_empty() => {
            println!("No changes (version {}).", report.version);
            Ok(())
        }
        Ok(report) => {
            for operation in &report.applied {
                println!("applied {operation}");
            }
            println!("Committed version {}.", report.version);
            Ok(())
        }
        Err(ReconcileError::Validation(errors)) => {
            for error in &errors {
                println!("error: {error}");
            }
            Err(ReconcileError::Validation(errors).into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(settings: ReconcilerSettings) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        source = %settings.source.path.display(),
        sites_dir = %settings.nginx.sites_dir.display(),
        watch = settings.source.watch,
        "proxy-reconciler starting"
    );

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let reconciler = Arc::new(build_reconciler(&settings).await?);
    let daemon = Daemon::new(reconciler, &settings);
    let shutdown = Arc::new(Shutdown::new());

    let signals = Signals::install()?;
    tokio::spawn(signals.forward(shutdown.clone(), daemon.requester()));

    daemon.run(shutdown.subscribe()).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
