mod commands;
mod config;

use aerofleet_orchestrator::backend::{self, BackendKind};
use aerofleet_orchestrator::shutdown::ShutdownRegistry;
use aerofleet_orchestrator::Arch;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use commands::{
    ClusterCommand, ConfCommand, ConfigCommand, NetworkCommand, TemplateCommand, XdrCommand,
};
use config::{default_config_path, Config};

#[derive(Parser, Debug)]
#[command(name = "aerofleet")]
#[command(about = "Deploy and manage Aerospike clusters", long_about = None)]
struct Args {
    /// Config file (defaults to the user config directory)
    #[arg(long, env = "AEROFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured backend
    #[arg(long, env = "AEROFLEET_BACKEND")]
    backend: Option<BackendKind>,

    /// Override the configured architecture
    #[arg(long)]
    arch: Option<Arch>,

    /// Nodes worked on in parallel, 0 for sequential
    #[arg(long)]
    parallel: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, grow and manage clusters
    #[command(subcommand)]
    Cluster(ClusterCommand),

    /// List and clean up template images
    #[command(subcommand)]
    Template(TemplateCommand),

    /// Wire cross-datacenter replication
    #[command(subcommand)]
    Xdr(XdrCommand),

    /// Repair configuration on running clusters
    #[command(subcommand)]
    Conf(ConfCommand),

    /// Manage backend networks
    #[command(subcommand)]
    Network(NetworkCommand),

    /// Show or change the stored configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut cfg = Config::load(&config_path)?;

    if let Command::Config(cmd) = &args.command {
        return commands::config(cmd, &mut cfg, &config_path);
    }

    if let Some(kind) = args.backend {
        cfg.backend.kind = kind;
    }
    if let Some(arch) = args.arch {
        cfg.backend.arch = Some(arch);
    }
    if let Some(parallel) = args.parallel {
        cfg.parallel_threads = Some(parallel);
    }

    let shutdown = Arc::new(ShutdownRegistry::new());
    let backend = backend::select(&cfg.backend, shutdown.clone())?;
    backend
        .init()
        .await
        .with_context(|| format!("Failed to initialize {} backend", cfg.backend.kind))?;
    info!("Using {} backend", backend.kind());

    let ctx = commands::Context::new(backend, &cfg)?;
    let run = async {
        match &args.command {
            Command::Cluster(cmd) => commands::cluster(&ctx, cmd).await,
            Command::Template(cmd) => commands::template(&ctx, cmd).await,
            Command::Xdr(cmd) => commands::xdr(&ctx, cmd).await,
            Command::Conf(cmd) => commands::conf(&ctx, cmd).await,
            Command::Network(cmd) => commands::network(&ctx, cmd).await,
            Command::Config(_) => Ok(()),
        }
    };

    tokio::select! {
        result = run => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, running {} cleanup handlers", shutdown.len());
            shutdown.run_all().await;
            std::process::exit(130);
        }
    }
}
