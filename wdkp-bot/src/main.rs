//! wdkp-bot - DKP standings bot
//!
//! Drives the WDKP library end to end: uploads of addon dumps and standings
//! queries, with tenant stores swapped to snapshot files when more tenants
//! are active than fit in memory.
//!
//! `run` (the default) reads one request per line from stdin until end of
//! input or a shutdown signal, then flushes every resident tenant.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wdkp_bot::{BotService, Request, RequestError, Target};
use wdkp_common::config::{self, BotConfig};
use wdkp_common::{AddonVariant, FsSnapshotStore, Ingestor, ResidencyManager, TenantId};

/// Command-line arguments for wdkp-bot
#[derive(Parser, Debug)]
#[command(name = "wdkp-bot")]
#[command(about = "DKP standings bot over addon SavedVariables dumps")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "WDKP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for tenant snapshots
    #[arg(short, long, env = "WDKP_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Maximum number of tenants held in memory
    #[arg(long)]
    capacity: Option<usize>,

    /// Addon variant of uploaded dumps (monolith or community)
    #[arg(long)]
    variant: Option<AddonVariant>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve requests from stdin (default)
    Run,

    /// Ingest one dump file for a tenant
    Ingest {
        #[arg(long)]
        tenant: u64,

        #[arg(long)]
        file: PathBuf,

        #[arg(long, default_value = "")]
        author: String,

        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Query one tenant's standings
    Query {
        #[arg(long)]
        tenant: u64,

        /// Team id (community dumps)
        #[arg(long)]
        team: Option<String>,

        /// Player, class, `all`, `loot:<text>` or `history:<player>`
        target: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = config::resolve_config_path(cli.config.as_deref());
    // Read before tracing exists; the outcome is logged once it does
    let loaded = config::read_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let found = loaded.is_some();
    let mut bot_config = loaded.unwrap_or_default();
    if let Some(capacity) = cli.capacity {
        bot_config.capacity = capacity;
    }
    if let Some(variant) = cli.variant {
        bot_config.variant = variant;
    }
    bot_config.validate()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| bot_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting wdkp-bot v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if found {
        info!(path = %config_path.display(), "Loaded configuration");
    } else {
        warn!(path = %config_path.display(), "Config file not found, using defaults");
    }

    let service = build_service(&cli, &bot_config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&service).await?,
        Command::Ingest {
            tenant,
            file,
            author,
            comment,
        } => {
            let request = Request::Upload {
                tenant: TenantId(tenant),
                path: file,
                author: Some(author).filter(|a| !a.is_empty()),
                comment,
            };
            print_lines(service.handle(request).await?);
            service.shutdown().await?;
        }
        Command::Query {
            tenant,
            team,
            target,
        } => {
            let target: Target = target.join(" ").parse()?;
            print_lines(service.query(TenantId(tenant), team.as_deref(), &target).await?);
        }
    }

    Ok(())
}

fn build_service(cli: &Cli, bot_config: &BotConfig) -> Result<BotService> {
    let snapshot_dir = config::resolve_snapshot_dir(cli.snapshot_dir.as_deref(), bot_config);
    std::fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("Failed to create {}", snapshot_dir.display()))?;
    info!(
        snapshot_dir = %snapshot_dir.display(),
        capacity = bot_config.capacity,
        variant = ?bot_config.variant,
        "Residency configured"
    );

    let residency = ResidencyManager::new(
        bot_config.capacity()?,
        Arc::new(FsSnapshotStore::new(snapshot_dir)),
    );
    let ingestor = Ingestor::new(bot_config.variant.strategy(), bot_config.ingest_settings());
    Ok(BotService::new(residency, ingestor))
}

/// Request loop over stdin
async fn run(service: &BotService) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            info!("End of input");
            break;
        };
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }

        let request = match line.parse::<Request>() {
            Ok(request) => request,
            Err(RequestError::Empty) => continue,
            Err(e) => {
                println!("error: {}", e);
                continue;
            }
        };
        let tenant = request.tenant();
        match service.handle(request).await {
            Ok(output) => print_lines(output),
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Request failed");
                println!("error: {}", e);
            }
        }
    }

    let saved = service.shutdown().await?;
    info!(saved = saved, "Shutdown complete");
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
