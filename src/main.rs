//! # Tempo — Multi-Tenant Scheduling Server
//!
//! Usage:
//!   tempo serve                  # Start the HTTP API (default port 3030)
//!   tempo serve --port 8080      # Custom port
//!   tempo migrate                # Create or upgrade the database schema
//!   tempo config init            # Write a default config file
//!   tempo config show            # Print the effective config

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tempo_core::TempoConfig;
use tempo_scheduler::{EventStore, ScheduleService, TracingAuditLog, TracingLedger};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tempo", version, about = "📅 Tempo — Multi-Tenant Scheduling Server")]
struct Cli {
    /// Config file (default: ~/.tempo/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
        /// Override database.path
        #[arg(long)]
        db_path: Option<String>,
    },
    /// Create or upgrade the database schema and exit
    Migrate {
        #[arg(long)]
        db_path: Option<String>,
    },
    /// Inspect or initialize the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write the default config if none exists
    Init,
    /// Print the effective config as TOML
    Show,
}

fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(p) => PathBuf::from(shellexpand::tilde(p).to_string()),
        None => TempoConfig::default_path(),
    }
}

fn load_config(path: &std::path::Path) -> Result<TempoConfig> {
    if path.exists() {
        Ok(TempoConfig::load_from(path)?)
    } else {
        tracing::debug!("No config at {}, using defaults", path.display());
        Ok(TempoConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "tempo=debug,tempo_scheduler=debug,tempo_gateway=debug,tower_http=debug"
    } else {
        "tempo=info,tempo_scheduler=info,tempo_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let path = config_path(&cli);
    let mut config = load_config(&path)?;

    match cli.command {
        Command::Serve { port, db_path } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(db_path) = db_path {
                config.database.path = db_path;
            }
            config.validate()?;

            let service = ScheduleService::open(
                config.clone(),
                Arc::new(TracingLedger),
                Arc::new(TracingAuditLog),
            )?;
            let pending = service.flush_effects();
            if pending.sent + pending.failed > 0 {
                tracing::info!(
                    "📬 Delivered {} pending effect(s), {} failed",
                    pending.sent,
                    pending.failed
                );
            }
            tracing::info!(
                "🗄️ Database: {}",
                config.database.resolved_path().display()
            );
            tempo_gateway::start_server(&config.server, Arc::new(service)).await?;
        }
        Command::Migrate { db_path } => {
            if let Some(db_path) = db_path {
                config.database.path = db_path;
            }
            let db = config.database.resolved_path();
            EventStore::open(&db)?;
            println!("✅ Schema is current: {}", db.display());
        }
        Command::Config { action } => match action {
            ConfigAction::Init => {
                if path.exists() {
                    println!("⚠️  Config already exists: {}", path.display());
                } else {
                    TempoConfig::default().save_to(&path)?;
                    println!("✅ Wrote default config: {}", path.display());
                }
            }
            ConfigAction::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },
    }
    Ok(())
}
