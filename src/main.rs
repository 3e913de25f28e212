use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(
    name = "poolbroker",
    version,
    about = "Federated instance pool aggregator with exclusive leasing",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); falls back to POOLBROKER_LOG_FORMAT
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// TOML configuration file (environment variables when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the bind address
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Run one aggregation cycle and print the snapshot
    Snapshot {
        /// TOML configuration file (environment variables when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the target pool size
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate and print the effective configuration
    CheckConfig {
        /// TOML configuration file (environment variables when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format = cli
        .log_format
        .or_else(|| std::env::var("POOLBROKER_LOG_FORMAT").ok())
        .unwrap_or_else(|| "text".to_string());
    setup_tracing(&log_format, cli.verbose)?;

    match cli.command {
        Commands::Serve { config, bind } => {
            tracing::info!(config = ?config, bind = ?bind, "Starting serve command");
            commands::serve(config.as_deref(), bind).await?;
        }

        Commands::Snapshot {
            config,
            limit,
            json,
        } => {
            tracing::info!(config = ?config, limit = ?limit, json, "Starting snapshot command");
            commands::snapshot(config.as_deref(), limit, json).await?;
        }

        Commands::CheckConfig { config } => {
            commands::check_config(config.as_deref())?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("poolbroker=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("poolbroker=info,warn"))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
