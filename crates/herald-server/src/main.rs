//! # Herald Server
//!
//! Broadcasts application events to WebSocket channels.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! herald
//!
//! # Run with custom config
//! herald --config /path/to/herald.toml
//!
//! # Run with environment variables
//! HERALD_PORT=8080 HERALD_HOST=0.0.0.0 herald
//! ```

use anyhow::Result;
use clap::Parser;
use herald_server::{metrics, run_server, Config};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "herald", version, about)]
struct Args {
    /// Configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose diagnostics.
    #[arg(long)]
    dev: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    config.dev_mode |= args.dev;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // Initialize tracing
    let default_filter = if config.dev_mode {
        "herald=debug,herald_core=debug,herald_server=debug,herald_transport=debug,tower_http=debug"
    } else {
        "herald=info,herald_core=info,herald_server=info,herald_transport=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Herald server on {:?}:{}",
        config.host.to_vec(),
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    run_server(config).await?;

    Ok(())
}
