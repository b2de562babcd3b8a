//! Zentinel Mock API - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_mock_api::config::SAMPLE_CONFIG;
use zentinel_mock_api::http::{build_router, serve, AppState};
use zentinel_mock_api::metrics::RequestMetrics;
use zentinel_mock_api::{MockApi, MockApiConfig};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-mock-api",
    about = "Programmable mock API server - stateful resource stubbing and scripted scenarios",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "mock-api.yaml")]
    config: PathBuf,

    /// Listen address, overrides the configuration
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print a sample configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", SAMPLE_CONFIG);
        return Ok(());
    }

    // Load configuration
    let mut config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockApiConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no sections)");
        MockApiConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} sections, {} scenarios defined)",
            config.sections.len(),
            config.scenarios.len()
        );
        return Ok(());
    }

    if let Some(listen) = args.listen {
        config.settings.listen = listen;
    }
    let listen = config.settings.listen;

    let metrics = Arc::new(RequestMetrics::new());
    let api = Arc::new(MockApi::new(config, metrics.clone())?);
    let router = build_router(AppState { api, metrics });

    let listener = tokio::net::TcpListener::bind(listen).await?;
    serve(listener, router).await?;

    Ok(())
}
