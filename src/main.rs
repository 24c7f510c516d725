//! Main entry point for the manga-harvester CLI

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use manga_harvester::cli::{Cli, Commands};
use manga_harvester::shutdown::{self, ShutdownCoordinator};

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("manga_harvester=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        match manga_harvester::metrics::init_metrics(addr) {
            Ok(()) => info!("Prometheus metrics available at http://{}/metrics", addr),
            Err(e) => {
                error!("Failed to start metrics exporter: {}", e);
                std::process::exit(1);
            }
        }
    }

    // Install global shutdown coordinator and Ctrl+C handler
    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::spawn_ctrl_c_listener(shutdown.clone());

    let result = match cli.command {
        Commands::Run(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map_err(anyhow::Error::from),
        Commands::Status(ref args) => args.execute(&cli).await.map_err(anyhow::Error::from),
        Commands::Reset(ref args) => args.execute(&cli).await.map_err(anyhow::Error::from),
        Commands::Export(ref args) => args.execute(&cli).await.map_err(anyhow::Error::from),
        Commands::Sources(ref args) => args
            .execute(cli.output_format)
            .await
            .map_err(anyhow::Error::from),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
