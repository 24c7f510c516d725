//! CLI command implementations

pub mod error;
pub mod export;
pub mod reset;
pub mod run;
pub mod sources;
pub mod status;

pub use error::CliError;
pub use export::ExportArgs;
pub use reset::ResetArgs;
pub use run::{RunArgs, RunMode};
pub use sources::SourcesCommand;
pub use status::StatusArgs;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::DelayConfig;
use crate::registry::SourceProfile;
use crate::resume::FileCheckpointStore;
use crate::sink::JsonlStore;

/// Checkpoint file name inside the store directory
pub const DEFAULT_CHECKPOINT_FILE: &str = "progress.json";

/// Manga harvester CLI
#[derive(Parser, Debug)]
#[command(name = "manga-harvester")]
#[command(about = "Rate-limited, resumable harvesting of manga metadata", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Directory holding one JSONL file per collection
    #[arg(long, global = true, env = "HARVEST_STORE_DIR", default_value = "data")]
    pub store_dir: PathBuf,

    /// Checkpoint file (default: <store-dir>/progress.json)
    #[arg(long, global = true, env = "HARVEST_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// Maximum retries per request (overrides the source profile, range: 0-20)
    #[arg(long, global = true, env = "HARVEST_MAX_RETRIES", value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: Option<u32>,

    /// Floor delay between requests in milliseconds
    #[arg(long, global = true, env = "HARVEST_MIN_DELAY_MS")]
    pub min_delay_ms: Option<u64>,

    /// Delay ceiling in milliseconds
    #[arg(long, global = true, env = "HARVEST_MAX_DELAY_MS")]
    pub max_delay_ms: Option<u64>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true, env = "HARVEST_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Resolved checkpoint path
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint
            .clone()
            .unwrap_or_else(|| self.store_dir.join(DEFAULT_CHECKPOINT_FILE))
    }

    /// Checkpoint store at the resolved path
    pub fn checkpoint_store(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(self.checkpoint_path())
    }

    /// Open the JSONL store
    pub fn open_store(&self) -> Result<JsonlStore, CliError> {
        Ok(JsonlStore::open(&self.store_dir)?)
    }

    /// Limiter configuration: profile defaults, then CLI overrides.
    pub fn delay_config(&self, profile: Option<&SourceProfile>) -> Result<DelayConfig, CliError> {
        let mut config = profile.map(|p| p.delay_config()).unwrap_or_default();

        if let Some(retries) = self.max_retries {
            config = config.with_max_retries(retries);
        }
        if let Some(min) = self.min_delay_ms {
            config.min_delay = Duration::from_millis(min);
        }
        if let Some(max) = self.max_delay_ms {
            config.max_delay = Some(Duration::from_millis(max));
        }

        config
            .validate()
            .map_err(CliError::ConfigurationError)?;
        Ok(config)
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) one harvesting phase
    Run(RunArgs),

    /// Show checkpoint progress for every phase
    Status(StatusArgs),

    /// Clear one phase or the whole checkpoint
    Reset(ResetArgs),

    /// Flatten a collection into a CSV table
    Export(ExportArgs),

    /// List the built-in source profiles
    Sources(SourcesCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
