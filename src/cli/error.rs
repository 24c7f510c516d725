//! CLI error types and conversions

use crate::fetcher::FetcherError;
use crate::output::OutputError;
use crate::registry::RegistryError;
use crate::resume::ResumeError;
use crate::runner::RunnerError;
use crate::sink::SinkError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Registry error
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Runner error
    #[error("runner error: {0}")]
    RunnerError(#[from] RunnerError),

    /// Sink error
    #[error("store error: {0}")]
    SinkError(#[from] SinkError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Page phase stopped on a failed page
    #[error("phase '{0}' stalled on a failed page; rerun to resume")]
    PhaseStalled(String),
}
