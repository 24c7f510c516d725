//! CLI command for listing built-in source profiles

use crate::registry::{SourceProfile, SourceRegistry};
use clap::Args;
use serde_json::json;

use super::{CliError, OutputFormat};

/// Sources subcommand
#[derive(Debug, Args)]
pub struct SourcesCommand {
    /// Only show this source
    pub name: Option<String>,
}

impl SourcesCommand {
    /// Execute the sources command
    pub async fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let registry = SourceRegistry::load_embedded()?;

        let profiles: Vec<&SourceProfile> = match &self.name {
            Some(name) => vec![registry.get(name)?],
            None => registry.profiles().collect(),
        };

        match format {
            OutputFormat::Json => {
                let listing: Vec<_> = profiles.iter().map(|p| profile_json(p)).collect();
                let rendered = serde_json::to_string_pretty(&listing).map_err(|e| {
                    CliError::InvalidArgument(format!("Failed to serialize sources: {e}"))
                })?;
                println!("{rendered}");
            }
            OutputFormat::Human => {
                println!("Found {} sources:\n", profiles.len());
                for profile in profiles {
                    println!("{}", profile_line(profile));
                }
            }
        }

        Ok(())
    }
}

fn profile_json(profile: &SourceProfile) -> serde_json::Value {
    json!({
        "name": profile.name(),
        "base_url": profile.base_url(),
        "description": profile.description(),
        "min_delay_ms": profile.min_delay().as_millis() as u64,
        "max_delay_ms": profile.max_delay().map(|d| d.as_millis() as u64),
        "max_retries": profile.max_retries(),
        "burst_threshold": profile.burst_threshold(),
        "block_markers": profile.block_markers(),
    })
}

fn profile_line(profile: &SourceProfile) -> String {
    let max = profile
        .max_delay()
        .map(|d| format!("{}ms", d.as_millis()))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "{:<14} | {} | delay={}ms..{} | retries={} | {}",
        profile.name(),
        profile.base_url(),
        profile.min_delay().as_millis(),
        max,
        profile.max_retries(),
        profile.description()
    )
}
