//! Status command: print checkpoint progress

use chrono::{TimeZone, Utc};
use clap::Args;
use serde_json::json;

use super::{Cli, CliError, OutputFormat};
use crate::resume::{Checkpoint, CheckpointStore};

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show this phase
    #[arg(long)]
    pub phase: Option<String>,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let store = cli.checkpoint_store();
        let Some(checkpoint) = store.load()? else {
            match cli.output_format {
                OutputFormat::Json => println!("{}", json!({"phases": {}})),
                OutputFormat::Human => println!("No checkpoint at {}", store.describe()),
            }
            return Ok(());
        };

        if let Some(phase) = &self.phase {
            if checkpoint.phase(phase).is_none() {
                return Err(CliError::InvalidArgument(format!(
                    "phase '{phase}' not found in checkpoint"
                )));
            }
        }

        match cli.output_format {
            OutputFormat::Json => println!("{}", self.render_json(&checkpoint)),
            OutputFormat::Human => print!("{}", self.render_human(&checkpoint)),
        }
        Ok(())
    }

    fn selected<'a>(
        &'a self,
        checkpoint: &'a Checkpoint,
    ) -> impl Iterator<Item = (&'a String, &'a crate::resume::PhaseProgress)> + 'a {
        checkpoint
            .phases()
            .iter()
            .filter(move |(name, _)| self.phase.as_ref().map_or(true, |p| p == *name))
    }

    fn render_json(&self, checkpoint: &Checkpoint) -> serde_json::Value {
        let phases: serde_json::Map<String, serde_json::Value> = self
            .selected(checkpoint)
            .map(|(name, progress)| {
                (
                    name.clone(),
                    serde_json::to_value(progress).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        json!({
            "schema_version": checkpoint.schema_version(),
            "updated_at": checkpoint.updated_at(),
            "phases": phases,
        })
    }

    fn render_human(&self, checkpoint: &Checkpoint) -> String {
        let mut out = format!(
            "Checkpoint schema {} (updated {})\n",
            checkpoint.schema_version(),
            format_timestamp(checkpoint.updated_at())
        );
        for (name, progress) in self.selected(checkpoint) {
            out.push_str(&format!(
                "{name:<20} {:<12} cursor={:<24} ok={} failed={}",
                progress.status().to_string(),
                progress.last_completed_item().unwrap_or("-"),
                progress.items_succeeded(),
                progress.items_failed(),
            ));
            if let Some(batch) = progress.batch_size_hint() {
                out.push_str(&format!(" batch={batch}"));
            }
            out.push('\n');
        }
        out
    }
}

fn format_timestamp(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> Checkpoint {
        let mut checkpoint = Checkpoint::new();
        checkpoint.phase_mut("manga").start();
        checkpoint.phase_mut("manga").record_success(Some("m-3"), 3);
        checkpoint.phase_mut("statistics").start();
        checkpoint.phase_mut("statistics").set_batch_size_hint(50);
        checkpoint
    }

    #[test]
    fn test_human_output_lists_phases() {
        let args = StatusArgs { phase: None };
        let out = args.render_human(&checkpoint());
        assert!(out.contains("manga"));
        assert!(out.contains("cursor=m-3"));
        assert!(out.contains("batch=50"));
    }

    #[test]
    fn test_json_output_filters_phase() {
        let args = StatusArgs {
            phase: Some("manga".to_string()),
        };
        let value = args.render_json(&checkpoint());
        let phases = value["phases"].as_object().unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases["manga"]["last_completed_item"], "m-3");
    }
}
