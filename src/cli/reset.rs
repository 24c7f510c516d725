//! Reset command: clear checkpoint progress

use clap::Args;
use tracing::info;

use super::{Cli, CliError};
use crate::resume::{CheckpointStore, ResumeLock};

/// Arguments for the reset command
#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Phase to reset; without it every phase is cleared
    #[arg(long)]
    pub phase: Option<String>,
}

impl ResetArgs {
    /// Execute the reset command
    ///
    /// Takes the checkpoint owner lock, so it fails while a run is active.
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let checkpoint_path = cli.checkpoint_path();
        let _lock = ResumeLock::try_acquire(&checkpoint_path)?;

        let store = cli.checkpoint_store();
        let Some(mut checkpoint) = store.load()? else {
            println!("No checkpoint at {}, nothing to reset", store.describe());
            return Ok(());
        };

        match &self.phase {
            Some(phase) => {
                if !checkpoint.reset_phase(phase) {
                    return Err(CliError::InvalidArgument(format!(
                        "phase '{phase}' not found in checkpoint"
                    )));
                }
                info!(phase = %phase, "Phase reset");
                println!("Reset phase {phase}");
            }
            None => {
                let phases = checkpoint.phases().len();
                checkpoint.clear();
                info!(phases = phases, "Checkpoint cleared");
                println!("Cleared {phases} phase(s)");
            }
        }

        store.save(&checkpoint)?;
        Ok(())
    }
}
