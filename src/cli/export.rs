//! Export command: flatten a collection into CSV

use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use super::{Cli, CliError, OutputFormat};
use crate::output::export_documents;

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Collection to export
    #[arg(long)]
    pub collection: String,

    /// Destination CSV file
    #[arg(long)]
    pub output: PathBuf,
}

impl ExportArgs {
    /// Execute the export command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let store = cli.open_store()?;
        let documents = store.documents(&self.collection)?;
        if documents.is_empty() {
            return Err(CliError::InvalidArgument(format!(
                "collection '{}' is empty or missing in {}",
                self.collection,
                store.dir().display()
            )));
        }

        info!(
            collection = %self.collection,
            documents = documents.len(),
            output = %self.output.display(),
            "Exporting collection"
        );
        let rows = export_documents(&documents, &self.output)?;

        match cli.output_format {
            OutputFormat::Json => println!(
                "{}",
                json!({
                    "collection": self.collection,
                    "output": self.output.display().to_string(),
                    "rows": rows,
                })
            ),
            OutputFormat::Human => println!(
                "Exported {rows} rows from {} to {}",
                self.collection,
                self.output.display()
            ),
        }
        Ok(())
    }
}
