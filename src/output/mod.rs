//! Data output writers

use serde_json::Value;

pub mod csv;

pub use self::csv::{export_documents, flatten_document, table_headers, CsvTableWriter};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Document cannot be flattened into a row
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Generic output writer trait
pub trait OutputWriter {
    /// Flush any buffered data to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Close the writer and finalize output
    fn close(self) -> OutputResult<()>;
}

/// Trait for writing sink documents as table rows
pub trait DocumentWriter: OutputWriter {
    /// Write a single document to output
    fn write_document(&mut self, document: &Value) -> OutputResult<()>;

    /// Write multiple documents at once
    fn write_documents(&mut self, documents: &[Value]) -> OutputResult<()> {
        for document in documents {
            self.write_document(document)?;
        }
        Ok(())
    }
}
