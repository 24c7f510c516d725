//! CSV seed-table writer
//!
//! Documents are flattened into one row each: nested objects become dotted
//! columns (`attributes.title.en`), arrays are kept as compact JSON strings,
//! and `null` becomes an empty cell.

use csv::Writer;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

use super::{DocumentWriter, OutputError, OutputResult, OutputWriter};
use crate::sink::ID_FIELD;

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Flatten a document into `column -> cell` pairs.
///
/// A non-object document is stored under a single `value` column.
pub fn flatten_document(document: &Value) -> Map<String, Value> {
    let mut flat = Map::new();
    match document {
        Value::Object(map) => flatten_into(&mut flat, None, map),
        other => {
            flat.insert("value".to_string(), other.clone());
        }
    }
    flat
}

fn flatten_into(flat: &mut Map<String, Value>, prefix: Option<&str>, map: &Map<String, Value>) {
    for (key, value) in map {
        let column = match prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) if !nested.is_empty() => {
                flatten_into(flat, Some(&column), nested);
            }
            other => {
                flat.insert(column, other.clone());
            }
        }
    }
}

/// Union of the flattened columns of `documents`, `_id` first then sorted.
pub fn table_headers(documents: &[Value]) -> Vec<String> {
    let mut columns = BTreeSet::new();
    for document in documents {
        columns.extend(flatten_document(document).into_iter().map(|(k, _)| k));
    }

    let has_id = columns.remove(ID_FIELD);
    let mut headers = Vec::with_capacity(columns.len() + 1);
    if has_id {
        headers.push(ID_FIELD.to_string());
    }
    headers.extend(columns);
    headers
}

fn cell(value: Option<&Value>) -> OutputResult<String> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => serde_json::to_string(other)
            .map_err(|e| OutputError::SerializationError(format!("Failed to encode cell: {e}"))),
    }
}

/// CSV writer with a fixed header row
pub struct CsvTableWriter {
    writer: Writer<BufWriter<File>>,
    headers: Vec<String>,
    rows_written: u64,
}

impl CsvTableWriter {
    /// Create the file (and parent directories) and write the header row
    pub fn new<P: AsRef<Path>>(path: P, headers: Vec<String>) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Creating CSV writer: path={}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
        }

        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {}", e)))?;

        let buf_writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file);
        let mut writer = Writer::from_writer(buf_writer);
        writer
            .write_record(&headers)
            .map_err(|e| OutputError::CsvError(format!("Failed to write headers: {}", e)))?;

        debug!(columns = headers.len(), "CSV header written");
        Ok(Self {
            writer,
            headers,
            rows_written: 0,
        })
    }

    /// Column names in output order
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Get number of rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl DocumentWriter for CsvTableWriter {
    fn write_document(&mut self, document: &Value) -> OutputResult<()> {
        let flat = flatten_document(document);
        let row = self
            .headers
            .iter()
            .map(|column| cell(flat.get(column)))
            .collect::<OutputResult<Vec<String>>>()?;

        self.writer
            .write_record(&row)
            .map_err(|e| OutputError::CsvError(format!("Failed to write row: {}", e)))?;
        self.rows_written += 1;

        // Flush periodically (every 1000 rows)
        if self.rows_written % 1000 == 0 {
            self.flush()?;
            debug!("Progress: {} rows written", self.rows_written);
        }

        Ok(())
    }
}

impl OutputWriter for CsvTableWriter {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))
    }

    fn close(mut self) -> OutputResult<()> {
        self.flush()?;

        let buf_writer = self.writer.into_inner().map_err(|e| {
            OutputError::IoError(format!("Failed to get inner writer: {}", e))
        })?;

        let file = buf_writer.into_inner().map_err(|e| {
            OutputError::IoError(format!("Failed to get file handle: {}", e))
        })?;

        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))?;

        info!("CSV writer closed successfully: {} rows written", self.rows_written);
        Ok(())
    }
}

/// Write `documents` to `path` as one table; returns the row count.
pub fn export_documents<P: AsRef<Path>>(documents: &[Value], path: P) -> OutputResult<u64> {
    let mut writer = CsvTableWriter::new(path, table_headers(documents))?;
    writer.write_documents(documents)?;
    let rows = writer.rows_written();
    writer.close()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_flatten_nested_objects() {
        let flat = flatten_document(&json!({
            "_id": "m1",
            "attributes": {"title": {"en": "Berserk"}, "year": 1989},
            "tags": ["dark", "fantasy"],
            "empty": {},
            "missing": null
        }));

        assert_eq!(flat["attributes.title.en"], json!("Berserk"));
        assert_eq!(flat["attributes.year"], json!(1989));
        assert_eq!(flat["tags"], json!(["dark", "fantasy"]));
        assert_eq!(flat["empty"], json!({}));
        assert!(flat.contains_key("missing"));
    }

    #[test]
    fn test_headers_are_union_with_id_first() {
        let docs = vec![
            json!({"_id": "a", "title": "x"}),
            json!({"_id": "b", "rating": {"bayesian": 8.1}}),
        ];
        assert_eq!(table_headers(&docs), vec!["_id", "rating.bayesian", "title"]);
    }

    #[test]
    fn test_export_writes_header_and_rows() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("out").join("manga.csv");
        let docs = vec![
            json!({"_id": "a", "title": "Berserk", "tags": ["dark"]}),
            json!({"_id": "b", "score": 8.5}),
        ];

        let rows = export_documents(&docs, &output_path).unwrap();
        assert_eq!(rows, 2);

        let mut reader = csv::Reader::from_path(&output_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["_id", "score", "tags", "title"]);

        let records: Vec<_> = reader.records().filter_map(Result::ok).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(2), Some("[\"dark\"]"));
        assert_eq!(records[0].get(1), Some(""));
        assert_eq!(records[1].get(1), Some("8.5"));
    }

    #[test]
    fn test_export_empty_collection_writes_empty_header() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("empty.csv");
        assert_eq!(export_documents(&[], &output_path).unwrap(), 0);
        assert!(output_path.exists());
    }
}
