//! Document sinks
//!
//! A sink stores JSON documents keyed by `_id` in named collections. Writing
//! an existing `_id` replaces the document, which makes the redo after a crash
//! idempotent.

use async_trait::async_trait;
use serde_json::Value;

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemorySink;

/// Key every document is stored under
pub const ID_FIELD: &str = "_id";

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Document is not a JSON object
    #[error("document for '{0}' is not a JSON object")]
    NotAnObject(String),

    /// Document has no usable `_id`
    #[error("document for '{0}' has no _id")]
    MissingId(String),

    /// Collection name cannot be used as a file name
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Stored data could not be decoded
    #[error("corrupt collection {collection} at line {line}: {message}")]
    Corrupt {
        /// Collection name
        collection: String,
        /// 1-based line number
        line: usize,
        /// Decoder message
        message: String,
    },

    /// Write rejected (tests inject these)
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Equality filter over dotted field paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches documents whose `field` equals `value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    /// Add another equality condition
    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    /// Whether this filter has no conditions
    pub fn is_all(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, document: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| lookup(document, field) == Some(expected))
    }
}

/// Resolve a dotted path such as `attributes.title.en`
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |node, segment| node.as_object()?.get(segment))
}

/// Extract the `_id` of a document as a string key
pub fn document_id(collection: &str, document: &Value) -> SinkResult<String> {
    let object = document
        .as_object()
        .ok_or_else(|| SinkError::NotAnObject(collection.to_string()))?;
    match object.get(ID_FIELD) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(SinkError::MissingId(collection.to_string())),
    }
}

/// Destination for harvested documents.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Insert or replace a document by `_id`
    async fn write(&self, collection: &str, document: Value) -> SinkResult<()>;

    /// Insert or replace several documents
    async fn write_many(&self, collection: &str, documents: Vec<Value>) -> SinkResult<()> {
        for document in documents {
            self.write(collection, document).await?;
        }
        Ok(())
    }

    /// Whether any document matches
    async fn exists(&self, collection: &str, filter: &Filter) -> SinkResult<bool> {
        Ok(self.count(collection, filter).await? > 0)
    }

    /// Number of matching documents
    async fn count(&self, collection: &str, filter: &Filter) -> SinkResult<u64>;
}
