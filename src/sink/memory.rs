//! In-memory sink

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{document_id, Filter, Sink, SinkError, SinkResult};

/// Sink that keeps documents in memory and counts writes.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Value>>,
    writes: u64,
    failures_remaining: u32,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Write calls accepted so far, including replacements
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    /// Reject the next `count` writes
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().failures_remaining = count;
    }

    /// Documents of a collection in `_id` order
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a collection
    pub fn drop_collection(&self, collection: &str) {
        self.lock().collections.remove(collection);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&self, collection: &str, document: Value) -> SinkResult<()> {
        let id = document_id(collection, &document)?;
        let mut state = self.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(SinkError::Rejected(format!("{collection}/{id}")));
        }
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, document);
        state.writes += 1;
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> SinkResult<u64> {
        let state = self.lock();
        Ok(state
            .collections
            .get(collection)
            .map(|docs| docs.values().filter(|doc| filter.matches(doc)).count() as u64)
            .unwrap_or(0))
    }
}
