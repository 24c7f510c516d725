//! JSON-lines document store
//!
//! Each collection is an append-only `<dir>/<collection>.jsonl`. Every write
//! appends one line and syncs it before returning; on load the last line for
//! an `_id` wins. A torn final line left by a crash is cut off before the
//! next append.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::{document_id, lookup, Filter, Sink, SinkError, SinkResult};

const EXTENSION: &str = "jsonl";

/// File-backed document store
#[derive(Debug)]
pub struct JsonlStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl JsonlStore {
    /// Open (and create) a store directory
    pub fn open(dir: impl Into<PathBuf>) -> SinkResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SinkError::IoError(format!("Failed to create store dir {}: {e}", dir.display()))
        })?;
        info!(dir = %dir.display(), "Opened document store");
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a collection
    pub fn collection_path(&self, collection: &str) -> SinkResult<PathBuf> {
        validate_collection(collection)?;
        Ok(self.dir.join(format!("{collection}.{EXTENSION}")))
    }

    /// Collections present on disk, sorted
    pub fn collections(&self) -> SinkResult<Vec<String>> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| SinkError::IoError(e.to_string()))?;
        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| SinkError::IoError(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Current documents of a collection in `_id` order
    pub fn documents(&self, collection: &str) -> SinkResult<Vec<Value>> {
        self.with_collection(collection, |docs| docs.values().cloned().collect())
    }

    /// Distinct values of `field` across a collection, as strings.
    ///
    /// Used to build work lists from a previously harvested collection.
    pub fn ids(&self, collection: &str, field: &str) -> SinkResult<Vec<String>> {
        self.with_collection(collection, |docs| {
            let mut seen = std::collections::HashSet::new();
            docs.values()
                .filter_map(|doc| lookup(doc, field))
                .filter_map(|value| match value {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|id| seen.insert(id.clone()))
                .collect()
        })
    }

    fn with_collection<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&BTreeMap<String, Value>) -> T,
    ) -> SinkResult<T> {
        let mut cache = self.lock();
        if !cache.contains_key(collection) {
            let docs = self.load_collection(collection)?;
            cache.insert(collection.to_string(), docs);
        }
        let docs = cache
            .get(collection)
            .ok_or_else(|| SinkError::IoError(format!("collection {collection} not cached")))?;
        Ok(f(docs))
    }

    fn load_collection(&self, collection: &str) -> SinkResult<BTreeMap<String, Value>> {
        let path = self.collection_path(collection)?;
        let mut docs = BTreeMap::new();

        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(docs),
            Err(e) => return Err(SinkError::IoError(e.to_string())),
        };

        // A file ending in '\n' yields an empty final segment
        let segments: Vec<&[u8]> = contents.split(|b| *b == b'\n').collect();
        let last = segments.len();
        let mut offset = 0usize;
        let mut torn_at = None;

        for (index, raw) in segments.into_iter().enumerate() {
            let start = offset;
            offset += raw.len() + 1;
            if raw.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let document: Value = match serde_json::from_slice(raw) {
                Ok(doc) => doc,
                Err(e) if index + 1 == last => {
                    warn!(
                        collection = collection,
                        line = index + 1,
                        error = %e,
                        "Dropping torn final line"
                    );
                    torn_at = Some(start);
                    continue;
                }
                Err(e) => {
                    return Err(SinkError::Corrupt {
                        collection: collection.to_string(),
                        line: index + 1,
                        message: e.to_string(),
                    })
                }
            };
            let id = document_id(collection, &document)?;
            docs.insert(id, document);
        }

        match torn_at {
            Some(start) => repair_tail(&path, TailRepair::Truncate(start as u64))?,
            None if contents.last().is_some_and(|b| *b != b'\n') => {
                repair_tail(&path, TailRepair::Terminate)?
            }
            None => {}
        }

        debug!(collection = collection, documents = docs.len(), "Loaded collection");
        Ok(docs)
    }

    fn append(&self, collection: &str, document: &Value) -> SinkResult<()> {
        let path = self.collection_path(collection)?;
        let mut line = serde_json::to_vec(document)
            .map_err(|e| SinkError::IoError(format!("Failed to encode document: {e}")))?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::IoError(format!("Failed to open {}: {e}", path.display())))?;
        file.write_all(&line)
            .map_err(|e| SinkError::IoError(format!("Failed to append: {e}")))?;
        file.sync_data()
            .map_err(|e| SinkError::IoError(format!("Failed to sync: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Value>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Sink for JsonlStore {
    async fn write(&self, collection: &str, document: Value) -> SinkResult<()> {
        let id = document_id(collection, &document)?;
        // Make sure the cache reflects the file before appending to it
        self.with_collection(collection, |_| ())?;
        self.append(collection, &document)?;
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id, document);
        Ok(())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> SinkResult<u64> {
        self.with_collection(collection, |docs| {
            docs.values().filter(|doc| filter.matches(doc)).count() as u64
        })
    }
}

/// How to fix the end of a collection file before appending to it
enum TailRepair {
    /// Cut a torn final line off at this byte offset
    Truncate(u64),
    /// Terminate a complete final line that lacks its newline
    Terminate,
}

fn repair_tail(path: &Path, repair: TailRepair) -> SinkResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| SinkError::IoError(format!("Failed to open {}: {e}", path.display())))?;
    match repair {
        TailRepair::Truncate(len) => file
            .set_len(len)
            .map_err(|e| SinkError::IoError(format!("Failed to truncate torn line: {e}")))?,
        TailRepair::Terminate => {
            file.seek(SeekFrom::End(0))
                .and_then(|_| file.write_all(b"\n"))
                .map_err(|e| SinkError::IoError(format!("Failed to terminate last line: {e}")))?
        }
    }
    file.sync_data()
        .map_err(|e| SinkError::IoError(format!("Failed to sync: {e}")))?;
    info!(path = %path.display(), "Repaired collection tail");
    Ok(())
}

fn validate_collection(name: &str) -> SinkResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidCollection(name.to_string()))
    }
}
