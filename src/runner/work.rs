//! Work definitions driven by the runner
//!
//! A [`PhaseWork`] fetches one item (or one chunk of items) and stores the
//! payload; a [`PagedWork`] walks an open-ended listing by cursor. The
//! template implementations cover JSON APIs addressed by URL templates.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::WorkError;
use crate::fetcher::pagination::PaginationHelper;
use crate::fetcher::{FetchAttemptResult, FetchTarget, RateLimitedFetcher, UrlTemplate};
use crate::sink::{lookup, Sink, ID_FIELD};

/// Field used to key array elements when none is configured
pub const DEFAULT_ID_FIELD: &str = "id";

/// Fetch-and-store work for item and chunk phases.
#[async_trait]
pub trait PhaseWork: Send + Sync {
    /// Sink collection the phase writes to
    fn collection(&self) -> &str;

    /// Fetch one item (`ids.len() == 1`) or one chunk
    async fn fetch(&self, ids: &[String]) -> Result<FetchAttemptResult, WorkError>;

    /// Store a successful fetch; returns documents written
    async fn store(
        &self,
        sink: &dyn Sink,
        ids: &[String],
        result: &FetchAttemptResult,
    ) -> Result<u64, WorkError>;
}

/// What a stored page yielded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    /// Documents written
    pub stored: u64,
    /// Cursor of the next page; `None` ends the listing
    pub next_cursor: Option<String>,
}

/// Cursor-driven listing work for page phases.
#[async_trait]
pub trait PagedWork: Send + Sync {
    /// Sink collection the phase writes to
    fn collection(&self) -> &str;

    /// Fetch the page at `cursor` (`None` = first page)
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<FetchAttemptResult, WorkError>;

    /// Store a fetched page and report the next cursor
    async fn store_page(
        &self,
        sink: &dyn Sink,
        cursor: Option<&str>,
        result: &FetchAttemptResult,
    ) -> Result<PageSummary, WorkError>;
}

#[derive(Debug, Clone)]
enum RequestShape {
    PerItem { page_size: Option<usize> },
    Chunked { param: String },
}

/// URL-template work over a JSON API.
///
/// Per item, `{id}` in the template is replaced by the item id and the
/// selected JSON node is stored under that id. Chunked, every id of the chunk
/// is sent as a repeated query parameter and the response is split back into
/// one document per id.
#[derive(Debug, Clone)]
pub struct TemplateWork {
    fetcher: RateLimitedFetcher,
    template: UrlTemplate,
    collection: String,
    result_pointer: String,
    id_field: String,
    shape: RequestShape,
}

impl TemplateWork {
    /// One request per item
    pub fn per_item(
        fetcher: RateLimitedFetcher,
        template: UrlTemplate,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            template,
            collection: collection.into(),
            result_pointer: String::new(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            shape: RequestShape::PerItem { page_size: None },
        }
    }

    /// One request per chunk, ids sent as `param=<id>` pairs
    pub fn chunked(
        fetcher: RateLimitedFetcher,
        template: UrlTemplate,
        collection: impl Into<String>,
        param: impl Into<String>,
    ) -> Self {
        Self {
            shape: RequestShape::Chunked {
                param: param.into(),
            },
            ..Self::per_item(fetcher, template, collection)
        }
    }

    /// JSON pointer selecting the stored node (`/data`, `/statistics`)
    pub fn with_result_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.result_pointer = pointer.into();
        self
    }

    /// Field keying array elements in chunk responses
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Follow offset pagination inside each item (per-item work only)
    pub fn with_pagination(mut self, page_size: usize) -> Self {
        if let RequestShape::PerItem { .. } = self.shape {
            self.shape = RequestShape::PerItem {
                page_size: Some(page_size),
            };
        }
        self
    }

    fn single_id<'a>(&self, ids: &'a [String]) -> Result<&'a str, WorkError> {
        match ids {
            [id] => Ok(id.as_str()),
            _ => Err(WorkError::Payload(format!(
                "per-item work expects one id, got {}",
                ids.len()
            ))),
        }
    }
}

#[async_trait]
impl PhaseWork for TemplateWork {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn fetch(&self, ids: &[String]) -> Result<FetchAttemptResult, WorkError> {
        match &self.shape {
            RequestShape::PerItem { page_size } => {
                let id = self.single_id(ids)?;
                let target = FetchTarget::get(self.template.render(id)).with_label(id);
                match page_size {
                    Some(size) => Ok(PaginationHelper::collect_offset_pages(
                        &self.fetcher,
                        &target,
                        *size,
                        &self.result_pointer,
                    )
                    .await?),
                    None => Ok(self.fetcher.fetch(&target).await?),
                }
            }
            RequestShape::Chunked { param } => {
                let label = match (ids.first(), ids.last()) {
                    (Some(first), Some(last)) => format!("{first}..{last} ({})", ids.len()),
                    _ => "empty chunk".to_string(),
                };
                let target = ids
                    .iter()
                    .fold(FetchTarget::get(self.template.as_str()), |target, id| {
                        target.with_query(param.as_str(), id.as_str())
                    })
                    .with_label(label);
                Ok(self.fetcher.fetch(&target).await?)
            }
        }
    }

    async fn store(
        &self,
        sink: &dyn Sink,
        ids: &[String],
        result: &FetchAttemptResult,
    ) -> Result<u64, WorkError> {
        let payload: Value = result.json()?;

        match &self.shape {
            RequestShape::PerItem { page_size } => {
                let id = self.single_id(ids)?;
                // Paginated payloads are already the collected array
                let node = if page_size.is_some() {
                    payload
                } else {
                    select(payload, &self.result_pointer)?
                };
                sink.write(&self.collection, item_document(id, node)).await?;
                Ok(1)
            }
            RequestShape::Chunked { .. } => {
                let node = select(payload, &self.result_pointer)?;
                let documents = split_chunk(node, ids, &self.id_field)?;
                let written = documents.len() as u64;
                if written < ids.len() as u64 {
                    debug!(
                        requested = ids.len(),
                        returned = written,
                        "Chunk response is missing some ids"
                    );
                }
                sink.write_many(&self.collection, documents).await?;
                Ok(written)
            }
        }
    }
}

/// Offset-paginated listing stored one document per element.
#[derive(Debug, Clone)]
pub struct TemplatePagedWork {
    fetcher: RateLimitedFetcher,
    url: String,
    collection: String,
    result_pointer: String,
    id_field: String,
    page_size: usize,
}

impl TemplatePagedWork {
    /// Listing at `url`, fetched `page_size` elements at a time
    pub fn new(
        fetcher: RateLimitedFetcher,
        url: impl Into<String>,
        collection: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            fetcher,
            url: url.into(),
            collection: collection.into(),
            result_pointer: String::new(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            page_size: page_size.max(1),
        }
    }

    /// JSON pointer to the array inside each page
    pub fn with_result_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.result_pointer = pointer.into();
        self
    }

    /// Field keying each element
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    fn offset(cursor: Option<&str>) -> Result<usize, WorkError> {
        match cursor {
            None => Ok(0),
            Some(raw) => raw
                .parse()
                .map_err(|_| WorkError::Payload(format!("invalid page cursor '{raw}'"))),
        }
    }
}

#[async_trait]
impl PagedWork for TemplatePagedWork {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<FetchAttemptResult, WorkError> {
        let offset = Self::offset(cursor)?;
        let target = FetchTarget::get(self.url.as_str())
            .with_query("limit", self.page_size.to_string())
            .with_query("offset", offset.to_string())
            .with_label(format!("offset {offset}"));
        Ok(self.fetcher.fetch(&target).await?)
    }

    async fn store_page(
        &self,
        sink: &dyn Sink,
        cursor: Option<&str>,
        result: &FetchAttemptResult,
    ) -> Result<PageSummary, WorkError> {
        let offset = Self::offset(cursor)?;
        let payload: Value = result.json()?;
        let items = match payload.pointer(&self.result_pointer) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(WorkError::Payload(format!(
                    "expected an array at '{}'",
                    self.result_pointer
                )))
            }
        };

        let received = items.len();
        let documents: Vec<Value> = items
            .into_iter()
            .filter_map(|element| {
                let doc = element_document(element, &self.id_field);
                if doc.is_none() {
                    warn!(field = %self.id_field, "Listing element without id, skipped");
                }
                doc
            })
            .collect();

        let stored = documents.len() as u64;
        sink.write_many(&self.collection, documents).await?;

        let next_cursor = (received >= self.page_size).then(|| (offset + received).to_string());
        Ok(PageSummary {
            stored,
            next_cursor,
        })
    }
}

fn select(payload: Value, pointer: &str) -> Result<Value, WorkError> {
    if pointer.is_empty() {
        return Ok(payload);
    }
    match payload.pointer(pointer) {
        Some(node) => Ok(node.clone()),
        None => Err(WorkError::Payload(format!("no value at '{pointer}'"))),
    }
}

/// Store a per-item node under the item id
fn item_document(id: &str, node: Value) -> Value {
    let mut document = match node {
        Value::Object(map) => map,
        Value::Array(items) => {
            let mut map = Map::new();
            map.insert("items".to_string(), Value::Array(items));
            map
        }
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    Value::Object(document)
}

/// Split a chunk response into one document per returned id.
///
/// Objects keyed by id (MangaDex statistics) and arrays of elements carrying
/// an id field are both accepted.
fn split_chunk(node: Value, ids: &[String], id_field: &str) -> Result<Vec<Value>, WorkError> {
    match node {
        Value::Object(mut by_id) => Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(id).map(|node| item_document(id, node)))
            .collect()),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|element| element_document(element, id_field))
            .collect()),
        other => Err(WorkError::Payload(format!(
            "chunk response must be an object or array, got {other}"
        ))),
    }
}

fn element_document(element: Value, id_field: &str) -> Option<Value> {
    let id = match lookup(&element, id_field)? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(item_document(&id, element))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_document_wraps_non_objects() {
        assert_eq!(
            item_document("m1", json!({"title": "x"})),
            json!({"_id": "m1", "title": "x"})
        );
        assert_eq!(
            item_document("m1", json!([1, 2])),
            json!({"_id": "m1", "items": [1, 2]})
        );
        assert_eq!(item_document("m1", json!(7)), json!({"_id": "m1", "value": 7}));
    }

    #[test]
    fn test_split_chunk_keyed_object() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let node = json!({"a": {"follows": 1}, "b": {"follows": 2}, "zzz": {}});
        let docs = split_chunk(node, &ids, "id").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1], json!({"_id": "b", "follows": 2}));
    }

    #[test]
    fn test_split_chunk_array() {
        let ids = vec!["1".to_string()];
        let node = json!([{"mal_id": 1, "title": "Berserk"}, {"title": "no id"}]);
        let docs = split_chunk(node, &ids, "mal_id").unwrap();
        assert_eq!(docs, vec![json!({"_id": "1", "mal_id": 1, "title": "Berserk"})]);
    }

    #[test]
    fn test_select_pointer() {
        let payload = json!({"data": {"id": "m1"}});
        assert_eq!(select(payload.clone(), "/data").unwrap(), json!({"id": "m1"}));
        assert_eq!(select(payload.clone(), "").unwrap(), payload);
        assert!(select(payload, "/missing").is_err());
    }

    #[test]
    fn test_page_offset_parsing() {
        assert_eq!(TemplatePagedWork::offset(None).unwrap(), 0);
        assert_eq!(TemplatePagedWork::offset(Some("200")).unwrap(), 200);
        assert!(TemplatePagedWork::offset(Some("abc")).is_err());
    }
}
