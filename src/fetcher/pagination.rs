//! Offset pagination inside a single work item
//!
//! Some items are larger than one response (a manga's chapter feed, a user's
//! review list). The helper repeats the item's target with `offset`/`limit`
//! parameters until an empty page comes back, then hands the caller one
//! combined payload, so the runner still sees a single fetch per item.
//!
//! Safety mechanisms:
//! - Maximum iteration limit to prevent infinite loops
//! - Empty page detection
//! - A failed page fails the whole item

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use super::http::RateLimitedFetcher;
use super::target::FetchTarget;
use super::{FetchAttemptResult, FetcherError, FetcherResult};

/// Maximum number of pages fetched for one item
pub const MAX_ITERATIONS: usize = 10_000;

/// Default page size for offset pagination
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Pagination helper
pub struct PaginationHelper;

impl PaginationHelper {
    /// Fetch every page of an offset-paginated listing.
    ///
    /// # Arguments
    /// * `fetcher` - Fetcher bound to the listing's host
    /// * `target` - Target for the first page, without offset/limit
    /// * `page_size` - Value sent as `limit`
    /// * `items_pointer` - JSON pointer to the array inside each page
    ///   (`/data` for MangaDex); empty when the page is the array itself
    ///
    /// # Returns
    /// A successful result whose payload is a JSON array of every collected
    /// element, or the failed page's result with retries summed across pages.
    ///
    /// # Errors
    /// Returns error on a malformed target, an undecodable page, or when
    /// [`MAX_ITERATIONS`] is exceeded.
    pub async fn collect_offset_pages(
        fetcher: &RateLimitedFetcher,
        target: &FetchTarget,
        page_size: usize,
        items_pointer: &str,
    ) -> FetcherResult<FetchAttemptResult> {
        let page_size = page_size.max(1);
        let mut collected: Vec<Value> = Vec::new();
        let mut retries_used = 0u32;
        let mut last_status = 200u16;
        let mut offset = 0usize;

        for iteration in 0..MAX_ITERATIONS {
            let page_target = target
                .clone()
                .with_query("limit", page_size.to_string())
                .with_query("offset", offset.to_string());

            debug!(
                label = %target.label(),
                page = iteration + 1,
                offset = offset,
                "Fetching page"
            );

            let mut result = fetcher.fetch(&page_target).await?;
            retries_used += result.retries_used;

            if !result.succeeded {
                result.retries_used = retries_used;
                return Ok(result);
            }
            if let Some(status) = result.status_code {
                last_status = status;
            }

            let page: Value = result.json()?;
            let items = extract_items(page, items_pointer)?;

            if items.is_empty() {
                debug!(
                    label = %target.label(),
                    pages = iteration,
                    items = collected.len(),
                    "Pagination complete"
                );
                let payload = serde_json::to_vec(&collected)
                    .map_err(|e| FetcherError::ParseError(e.to_string()))?;
                return Ok(FetchAttemptResult::success(
                    last_status,
                    retries_used,
                    Bytes::from(payload),
                ));
            }

            offset += items.len();
            collected.extend(items);
        }

        Err(FetcherError::PaginationLimit(MAX_ITERATIONS))
    }
}

fn extract_items(page: Value, pointer: &str) -> FetcherResult<Vec<Value>> {
    let node = if pointer.is_empty() {
        page
    } else {
        match page.pointer(pointer) {
            Some(node) => node.clone(),
            // A page without the listing key is treated as the end
            None => return Ok(Vec::new()),
        }
    };

    match node {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(FetcherError::ParseError(format!(
            "expected an array at '{pointer}', got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
