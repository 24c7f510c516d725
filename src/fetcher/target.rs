//! Request descriptors and URL templates

use reqwest::Url;
use serde_json::Value;

use super::{FetcherError, FetcherResult};

/// Placeholder replaced by a single work item id
pub const ID_PLACEHOLDER: &str = "{id}";

/// HTTP method of a fetch target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request, no body
    Get,
    /// POST request with a JSON body (GraphQL endpoints such as AniList)
    Post,
}

/// Everything needed to issue one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTarget {
    method: HttpMethod,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    label: String,
}

impl FetchTarget {
    /// GET target
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            label: String::new(),
        }
    }

    /// POST target with a JSON body
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Append a query parameter; repeated keys are sent repeatedly (`manga[]=a&manga[]=b`)
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append an extra request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a label used in logs (usually the work item id)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// HTTP method
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Raw URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Query parameters
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Extra headers
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// JSON body for POST targets
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Log label, falling back to the URL
    pub fn label(&self) -> &str {
        if self.label.is_empty() {
            &self.url
        } else {
            &self.label
        }
    }

    /// Parse and validate the target.
    ///
    /// A malformed descriptor is a programming error and is the only case
    /// where fetching returns `Err` instead of a structured result.
    pub fn parsed_url(&self) -> FetcherResult<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| FetcherError::InvalidTarget(format!("{}: {e}", self.url)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetcherError::InvalidTarget(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                self.url
            )));
        }

        if url.host_str().is_none() {
            return Err(FetcherError::InvalidTarget(format!(
                "missing host in {}",
                self.url
            )));
        }

        if self.method == HttpMethod::Get && self.body.is_some() {
            return Err(FetcherError::InvalidTarget(
                "GET targets cannot carry a body".to_string(),
            ));
        }

        Ok(url)
    }

    /// Host used to pick the shared limiter
    pub fn host(&self) -> FetcherResult<String> {
        let url = self.parsed_url()?;
        let host = url.host_str().unwrap_or_default().to_string();
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        })
    }
}

/// URL with an `{id}` placeholder, optionally relative to a source base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
}

impl UrlTemplate {
    /// Build a template; paths starting with `/` are joined onto `base_url`.
    pub fn new(base_url: Option<&str>, template: &str) -> FetcherResult<Self> {
        let template = template.trim();
        if template.is_empty() {
            return Err(FetcherError::InvalidTarget(
                "URL template is empty".to_string(),
            ));
        }

        let full = if template.starts_with('/') {
            let base = base_url.ok_or_else(|| {
                FetcherError::InvalidTarget(format!(
                    "relative template '{template}' needs a source base URL"
                ))
            })?;
            format!("{}{}", base.trim_end_matches('/'), template)
        } else {
            template.to_string()
        };

        Ok(Self { template: full })
    }

    /// Whether the template contains an `{id}` placeholder
    pub fn has_placeholder(&self) -> bool {
        self.template.contains(ID_PLACEHOLDER)
    }

    /// Full template string
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Render the URL for one item, percent-encoding the id
    pub fn render(&self, id: &str) -> String {
        self.template.replace(ID_PLACEHOLDER, &urlencoding::encode(id))
    }
}
