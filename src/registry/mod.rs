//! Source registry for known manga sites
//!
//! The registry holds per-site pacing defaults (delay bounds, retry budget,
//! burst threshold) and the markers that identify a block page served with a
//! 2xx status. Profiles are embedded at compile time.

use crate::fetcher::DelayConfig;
use once_cell::sync::Lazy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Embedded registry data
const SOURCES_JSON: &str = include_str!("sources.json");

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<SourceRegistry, RegistryError>> =
    Lazy::new(|| SourceRegistry::from_json(SOURCES_JSON));

/// Registry of known sources
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    schema_version: String,
    last_updated: String,
    profiles: BTreeMap<String, SourceProfile>,
}

impl SourceRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(SOURCES_JSON)
    }

    /// Parse a registry from a JSON string
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let mut profiles = BTreeMap::new();
        for profile in raw.sources {
            profile.validate()?;
            let key = profile.name.to_ascii_lowercase();
            if profiles.insert(key, profile).is_some() {
                return Err(RegistryError::ParseError(
                    "duplicate source name in registry".to_string(),
                ));
            }
        }

        Ok(Self {
            schema_version: raw.schema_version,
            last_updated: raw.last_updated,
            profiles,
        })
    }

    /// Registry format version
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Date the profiles were last reviewed
    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    /// All profiles, sorted by name
    pub fn profiles(&self) -> impl Iterator<Item = &SourceProfile> {
        self.profiles.values()
    }

    /// Look up a profile by name (case-insensitive)
    pub fn get(&self, name: &str) -> Result<&SourceProfile, RegistryError> {
        self.profiles
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Profile whose base URL host matches `host`
    pub fn find_by_host(&self, host: &str) -> Option<&SourceProfile> {
        self.profiles.values().find(|profile| {
            Url::parse(&profile.base_url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(host)))
                .unwrap_or(false)
        })
    }
}

/// Pacing defaults for one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    name: String,
    base_url: String,
    #[serde(default)]
    description: String,
    min_delay_ms: u64,
    #[serde(default)]
    max_delay_ms: Option<u64>,
    max_retries: u32,
    #[serde(default)]
    burst_threshold: u32,
    #[serde(default)]
    block_markers: Vec<String>,
}

impl SourceProfile {
    /// Source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// API or site root used to resolve relative URL templates
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Floor delay between requests
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    /// Delay ceiling, if any
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    /// Retry budget per request
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Successes before burst mode (0 disables it)
    pub fn burst_threshold(&self) -> u32 {
        self.burst_threshold
    }

    /// Body substrings that mark a 2xx response as a block page
    pub fn block_markers(&self) -> &[String] {
        &self.block_markers
    }

    /// Limiter configuration derived from this profile
    pub fn delay_config(&self) -> DelayConfig {
        DelayConfig::default()
            .with_bounds(self.min_delay(), self.max_delay())
            .with_max_retries(self.max_retries)
            .with_burst_threshold(self.burst_threshold)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::ParseError("source with empty name".to_string()));
        }
        Url::parse(&self.base_url).map_err(|e| {
            RegistryError::ParseError(format!("{}: invalid base_url: {e}", self.name))
        })?;
        self.delay_config()
            .validate()
            .map_err(|e| RegistryError::ParseError(format!("{}: {e}", self.name)))
    }
}

/// Raw registry structure for deserialization
#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    last_updated: String,
    sources: Vec<SourceProfile>,
}

/// Errors that can occur when working with the registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Source not found in registry
    #[error("unknown source: {0}")]
    NotFound(String),
}
