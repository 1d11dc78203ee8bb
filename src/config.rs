//! Configuration types for tally-rs.

use std::time::Duration;

use prometheus::Registry;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, TallyError};
use crate::pattern::{normalize_tags, parse_tag_list, PropertySpec};
use crate::sync::DEFAULT_QUERY_CONCURRENCY;

/// Default seconds between synchronizer ticks.
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

/// Configuration for a tally engine.
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment variables
/// using figment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TallyConfig {
    /// Tag names to count, as a list or a comma separated string
    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,

    /// Property spec, e.g. `"area:linac,ring;type:!*"` (default: empty)
    #[serde(default)]
    pub properties: String,

    /// Seconds between ticks (default: 60)
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Prefix applied to every exposed metric name
    #[serde(default)]
    pub namespace: Option<String>,

    /// Count queries in flight per phase (default: 4)
    #[serde(default = "default_query_concurrency")]
    pub query_concurrency: usize,

    /// Per-query timeout in milliseconds, none to wait indefinitely
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,

    /// Prometheus registry the gauges are registered with.
    /// If None, gauges are still updated but not exposed.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_update_interval_secs() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

fn default_query_concurrency() -> usize {
    DEFAULT_QUERY_CONCURRENCY
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagList {
    List(Vec<String>),
    Joined(String),
}

fn tag_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match TagList::deserialize(deserializer)? {
        TagList::List(tags) => Ok(tags),
        TagList::Joined(joined) => parse_tag_list(&joined).map_err(D::Error::custom),
    }
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            properties: String::new(),
            update_interval_secs: default_update_interval_secs(),
            namespace: None,
            query_concurrency: default_query_concurrency(),
            query_timeout_ms: None,
            prometheus_registry: None,
        }
    }
}

impl TallyConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// Check numeric ranges.
    ///
    /// # Errors
    ///
    /// Returns `TallyError::InvalidConfig` if the update interval or the
    /// query concurrency is zero.
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_secs == 0 {
            return Err(TallyError::InvalidConfig(
                "update_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.query_concurrency == 0 {
            return Err(TallyError::InvalidConfig(
                "query_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse the configured property spec.
    pub fn property_spec(&self) -> Result<PropertySpec> {
        PropertySpec::parse(&self.properties)
    }

    /// Configured tags, trimmed and without blanks.
    ///
    /// # Errors
    ///
    /// Returns `TallyError::InvalidTagList` if a tag is listed twice.
    pub fn tag_list(&self) -> Result<Vec<String>> {
        normalize_tags(&self.tags)
    }
}
