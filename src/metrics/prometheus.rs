//! Prometheus gauge construction and synchronizer health metrics.
//!
//! Every tracked entity is backed by an [`IntGauge`], which is a shared
//! `AtomicI64`. The synchronizer stores into it; a scrape loads from it.
//! Neither side takes a lock and a scrape never reaches the count source.
//!
//! | Operation | Cost |
//! |-----------|------|
//! | Tick update | one atomic store per entity |
//! | Scrape read | one atomic load per entity |

use std::collections::HashMap;

use prometheus::core::Collector;
use prometheus::{Gauge, IntCounter, IntGauge, Opts, Registry};

use crate::tag::Tag;

pub const TOTAL_CHANNEL_COUNT: &str = "total_channel_count";
pub const PROPERTY_COUNT: &str = "property_count";
pub const TAG_COUNT: &str = "tag_count";
pub const CHANNEL_COUNT: &str = "channel_count";
pub const TAG_ON_CHANNELS_COUNT: &str = "tag_on_channels_count";

/// Label carrying the tag name on `tag_on_channels_count`.
pub const TAG_LABEL: &str = "tag";

pub const BASE_UNIT: &str = "channels";

pub(crate) const HELP_TOTAL_CHANNEL_COUNT: &str = "Count of all entities";
pub(crate) const HELP_PROPERTY_COUNT: &str = "Count of all properties";
pub(crate) const HELP_TAG_COUNT: &str = "Count of all tags";
pub(crate) const HELP_CHANNEL_COUNT: &str = "Count of entities with set properties";
pub(crate) const HELP_TAG_ON_CHANNELS_COUNT: &str = "Number of entities with tag";

const DEFAULT_HEALTH_PREFIX: &str = "tally";

/// Sanitize a prefix to be a valid Prometheus metric name fragment.
///
/// Valid chars: `[a-zA-Z_:]` for the first char, `[a-zA-Z0-9_:]` for the
/// rest. Anything else becomes `_`.
///
/// ```
/// use tally_rs::metrics::sanitize_prefix;
///
/// assert_eq!(sanitize_prefix("my-app"), "my_app");
/// assert_eq!(sanitize_prefix("1cf"), "_cf");
/// ```
pub fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                if c.is_ascii_alphabetic() || c == '_' || c == ':' {
                    c
                } else {
                    '_'
                }
            } else if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolves exposed metric names against an optional namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricNames {
    namespace: Option<String>,
}

impl MetricNames {
    /// Blank namespaces are treated as none.
    pub fn new(namespace: Option<&str>) -> Self {
        Self {
            namespace: namespace
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(sanitize_prefix),
        }
    }

    /// Fully qualified name for one of the exposed gauges.
    pub fn name(&self, base: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}_{}", ns, base),
            None => base.to_string(),
        }
    }

    /// Prefix for the synchronizer health metrics.
    pub fn health_prefix(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_HEALTH_PREFIX)
    }
}

/// Build a gauge with constant labels.
///
/// # Errors
///
/// Returns an error if the name or a label name is not valid.
pub fn gauge(name: &str, help: &str, labels: &[Tag]) -> Result<IntGauge, prometheus::Error> {
    let const_labels: HashMap<String, String> = labels
        .iter()
        .map(|t| (t.name.clone(), t.value.clone()))
        .collect();
    IntGauge::with_opts(Opts::new(name, help).const_labels(const_labels))
}

/// Health metrics for the synchronizer.
///
/// Always updated; only exposed once registered.
#[derive(Clone)]
pub struct SyncMetrics {
    /// Completed ticks
    pub ticks: IntCounter,

    /// Count queries that failed or timed out
    pub query_failures: IntCounter,

    /// Wall time of the most recent tick
    pub last_tick_duration: Gauge,

    /// Failed queries in the most recent tick
    pub last_tick_failures: IntGauge,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    /// Create metrics with the default prefix "tally".
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_HEALTH_PREFIX)
    }

    /// Create metrics named `{prefix}_sync_*`. The prefix is sanitized.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = sanitize_prefix(prefix);
        Self {
            ticks: IntCounter::with_opts(Opts::new(
                format!("{}_sync_ticks_total", prefix),
                "Completed synchronizer ticks",
            ))
            .expect("metric creation should not fail"),

            query_failures: IntCounter::with_opts(Opts::new(
                format!("{}_sync_query_failures_total", prefix),
                "Count queries that failed during a tick",
            ))
            .expect("metric creation should not fail"),

            last_tick_duration: Gauge::with_opts(Opts::new(
                format!("{}_sync_last_tick_duration_seconds", prefix),
                "Duration of the last synchronizer tick",
            ))
            .expect("metric creation should not fail"),

            last_tick_failures: IntGauge::with_opts(Opts::new(
                format!("{}_sync_last_tick_failures", prefix),
                "Count queries that failed during the last tick",
            ))
            .expect("metric creation should not fail"),
        }
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.ticks.clone()),
            Box::new(self.query_failures.clone()),
            Box::new(self.last_tick_duration.clone()),
            Box::new(self.last_tick_failures.clone()),
        ]
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// Metrics registered before a failure are unregistered again.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        for (i, collector) in self.collectors().into_iter().enumerate() {
            if let Err(e) = registry.register(collector) {
                for registered in self.collectors().into_iter().take(i) {
                    let _ = registry.unregister(registered);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Remove all metrics from `registry`.
    pub fn unregister(&self, registry: &Registry) {
        for collector in self.collectors() {
            let _ = registry.unregister(collector);
        }
    }

    /// Record a finished tick.
    #[inline]
    pub fn record_tick(&self, seconds: f64, failures: u64) {
        self.ticks.inc();
        self.query_failures.inc_by(failures);
        self.last_tick_duration.set(seconds);
        self.last_tick_failures.set(failures as i64);
    }
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics")
            .field("ticks", &self.ticks.get())
            .field("query_failures", &self.query_failures.get())
            .field("last_tick_failures", &self.last_tick_failures.get())
            .finish()
    }
}
