//! Prometheus metric definitions for tally-rs.
//!
//! # Exposed Gauges
//!
//! Names are stable and match the channel directory's dashboards exactly
//! unless a namespace is configured, in which case they become
//! `{namespace}_{name}`.
//!
//! - `total_channel_count` - Count of all entities
//! - `property_count` - Count of all property definitions
//! - `tag_count` - Count of all tag definitions
//! - `tag_on_channels_count{tag="..."}` - Entities carrying each tracked tag
//! - `channel_count{<property labels>}` - Entities matching each property combination
//!
//! # Synchronizer Health
//!
//! - `{ns}_sync_ticks_total` - Completed synchronizer ticks
//! - `{ns}_sync_query_failures_total` - Failed count queries
//! - `{ns}_sync_last_tick_duration_seconds` - Wall time of the last tick
//! - `{ns}_sync_last_tick_failures` - Failed queries in the last tick
//!
//! `{ns}` is the configured namespace, or `tally` when none is set.
//!
//! # Example
//!
//! ```ignore
//! use prometheus::Registry;
//! use tally_rs::TallyBuilder;
//!
//! let registry = Registry::new();
//! let tally = TallyBuilder::new()
//!     .tags(["archived"])
//!     .properties("area:linac,!*")
//!     .prometheus_registry(registry.clone())
//!     .build(source)?;
//!
//! // Later: expose via HTTP
//! let encoder = prometheus::TextEncoder::new();
//! let text = encoder.encode_to_string(&registry.gather())?;
//! ```

mod prometheus;

pub use self::prometheus::{
    gauge, sanitize_prefix, MetricNames, SyncMetrics, BASE_UNIT, CHANNEL_COUNT, PROPERTY_COUNT,
    TAG_COUNT, TAG_LABEL, TAG_ON_CHANNELS_COUNT, TOTAL_CHANNEL_COUNT,
};
pub(crate) use self::prometheus::{
    HELP_CHANNEL_COUNT, HELP_PROPERTY_COUNT, HELP_TAG_COUNT, HELP_TAG_ON_CHANNELS_COUNT,
    HELP_TOTAL_CHANNEL_COUNT,
};
