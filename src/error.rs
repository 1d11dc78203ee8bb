//! Error types for tally-rs.

use thiserror::Error;

/// Error returned by a [`CountSource`](crate::source::CountSource) query.
///
/// The synchronizer only logs these; they never abort a tick.
pub type SourceError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur when configuring or starting a tally engine.
///
/// Every variant is a startup failure. Query failures during a tick are
/// isolated per entity and reported through [`TickReport`](crate::sync::TickReport).
#[derive(Debug, Error)]
pub enum TallyError {
    /// A group of the property spec string could not be parsed.
    #[error("invalid property spec group '{group}': {reason}")]
    InvalidPropertySpec { group: String, reason: String },

    /// The tag list is malformed (duplicate or invalid entries).
    #[error("invalid tag list: {0}")]
    InvalidTagList(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Two tracked entities would expose the same metric name and label set.
    #[error("duplicate metric series {0}")]
    DuplicateSeries(String),

    /// The prometheus registry rejected a gauge.
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Result type alias for tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;

impl TallyError {
    pub(crate) fn spec(group: impl Into<String>, reason: impl Into<String>) -> Self {
        TallyError::InvalidPropertySpec {
            group: group.into(),
            reason: reason.into(),
        }
    }
}
