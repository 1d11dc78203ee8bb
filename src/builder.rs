//! Builder pattern for constructing tally engines.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;

use crate::config::TallyConfig;
use crate::engine::Tally;
use crate::error::Result;
use crate::source::CountSource;

/// Builder for constructing a [`Tally`].
///
/// Configuration sources are merged in the following order (later sources override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
/// 5. CLI arguments
///
/// # Examples
///
/// ```ignore
/// use tally_rs::TallyBuilder;
///
/// let tally = TallyBuilder::new()
///     .file("tally.toml")
///     .env_prefix("TALLY")
///     .tags(["archived"])
///     .properties("area:linac,ring;type:!*")
///     .build(source)?;
/// ```
pub struct TallyBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
}

impl Default for TallyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TallyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TallyBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .finish()
    }
}

impl TallyBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(TallyConfig::default())),
            prometheus_registry: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    ///
    /// ```ignore
    /// let builder = TallyBuilder::new()
    ///     .file("tally.toml")
    ///     .file("tally.local.toml"); // Overrides values from tally.toml
    /// ```
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            // TOML unless told otherwise
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Environment variables are expected in the format `{PREFIX}_{KEY}`,
    /// e.g., `TALLY_TAGS`, `TALLY_UPDATE_INTERVAL_SECS`. Keys keep their
    /// underscores, so nested keys are not supported.
    ///
    /// ```ignore
    /// // Will read CF_TAGS, CF_PROPERTIES, etc.
    /// let builder = TallyBuilder::new().env_prefix("CF");
    /// ```
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self
            .figment
            .merge(Env::prefixed(&format!("{}_", prefix)));
        self
    }

    /// Set the tags to count.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        self.figment = self.figment.merge(Serialized::default("tags", tags));
        self
    }

    /// Set the property spec string.
    ///
    /// Format: `"key:v1,!v2;other:!*"`. See [`PropertySpec`](crate::PropertySpec).
    pub fn properties(mut self, spec: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("properties", spec.into()));
        self
    }

    /// Set the time between ticks. Sub-second parts are dropped.
    ///
    /// Default is 60 seconds.
    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.figment = self.figment.merge(Serialized::default(
            "update_interval_secs",
            interval.as_secs(),
        ));
        self
    }

    /// Prefix every exposed metric name with `{namespace}_`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("namespace", namespace.into()));
        self
    }

    /// Set how many count queries run at once within a phase.
    ///
    /// Default is 4.
    pub fn query_concurrency(mut self, n: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("query_concurrency", n));
        self
    }

    /// Fail any single count query that runs longer than `timeout`.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.figment = self
            .figment
            .merge(Serialized::default("query_timeout_ms", millis));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    ///
    /// Without a registry the gauges are still kept up to date, they just
    /// cannot be scraped.
    ///
    /// ```ignore
    /// use prometheus::Registry;
    ///
    /// let registry = Registry::new();
    /// let tally = TallyBuilder::new()
    ///     .prometheus_registry(registry.clone())
    ///     .build(source)?;
    ///
    /// // Later: expose via HTTP endpoint
    /// let encoder = prometheus::TextEncoder::new();
    /// let metric_families = registry.gather();
    /// ```
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the `TallyArgs` struct.
    pub fn with_cli_args(mut self, args: &TallyArgs) -> Self {
        if let Some(ref tags) = args.tally_tags {
            self.figment = self
                .figment
                .merge(Serialized::default("tags", tags.clone()));
        }
        if let Some(ref properties) = args.tally_properties {
            self.figment = self
                .figment
                .merge(Serialized::default("properties", properties.clone()));
        }
        if let Some(secs) = args.tally_update_interval_secs {
            self.figment = self
                .figment
                .merge(Serialized::default("update_interval_secs", secs));
        }
        if let Some(ref namespace) = args.tally_namespace {
            self.figment = self
                .figment
                .merge(Serialized::default("namespace", namespace.clone()));
        }
        if let Some(n) = args.tally_query_concurrency {
            self.figment = self
                .figment
                .merge(Serialized::default("query_concurrency", n));
        }
        if let Some(ms) = args.tally_query_timeout_ms {
            self.figment = self
                .figment
                .merge(Serialized::default("query_timeout_ms", ms));
        }
        self
    }

    /// Extract the merged configuration without building an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value has the wrong type.
    pub fn config(self) -> Result<TallyConfig> {
        let mut config: TallyConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry;
        Ok(config)
    }

    /// Build the engine.
    ///
    /// This extracts the configuration, generates every tracked entity and
    /// registers their gauges. No tick has run yet when this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails or a value is out of range
    /// - The property spec or tag list is malformed
    /// - A gauge cannot be created or registered
    pub fn build(self, source: Arc<dyn CountSource>) -> Result<Tally> {
        Tally::from_config(self.config()?, source)
    }
}

/// CLI arguments for tally configuration.
///
/// Use with clap's `Parser` derive macro. These arguments can be applied
/// to a `TallyBuilder` using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use tally_rs::{TallyArgs, TallyBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     tally: TallyArgs,
///     // ... other args
/// }
///
/// let args = MyArgs::parse();
/// let tally = TallyBuilder::new()
///     .with_cli_args(&args.tally)
///     .build(source)?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct TallyArgs {
    /// Tags to count (comma separated)
    #[arg(long)]
    pub tally_tags: Option<String>,

    /// Property spec (e.g., "area:linac,ring;type:!*")
    #[arg(long)]
    pub tally_properties: Option<String>,

    /// Seconds between ticks
    #[arg(long)]
    pub tally_update_interval_secs: Option<u64>,

    /// Metric name prefix
    #[arg(long)]
    pub tally_namespace: Option<String>,

    /// Count queries in flight per phase
    #[arg(long)]
    pub tally_query_concurrency: Option<usize>,

    /// Per-query timeout in milliseconds
    #[arg(long)]
    pub tally_query_timeout_ms: Option<u64>,
}
