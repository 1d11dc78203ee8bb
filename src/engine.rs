//! The tally engine: owns the counter store and drives the synchronizer.
//!
//! Construction does all of the fallible work up front. Parsing, entity
//! generation and gauge registration either succeed completely or leave the
//! registry as it was. Once built, the engine only ever reads from the count
//! source; nothing after startup returns an error.
//!
//! # Examples
//!
//! ```ignore
//! use std::sync::Arc;
//! use tally_rs::{StaticSource, TallyBuilder};
//!
//! let tally = TallyBuilder::new()
//!     .tags(["archived"])
//!     .properties("area:linac,!*")
//!     .build(Arc::new(StaticSource::new()))?;
//!
//! tally.spawn(&tokio::runtime::Handle::current());
//! // ...
//! tally.shutdown();
//! tally.wait().await;
//! ```

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::combination::{generate, Combination};
use crate::config::TallyConfig;
use crate::error::Result;
use crate::metrics::{MetricNames, SyncMetrics};
use crate::pattern::PropertySpec;
use crate::source::CountSource;
use crate::store::{CounterStore, Target};
use crate::sync::{Synchronizer, TickReport};

/// A running set of gauges kept in sync with a [`CountSource`].
///
/// Cheap to clone; clones share the same store and driver.
#[derive(Clone)]
pub struct Tally {
    inner: Arc<TallyInner>,
}

struct TallyInner {
    config: TallyConfig,
    spec: PropertySpec,
    tags: Vec<String>,
    combinations: Vec<Combination>,
    sync: Synchronizer,
    /// Parent of every driver's cancellation token
    shutdown: CancellationToken,
    task_tracker: TaskTracker,
}

impl Tally {
    /// Create an engine from a configuration.
    ///
    /// This is typically called via `TallyBuilder::build()`. Gauges start at
    /// zero; the first tick fills them in.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is out of range, the property
    /// spec or tag list is malformed, two entities would share a series, or
    /// the registry rejects a gauge. Nothing stays registered on error.
    pub fn from_config(config: TallyConfig, source: Arc<dyn CountSource>) -> Result<Self> {
        config.validate()?;
        let spec = config.property_spec()?;
        let tags = config.tag_list()?;
        let combinations = generate(&spec);

        let names = MetricNames::new(config.namespace.as_deref());
        let store = Arc::new(CounterStore::build(&names, &tags, &combinations)?);
        let metrics = SyncMetrics::with_prefix(names.health_prefix());

        if let Some(ref registry) = config.prometheus_registry {
            store.register(registry)?;
            if let Err(e) = metrics.register(registry) {
                store.unregister(registry);
                return Err(e.into());
            }
        }

        info!(
            namespace = names.health_prefix(),
            tags = tags.len(),
            properties = spec.len(),
            combinations = combinations.len(),
            slots = store.len(),
            interval_secs = config.update_interval_secs,
            exposed = config.prometheus_registry.is_some(),
            "building tally engine"
        );

        let sync = Synchronizer::new(store, source)
            .with_concurrency(config.query_concurrency)
            .with_timeout(config.query_timeout())
            .with_metrics(metrics);

        Ok(Self {
            inner: Arc::new(TallyInner {
                config,
                spec,
                tags,
                combinations,
                sync,
                shutdown: CancellationToken::new(),
                task_tracker: TaskTracker::new(),
            }),
        })
    }

    /// Run one tick now.
    ///
    /// Waits for a tick already in progress (e.g. the driver's) to finish first.
    pub async fn tick(&self) -> TickReport {
        self.inner.sync.tick().await
    }

    /// Tick every `update_interval` until `cancel` fires.
    ///
    /// The first tick runs immediately. A tick that overruns the interval
    /// delays the next one rather than piling up behind it. Cancellation
    /// abandons a tick in progress; slots it already refreshed keep their
    /// new values.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.inner.config.update_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = async {
                    interval.tick().await;
                    self.tick().await
                } => {}
            }
        }
        debug!("tally driver stopped");
    }

    /// Spawn the periodic driver onto `handle`.
    ///
    /// The task is tracked: call [`shutdown`](Self::shutdown) then
    /// [`wait`](Self::wait) to stop it.
    pub fn spawn(&self, handle: &Handle) -> JoinHandle<()> {
        let tally = self.clone();
        let cancel = self.inner.shutdown.child_token();
        self.inner
            .task_tracker
            .spawn_on(async move { tally.run(cancel).await }, handle)
    }

    /// Stop every spawned driver and refuse to track new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.task_tracker.close();
    }

    /// Wait for spawned drivers to exit. Requires `shutdown()` first.
    pub async fn wait(&self) {
        self.inner.task_tracker.wait().await;
    }

    /// Whether `shutdown()` was called and every driver has exited.
    pub fn is_idle(&self) -> bool {
        self.inner.task_tracker.is_closed() && self.inner.task_tracker.is_empty()
    }

    /// Remove every gauge this engine registered from its registry.
    pub fn unregister(&self) {
        if let Some(ref registry) = self.inner.config.prometheus_registry {
            self.inner.sync.store().unregister(registry);
            self.inner.sync.metrics().unregister(registry);
        }
    }

    /// Current value for `target`, or `None` if it is not tracked.
    ///
    /// Never touches the count source.
    pub fn value(&self, target: &Target) -> Option<i64> {
        self.inner.sync.store().value(target)
    }

    /// Generated combinations, in gauge order.
    pub fn combinations(&self) -> &[Combination] {
        &self.inner.combinations
    }

    pub fn tags(&self) -> &[String] {
        &self.inner.tags
    }

    pub fn spec(&self) -> &PropertySpec {
        &self.inner.spec
    }

    pub fn config(&self) -> &TallyConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &CounterStore {
        self.inner.sync.store()
    }

    pub fn metrics(&self) -> &SyncMetrics {
        self.inner.sync.metrics()
    }
}

impl std::fmt::Debug for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tally")
            .field("spec", &self.inner.spec.to_string())
            .field("tags", &self.inner.tags)
            .field("sync", &self.inner.sync)
            .field("is_idle", &self.is_idle())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tally[{}]: tags({}) combinations({}, spec=\"{}\") every {}s",
            self.inner.config.namespace.as_deref().unwrap_or("-"),
            self.inner.tags.len(),
            self.inner.combinations.len(),
            self.inner.spec,
            self.inner.config.update_interval_secs,
        )
    }
}
