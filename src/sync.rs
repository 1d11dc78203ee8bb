//! Periodic refresh of the counter store.
//!
//! A tick walks three phases (aggregates, tags, combinations) and, for every
//! slot, asks the [`CountSource`] for a fresh count and stores it. A failed
//! or timed out query is logged and counted; the slot keeps its previous
//! value and the rest of the tick carries on.
//!
//! Ticks are serialized: a `tick()` started while another is running waits
//! for it to finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::metrics::SyncMetrics;
use crate::source::{CountResult, CountSource};
use crate::store::{CounterStore, Phase, Slot, Target};

/// Default number of count queries in flight per phase.
pub const DEFAULT_QUERY_CONCURRENCY: usize = 4;

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Slots that received a fresh value.
    pub updated: usize,
    /// Slots whose query failed; they keep their previous value.
    pub failed: Vec<Target>,
    pub elapsed: Duration,
}

impl TickReport {
    /// Whether every slot was refreshed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Refreshes every slot of a [`CounterStore`] from a [`CountSource`].
pub struct Synchronizer {
    store: Arc<CounterStore>,
    source: Arc<dyn CountSource>,
    metrics: SyncMetrics,
    concurrency: usize,
    timeout: Option<Duration>,
    running: Mutex<()>,
}

impl Synchronizer {
    pub fn new(store: Arc<CounterStore>, source: Arc<dyn CountSource>) -> Self {
        Self {
            store,
            source,
            metrics: SyncMetrics::new(),
            concurrency: DEFAULT_QUERY_CONCURRENCY,
            timeout: None,
            running: Mutex::new(()),
        }
    }

    /// Maximum count queries in flight per phase. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fail any single query that takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: SyncMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<CounterStore> {
        &self.store
    }

    /// Run one tick: refresh aggregates, then tags, then combinations.
    ///
    /// Never fails; per-slot failures are listed in the report.
    pub async fn tick(&self) -> TickReport {
        let _running = self.running.lock().await;
        let start = Instant::now();
        let mut report = TickReport::default();

        for phase in [Phase::Aggregates, Phase::Tags, Phase::Combinations] {
            self.refresh(phase, &mut report).await;
        }

        report.elapsed = start.elapsed();
        self.metrics
            .record_tick(report.elapsed.as_secs_f64(), report.failed.len() as u64);
        debug!(
            updated = report.updated,
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "synchronizer tick complete"
        );
        report
    }

    async fn refresh(&self, phase: Phase, report: &mut TickReport) {
        // Owned and boxed so the tick future stays Send for spawned drivers
        let queries: Vec<BoxFuture<'_, (&Slot, CountResult)>> = self
            .store
            .phase(phase)
            .map(|slot| async move { (slot, self.query(slot).await) }.boxed())
            .collect();
        let mut results = stream::iter(queries).buffer_unordered(self.concurrency);

        while let Some((slot, result)) = results.next().await {
            match result {
                Ok(count) => {
                    slot.set(count);
                    report.updated += 1;
                }
                Err(e) => {
                    warn!(
                        entity = %slot.target(),
                        error = %e,
                        "count query failed, keeping previous value"
                    );
                    report.failed.push(slot.target().clone());
                }
            }
        }
    }

    async fn query(&self, slot: &Slot) -> CountResult {
        let fut = match slot.target() {
            Target::TotalChannels => self.source.count_all(),
            Target::Properties => self.source.count_properties(),
            Target::Tags => self.source.count_tags(),
            Target::Tag(name) => self.source.count_by_tag(name),
            Target::Combination(_) => self.source.count(slot.filter()),
        };

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(elapsed) => Err(elapsed.into()),
            },
            None => fut.await,
        }
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("slots", &self.store.len())
            .field("concurrency", &self.concurrency)
            .field("timeout", &self.timeout)
            .field("metrics", &self.metrics)
            .finish()
    }
}
