//! Fixed set of counter slots, one per tracked entity.
//!
//! The slot set is built once at startup and never resized. Each slot is an
//! [`IntGauge`]: the synchronizer is the single writer, scrapes read the same
//! atomic cell concurrently. Readers may see a mix of slots from the current
//! and the previous tick, never a torn value.

use std::collections::HashSet;
use std::fmt;

use prometheus::{IntGauge, Registry};
use tracing::debug;

use crate::combination::{Combination, Filter};
use crate::error::{Result, TallyError};
use crate::metrics::{
    self, MetricNames, BASE_UNIT, CHANNEL_COUNT, HELP_CHANNEL_COUNT, HELP_PROPERTY_COUNT,
    HELP_TAG_COUNT, HELP_TAG_ON_CHANNELS_COUNT, HELP_TOTAL_CHANNEL_COUNT, PROPERTY_COUNT,
    TAG_COUNT, TAG_LABEL, TAG_ON_CHANNELS_COUNT, TOTAL_CHANNEL_COUNT,
};
use crate::tag::{self, Tag};

/// The entity a slot counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every entity, unfiltered.
    TotalChannels,
    /// Property definitions.
    Properties,
    /// Tag definitions.
    Tags,
    /// Entities carrying one tag.
    Tag(String),
    /// Entities matching one property combination.
    Combination(Combination),
}

impl Target {
    /// Refresh phase this target belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Target::TotalChannels | Target::Properties | Target::Tags => Phase::Aggregates,
            Target::Tag(_) => Phase::Tags,
            Target::Combination(_) => Phase::Combinations,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::TotalChannels => f.write_str("total"),
            Target::Properties => f.write_str("properties"),
            Target::Tags => f.write_str("tags"),
            Target::Tag(name) => write!(f, "tag {}", name),
            Target::Combination(c) => write!(f, "combination {}", c),
        }
    }
}

/// Synchronizer phases, refreshed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Aggregates,
    Tags,
    Combinations,
}

/// One tracked entity and its counter.
#[derive(Debug, Clone)]
pub struct Slot {
    target: Target,
    /// Precomputed so ticks do not re-render filters. Empty unless the
    /// target is a combination.
    filter: Filter,
    gauge: IntGauge,
}

impl Slot {
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Filter sent to the count source for combination slots.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Current value as a scrape would see it.
    #[inline]
    pub fn get(&self) -> i64 {
        self.gauge.get()
    }

    /// Replace the value. Counts above `i64::MAX` saturate.
    #[inline]
    pub fn set(&self, count: u64) {
        self.gauge.set(i64::try_from(count).unwrap_or(i64::MAX));
    }
}

/// All counter slots, in registration order: aggregates, tags, combinations.
#[derive(Debug, Clone)]
pub struct CounterStore {
    slots: Vec<Slot>,
}

impl CounterStore {
    /// Build one gauge per aggregate, tag and combination.
    ///
    /// # Errors
    ///
    /// Returns `TallyError::DuplicateSeries` if two entities would expose the
    /// same name and labels, or `TallyError::Registration` if a gauge cannot
    /// be constructed (e.g. an invalid label name).
    pub fn build(
        names: &MetricNames,
        tags: &[String],
        combinations: &[Combination],
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(3 + tags.len() + combinations.len());
        let mut series = HashSet::with_capacity(slots.capacity());

        let aggregates = [
            (Target::TotalChannels, TOTAL_CHANNEL_COUNT, HELP_TOTAL_CHANNEL_COUNT),
            (Target::Properties, PROPERTY_COUNT, HELP_PROPERTY_COUNT),
            (Target::Tags, TAG_COUNT, HELP_TAG_COUNT),
        ];
        for (target, name, help) in aggregates {
            slots.push(new_slot(&mut series, target, &names.name(name), help, Vec::new())?);
        }

        let tag_help = format!("{} ({})", HELP_TAG_ON_CHANNELS_COUNT, BASE_UNIT);
        let tag_name = names.name(TAG_ON_CHANNELS_COUNT);
        for t in tags {
            let labels = vec![Tag::new(TAG_LABEL, t.clone())];
            let target = Target::Tag(t.clone());
            slots.push(new_slot(&mut series, target, &tag_name, &tag_help, labels)?);
        }

        let combination_name = names.name(CHANNEL_COUNT);
        for combination in combinations {
            let labels = tag::project(combination);
            let target = Target::Combination(combination.clone());
            slots.push(new_slot(
                &mut series,
                target,
                &combination_name,
                HELP_CHANNEL_COUNT,
                labels,
            )?);
        }

        Ok(Self { slots })
    }

    /// Register every slot's gauge with `registry`.
    ///
    /// All or nothing: if the registry rejects a gauge, the gauges registered
    /// by this call are unregistered again before the error is returned.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        for (i, slot) in self.slots.iter().enumerate() {
            if let Err(e) = registry.register(Box::new(slot.gauge.clone())) {
                for registered in &self.slots[..i] {
                    let _ = registry.unregister(Box::new(registered.gauge.clone()));
                }
                return Err(TallyError::Registration(e));
            }
        }
        debug!(slots = self.slots.len(), "registered counter gauges");
        Ok(())
    }

    /// Remove every slot's gauge from `registry`.
    pub fn unregister(&self, registry: &Registry) {
        for slot in &self.slots {
            let _ = registry.unregister(Box::new(slot.gauge.clone()));
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots belonging to one refresh phase.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(move |s| s.target.phase() == phase)
    }

    /// Current value for `target`, if it is tracked.
    pub fn value(&self, target: &Target) -> Option<i64> {
        self.slots
            .iter()
            .find(|s| &s.target == target)
            .map(Slot::get)
    }
}

fn new_slot(
    series: &mut HashSet<String>,
    target: Target,
    name: &str,
    help: &str,
    mut labels: Vec<Tag>,
) -> Result<Slot> {
    let gauge = metrics::gauge(name, help, &labels)?;

    labels.sort();
    let rendered: Vec<String> = labels
        .iter()
        .map(|t| format!("{}=\"{}\"", t.name, t.value))
        .collect();
    let key = format!("{}{{{}}}", name, rendered.join(","));
    if !series.insert(key.clone()) {
        return Err(TallyError::DuplicateSeries(key));
    }

    let filter = match &target {
        Target::Combination(c) => c.to_filter(),
        _ => Filter::new(),
    };
    Ok(Slot {
        target,
        filter,
        gauge,
    })
}
