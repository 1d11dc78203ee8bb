//! The counting collaborator consumed by the synchronizer.
//!
//! [`CountSource`] is the only view tally has of the entity store. Queries
//! return boxed futures so the trait stays object safe and can be shared as
//! `Arc<dyn CountSource>`.
//!
//! [`StaticSource`] is an in-memory store of channels that answers queries
//! with the same filter semantics as the channel repository:
//!
//! - `key = v`: property set and its value matches `v`
//! - `key! = v`: property set and its value does not match `v`
//! - `key! = *`: property not set

use std::collections::{BTreeMap, BTreeSet};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;

use crate::combination::Filter;
use crate::error::SourceError;
use crate::pattern::{NEGATE, WILDCARD};

/// Result of a single count query.
pub type CountResult = std::result::Result<u64, SourceError>;

/// External source of entity counts.
pub trait CountSource: Send + Sync {
    /// Count entities matching `filter`. An empty filter matches everything.
    fn count<'a>(&'a self, filter: &'a Filter) -> BoxFuture<'a, CountResult>;

    /// Count all entities.
    fn count_all(&self) -> BoxFuture<'_, CountResult>;

    /// Count entities carrying the tag `name`.
    fn count_by_tag<'a>(&'a self, name: &'a str) -> BoxFuture<'a, CountResult>;

    /// Count distinct property definitions.
    fn count_properties(&self) -> BoxFuture<'_, CountResult>;

    /// Count distinct tag definitions.
    fn count_tags(&self) -> BoxFuture<'_, CountResult>;
}

/// A channel record held by [`StaticSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, name: impl Into<String>) -> Self {
        self.tags.insert(name.into());
        self
    }

    /// Whether this channel satisfies every entry of `filter`.
    pub fn matches(&self, filter: &Filter) -> bool {
        filter.iter().all(|(key, values)| {
            let (key, negated) = match key.strip_suffix(NEGATE) {
                Some(base) => (base, true),
                None => (key.as_str(), false),
            };
            let current = self.properties.get(key.trim());
            // Values within one key are alternatives
            values
                .iter()
                .flat_map(|v| v.split(['|', ',', ';']))
                .map(str::trim)
                .any(|pattern| match (negated, current) {
                    (true, None) => pattern == WILDCARD,
                    (true, Some(value)) => pattern != WILDCARD && !glob_match(pattern, value),
                    (false, Some(value)) => glob_match(pattern, value),
                    (false, None) => false,
                })
        })
    }
}

#[derive(Debug, Default)]
struct Contents {
    channels: Vec<Channel>,
    properties: BTreeSet<String>,
    tags: BTreeSet<String>,
}

/// In-memory [`CountSource`].
///
/// Property and tag definitions are tracked separately from the channels
/// that use them, as in a real channel directory.
#[derive(Debug, Default)]
pub struct StaticSource {
    contents: RwLock<Contents>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a channel by name. Its properties and tags are
    /// defined implicitly.
    pub fn upsert(&self, channel: Channel) {
        let mut contents = self.contents.write();
        contents
            .properties
            .extend(channel.properties.keys().cloned());
        contents.tags.extend(channel.tags.iter().cloned());
        match contents.channels.iter_mut().find(|c| c.name == channel.name) {
            Some(existing) => *existing = channel,
            None => contents.channels.push(channel),
        }
    }

    /// Remove a channel by name. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut contents = self.contents.write();
        let before = contents.channels.len();
        contents.channels.retain(|c| c.name != name);
        contents.channels.len() != before
    }

    /// Define a property without attaching it to any channel.
    pub fn define_property(&self, name: impl Into<String>) {
        self.contents.write().properties.insert(name.into());
    }

    /// Define a tag without attaching it to any channel.
    pub fn define_tag(&self, name: impl Into<String>) {
        self.contents.write().tags.insert(name.into());
    }

    /// Synchronous form of [`CountSource::count`].
    pub fn count_matching(&self, filter: &Filter) -> u64 {
        self.contents
            .read()
            .channels
            .iter()
            .filter(|c| c.matches(filter))
            .count() as u64
    }
}

impl CountSource for StaticSource {
    fn count<'a>(&'a self, filter: &'a Filter) -> BoxFuture<'a, CountResult> {
        future::ready(Ok(self.count_matching(filter))).boxed()
    }

    fn count_all(&self) -> BoxFuture<'_, CountResult> {
        let n = self.contents.read().channels.len() as u64;
        future::ready(Ok(n)).boxed()
    }

    fn count_by_tag<'a>(&'a self, name: &'a str) -> BoxFuture<'a, CountResult> {
        let n = self
            .contents
            .read()
            .channels
            .iter()
            .filter(|c| c.tags.contains(name))
            .count() as u64;
        future::ready(Ok(n)).boxed()
    }

    fn count_properties(&self) -> BoxFuture<'_, CountResult> {
        let n = self.contents.read().properties.len() as u64;
        future::ready(Ok(n)).boxed()
    }

    fn count_tags(&self) -> BoxFuture<'_, CountResult> {
        let n = self.contents.read().tags.len() as u64;
        future::ready(Ok(n)).boxed()
    }
}

/// Case-insensitive glob match supporting `*` and `?`.
fn glob_match(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let value: Vec<char> = value.to_lowercase().chars().collect();

    let (mut p, mut v) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while v < value.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, v));
                p += 1;
            }
            Some(&c) if c == '?' || c == value[v] => {
                p += 1;
                v += 1;
            }
            _ => match star {
                Some((sp, sv)) => {
                    p = sp + 1;
                    v = sv + 1;
                    star = Some((sp, sv + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}
