//! End-to-end tests for the tally engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::{self, BoxFuture, FutureExt};
use prometheus::{Encoder, Registry, TextEncoder};
use tally_rs::{
    Channel, CountResult, CountSource, Filter, StaticSource, TallyArgs, TallyBuilder, TallyError,
    Target,
};

fn directory() -> Arc<StaticSource> {
    let source = Arc::new(StaticSource::new());
    source.upsert(Channel::new("c0").property("a", "1").property("b", "3").tag("x"));
    source.upsert(Channel::new("c1").property("a", "1").property("b", "4"));
    source.upsert(Channel::new("c2").property("a", "2").tag("x"));
    source.upsert(Channel::new("c3").property("a", "2").property("b", "4"));
    source.upsert(Channel::new("c4").property("c", "9"));
    source
}

fn exposition(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .unwrap();
    String::from_utf8(buffer).unwrap()
}

#[tokio::test]
async fn test_combinations_exposed_after_tick() {
    let registry = Registry::new();
    let tally = TallyBuilder::new()
        .tags(["x"])
        .properties("a:1,2;b:!3,4")
        .prometheus_registry(registry.clone())
        .build(directory())
        .unwrap();

    let report = tally.tick().await;
    assert!(report.is_complete());
    assert_eq!(report.updated, 3 + 1 + 4);

    let text = exposition(&registry);
    // b!=3 requires b to be set, so c2 (a=2, no b) is not counted
    assert!(text.contains("channel_count{a=\"1\",b=\"!3\"} 1"));
    assert!(text.contains("channel_count{a=\"1\",b=\"4\"} 1"));
    assert!(text.contains("channel_count{a=\"2\",b=\"!3\"} 1"));
    assert!(text.contains("channel_count{a=\"2\",b=\"4\"} 1"));
    assert!(text.contains("tag_on_channels_count{tag=\"x\"} 2"));
    assert!(text.contains("total_channel_count 5"));
    assert!(text.contains("property_count 3"));
    assert!(text.contains("tag_count 1"));
    assert!(text.contains("tally_sync_ticks_total 1"));
    assert!(text.contains("# HELP channel_count Count of entities with set properties"));
}

#[tokio::test]
async fn test_unset_values_use_dash_label() {
    let registry = Registry::new();
    let tally = TallyBuilder::new()
        .properties("b:!*")
        .namespace("cf")
        .prometheus_registry(registry.clone())
        .build(directory())
        .unwrap();

    tally.tick().await;
    let text = exposition(&registry);
    assert!(text.contains("cf_channel_count{b=\"-\"} 2"));
    assert!(text.contains("cf_total_channel_count 5"));
    assert!(text.contains("cf_sync_ticks_total 1"));
    assert!(!text.contains("tally_sync"));
}

#[test]
fn test_empty_configuration_exposes_aggregates() {
    let registry = Registry::new();
    let tally = TallyBuilder::new()
        .prometheus_registry(registry.clone())
        .build(directory())
        .unwrap();

    assert!(tally.tags().is_empty());
    // The empty spec still yields the match-all combination
    assert_eq!(tally.combinations().len(), 1);

    let names: Vec<String> = registry
        .gather()
        .iter()
        .map(|f| f.get_name().to_string())
        .collect();
    for name in ["total_channel_count", "property_count", "tag_count"] {
        assert!(names.iter().any(|n| n == name), "missing {}", name);
    }
}

#[test]
fn test_startup_errors_are_fatal() {
    let registry = Registry::new();

    let err = TallyBuilder::new()
        .properties("a1,2")
        .prometheus_registry(registry.clone())
        .build(directory())
        .unwrap_err();
    assert!(matches!(err, TallyError::InvalidPropertySpec { .. }));

    // A literal dash collides with the unset projection
    let err = TallyBuilder::new()
        .properties("a:-,!*")
        .prometheus_registry(registry.clone())
        .build(directory())
        .unwrap_err();
    assert!(matches!(err, TallyError::DuplicateSeries(_)));

    assert!(registry.gather().is_empty());
}

#[test]
fn test_oversized_spec_is_a_startup_error() {
    let values: Vec<String> = (0..10).map(|v| v.to_string()).collect();
    let spec: Vec<String> = (0..20)
        .map(|k| format!("k{}:{}", k, values.join(",")))
        .collect();

    let result = TallyBuilder::new()
        .properties(spec.join(";"))
        .build(directory());
    assert!(matches!(
        result,
        Err(TallyError::InvalidPropertySpec { .. })
    ));
}

#[test]
fn test_two_engines_cannot_share_series() {
    let registry = Registry::new();
    let _first = TallyBuilder::new()
        .tags(["x"])
        .namespace("cf")
        .prometheus_registry(registry.clone())
        .build(directory())
        .unwrap();
    let before = registry.gather().len();

    let second = TallyBuilder::new()
        .tags(["x"])
        .namespace("cf")
        .prometheus_registry(registry.clone())
        .build(directory());
    assert!(matches!(second, Err(TallyError::Registration(_))));
    assert_eq!(registry.gather().len(), before);
}

#[derive(Parser)]
struct Cli {
    #[command(flatten)]
    tally: TallyArgs,
}

#[test]
fn test_cli_overrides_programmatic_config() {
    let cli = Cli::try_parse_from([
        "tally",
        "--tally-tags",
        "x,y",
        "--tally-properties",
        "a:1",
        "--tally-update-interval-secs",
        "5",
    ])
    .unwrap();

    let tally = TallyBuilder::new()
        .tags(["z"])
        .properties("b:!*")
        .with_cli_args(&cli.tally)
        .build(directory())
        .unwrap();

    assert_eq!(tally.tags(), ["x".to_string(), "y".to_string()]);
    assert_eq!(tally.spec().to_string(), "a:1");
    assert_eq!(tally.config().update_interval_secs, 5);
}

/// Counts queries in flight and remembers the peak.
#[derive(Default)]
struct SlowSource {
    inflight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowSource {
    fn query(&self) -> BoxFuture<'_, CountResult> {
        async move {
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            Ok(1)
        }
        .boxed()
    }
}

impl CountSource for SlowSource {
    fn count<'a>(&'a self, _filter: &'a Filter) -> BoxFuture<'a, CountResult> {
        self.query()
    }

    fn count_all(&self) -> BoxFuture<'_, CountResult> {
        self.query()
    }

    fn count_by_tag<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, CountResult> {
        self.query()
    }

    fn count_properties(&self) -> BoxFuture<'_, CountResult> {
        self.query()
    }

    fn count_tags(&self) -> BoxFuture<'_, CountResult> {
        self.query()
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ticks_do_not_overlap() {
    let source = Arc::new(SlowSource::default());
    let tally = TallyBuilder::new()
        .tags(["x", "y", "z"])
        .query_concurrency(1)
        .build(source.clone())
        .unwrap();

    let (a, b) = future::join(tally.tick(), tally.tick()).await;
    assert!(a.is_complete() && b.is_complete());
    assert_eq!(tally.metrics().ticks.get(), 2);
    assert_eq!(source.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_query_concurrency_is_bounded() {
    let source = Arc::new(SlowSource::default());
    let tally = TallyBuilder::new()
        .tags(["t0", "t1", "t2", "t3", "t4", "t5"])
        .query_concurrency(3)
        .build(source.clone())
        .unwrap();

    tally.tick().await;
    assert_eq!(source.peak.load(Ordering::SeqCst), 3);
}

/// Fails every query.
struct DownSource;

impl CountSource for DownSource {
    fn count<'a>(&'a self, _filter: &'a Filter) -> BoxFuture<'a, CountResult> {
        future::ready(Err("connection refused".into())).boxed()
    }

    fn count_all(&self) -> BoxFuture<'_, CountResult> {
        future::ready(Err("connection refused".into())).boxed()
    }

    fn count_by_tag<'a>(&'a self, _name: &'a str) -> BoxFuture<'a, CountResult> {
        future::ready(Err("connection refused".into())).boxed()
    }

    fn count_properties(&self) -> BoxFuture<'_, CountResult> {
        future::ready(Err("connection refused".into())).boxed()
    }

    fn count_tags(&self) -> BoxFuture<'_, CountResult> {
        future::ready(Err("connection refused".into())).boxed()
    }
}

#[tokio::test]
async fn test_unreachable_source_keeps_values() {
    let registry = Registry::new();
    let tally = TallyBuilder::new()
        .tags(["x"])
        .properties("a:1")
        .prometheus_registry(registry.clone())
        .build(Arc::new(DownSource))
        .unwrap();

    let report = tally.tick().await;
    assert_eq!(report.updated, 0);
    assert_eq!(report.failed.len(), tally.store().len());
    assert_eq!(tally.value(&Target::TotalChannels), Some(0));

    let text = exposition(&registry);
    assert!(text.contains("tally_sync_query_failures_total 5"));
    assert!(text.contains("tally_sync_last_tick_failures 5"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reads_during_ticks_see_whole_values() {
    let source = directory();
    let tally = TallyBuilder::new()
        .tags(["x"])
        .properties("a:1,2,!*")
        .build(source.clone())
        .unwrap();
    let target = Target::TotalChannels;

    let reader = {
        let tally = tally.clone();
        let target = target.clone();
        tokio::spawn(async move {
            for _ in 0..1_000 {
                let v = tally.value(&target).unwrap();
                assert!(v == 0 || v == 5 || v == 6, "unexpected value {}", v);
                tokio::task::yield_now().await;
            }
        })
    };

    for i in 0..50 {
        if i == 25 {
            source.upsert(Channel::new("c5"));
        }
        tally.tick().await;
    }
    reader.await.unwrap();
    assert_eq!(tally.value(&target), Some(6));
}

#[tokio::test(start_paused = true)]
async fn test_spawned_driver_follows_source_and_stops() {
    let source = directory();
    let tally = TallyBuilder::new()
        .tags(["x"])
        .update_interval(Duration::from_secs(60))
        .build(source.clone())
        .unwrap();

    tally.spawn(&tokio::runtime::Handle::current());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(tally.value(&Target::Tag("x".into())), Some(2));

    source.upsert(Channel::new("c9").tag("x"));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(tally.value(&Target::Tag("x".into())), Some(3));

    tally.shutdown();
    tally.wait().await;
    assert!(tally.is_idle());
}
