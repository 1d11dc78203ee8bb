//! # tally-rs
//!
//! **Counting every combination, one gauge at a time**
//!
//! Keeps a fixed, combinatorial set of Prometheus gauges in sync with an
//! external entity directory (channels with properties and tags).
//!
//! ## Features
//!
//! - **Property Combinations**: One gauge per element of the cartesian product of
//!   configured property values, including negated (`!v`) and unset (`!*`) choices
//! - **Tag Counts**: One gauge per configured tag
//! - **Aggregates**: Total entity, property and tag counts
//! - **Lock-free Scrapes**: Gauges are atomic cells; reading never queries the source
//! - **Failure Isolation**: A failed count query keeps the previous value and
//!   never stops the rest of a tick
//! - **Flexible Configuration**: Configure via files (TOML/YAML/JSON), environment variables, or code
//! - **CLI Integration**: Built-in clap support for command-line overrides
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use prometheus::Registry;
//! use tally_rs::{Channel, StaticSource, TallyBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(StaticSource::new());
//!     source.upsert(Channel::new("SR:C01{BPM}").property("area", "ring").tag("archived"));
//!
//!     let registry = Registry::new();
//!     let tally = TallyBuilder::new()
//!         .tags(["archived"])
//!         .properties("area:linac,ring;type:!*")
//!         .prometheus_registry(registry.clone())
//!         .build(source)?;
//!
//!     // Refresh every update interval in the background
//!     tally.spawn(&tokio::runtime::Handle::current());
//!
//!     // ... serve registry.gather() over HTTP ...
//!
//!     tally.shutdown();
//!     tally.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Property Spec Format
//!
//! Groups are separated by `;`, a key and its values by `:`, values by `,`:
//!
//! - `area:linac` - `area` is set and matches `linac`
//! - `area:!linac` - `area` is set to something other than `linac`
//! - `area:!*` - `area` is not set
//!
//! `"a:1,2;b:!3,4"` yields four gauges:
//!
//! ```text
//! channel_count{a="1",b="!3"}
//! channel_count{a="1",b="4"}
//! channel_count{a="2",b="!3"}
//! channel_count{a="2",b="4"}
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override earlier):
//!
//! 1. Default values
//! 2. Config files (via `.file()`)
//! 3. Environment variables (via `.env_prefix()`)
//! 4. Programmatic overrides
//! 5. CLI arguments (via `.with_cli_args()`)
//!
//! ### Config File Example (TOML)
//!
//! ```toml
//! tags = ["archived", "active"]
//! properties = "area:linac,ring;type:!*"
//! update_interval_secs = 60
//! namespace = "cf"
//! query_concurrency = 4
//! query_timeout_ms = 5000
//! ```
//!
//! ### Environment Variables
//!
//! With `.env_prefix("TALLY")`:
//! - `TALLY_TAGS=archived,active`
//! - `TALLY_PROPERTIES=area:linac`
//! - `TALLY_UPDATE_INTERVAL_SECS=30`
//!
//! ### CLI Arguments
//!
//! ```ignore
//! use clap::Parser;
//! use tally_rs::{TallyArgs, TallyBuilder};
//!
//! #[derive(Parser)]
//! struct MyArgs {
//!     #[command(flatten)]
//!     tally: TallyArgs,
//! }
//!
//! let args = MyArgs::parse();
//! let tally = TallyBuilder::new()
//!     .file("config.toml")
//!     .env_prefix("TALLY")
//!     .with_cli_args(&args.tally)
//!     .build(source)?;
//! ```

pub mod builder;
pub mod combination;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod pattern;
pub mod source;
pub mod store;
pub mod sync;
pub mod tag;

pub use builder::{TallyArgs, TallyBuilder};
pub use combination::{generate, Combination, Filter, Selection};
pub use config::TallyConfig;
pub use engine::Tally;
pub use error::{Result, SourceError, TallyError};
pub use metrics::SyncMetrics;
pub use pattern::{PropertyGroup, PropertySpec, ValuePattern};
pub use source::{Channel, CountResult, CountSource, StaticSource};
pub use store::{CounterStore, Phase, Slot, Target};
pub use sync::{Synchronizer, TickReport};
pub use tag::{project, Tag};
