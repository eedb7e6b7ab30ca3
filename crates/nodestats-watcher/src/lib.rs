//! Node stats translation pipeline.
//!
//! A refresh cycle turns one node's flat `name=value` statistics into typed
//! metrics:
//!
//! 1. A [`KeyResolver`] names the info keys to fetch, in two passes: a
//!    listing pass (e.g. `namespaces`) and a category pass derived from it.
//! 2. The [`Collector`] fetches those keys through a [`NodeClient`] and
//!    flattens the responses into a [`RawStatsMap`].
//! 3. The [`StatsWatcher`] classifies each entry against the definition
//!    registry, applies the [`FilterEngine`], parses and labels the value,
//!    and hands the result to the [`MetricEmitter`].
//! 4. The consumer drains the bounded channel up to the end-of-cycle marker
//!    and passes the metrics to an [`Exporter`].
//!
//! Definitions, filter rules and naming are read from an immutable
//! [`PipelineSnapshot`], so a reload never changes a cycle mid-flight.

pub mod client;
pub mod collector;
pub mod config;
pub mod emitter;
pub mod error;
pub mod exporter;
pub mod filter;
pub mod observer;
pub mod resolver;
pub mod stats;
pub mod watcher;

/// Flat stats of one node, keyed by `stat` or `namespace/stat`.
pub type RawStatsMap = std::collections::BTreeMap<String, String>;

pub use client::{parse_info_response, NodeClient, StaticNodeClient};
pub use collector::Collector;
pub use config::{
    ExporterConfig, FilterConfig, FilterDefault, FilterMode, FilterRule, FilterScope, NodeConfig,
};
pub use emitter::{channel, CycleEvent, CycleMarker, EmitOutcome, MetricEmitter};
pub use error::{ClientError, ValueError, WatcherError, WatcherResult};
pub use exporter::{
    drain_cycle, render_exposition, DrainError, DrainedCycle, Exporter, ExpositionFileExporter,
    InMemoryExporter, LogExporter,
};
pub use filter::FilterEngine;
pub use observer::Observer;
pub use resolver::{
    KeyResolver, NamespaceResolver, NodeStatsResolver, ResolvedKeySet, NAMESPACE_CONTEXT,
    NODE_STATS_CONTEXT,
};
pub use stats::{CycleSummary, WatcherStats};
pub use watcher::{metric_name, parse_value, PipelineSnapshot, StatsWatcher, MISSING_LABEL_VALUE};
