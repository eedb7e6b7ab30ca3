//! One refresh cycle: resolve categories, classify, filter, parse, label, emit.

use nodestats_metrics::{
    DefinitionRegistry, LabelSet, Metric, MetricDefinition, MetricKind, StatKey,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::Instrument;

use crate::config::ExporterConfig;
use crate::emitter::{EmitOutcome, MetricEmitter};
use crate::error::{ValueError, WatcherError, WatcherResult};
use crate::filter::FilterEngine;
use crate::observer::Observer;
use crate::resolver::{KeyResolver, ResolvedKeySet, NAMESPACE_CONTEXT};
use crate::stats::{CycleSummary, WatcherStats};
use crate::RawStatsMap;

/// Rendered for a schema label the cycle has no value for.
pub const MISSING_LABEL_VALUE: &str = "null";

const CLUSTER_NAME_LABEL: &str = "cluster_name";
const SERVICE_LABEL: &str = "service";
const NAMESPACE_LABEL: &str = "ns";

/// Everything a cycle reads besides its inputs: definitions, filter rules and
/// naming. Immutable; a reload builds a new snapshot and swaps the `Arc`.
#[derive(Debug)]
pub struct PipelineSnapshot {
    registry: Arc<DefinitionRegistry>,
    filter: FilterEngine,
    metric_prefix: String,
}

impl PipelineSnapshot {
    pub fn new(config: &ExporterConfig, registry: Arc<DefinitionRegistry>) -> WatcherResult<Self> {
        Ok(Self {
            registry,
            filter: FilterEngine::new(&config.filter)?,
            metric_prefix: config.metric_prefix.clone(),
        })
    }

    pub fn from_parts(
        registry: Arc<DefinitionRegistry>,
        filter: FilterEngine,
        metric_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            filter,
            metric_prefix: metric_prefix.into(),
        }
    }

    pub fn registry(&self) -> &DefinitionRegistry {
        &self.registry
    }

    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    pub fn metric_prefix(&self) -> &str {
        &self.metric_prefix
    }
}

/// Parse a raw stat value as a sample of `kind`.
///
/// Accepts decimal numbers and `true`/`false` (as 1/0). Counters must be
/// non-negative.
pub fn parse_value(kind: MetricKind, raw: &str) -> Result<f64, ValueError> {
    let raw = raw.trim();
    let value = if raw.eq_ignore_ascii_case("true") {
        1.0
    } else if raw.eq_ignore_ascii_case("false") {
        0.0
    } else {
        raw.parse::<f64>()
            .map_err(|_| ValueError::NotNumeric(raw.to_string()))?
    };
    if !value.is_finite() {
        return Err(ValueError::NotFinite(raw.to_string()));
    }
    if kind == MetricKind::Counter && value < 0.0 {
        return Err(ValueError::NegativeCounter(value));
    }
    Ok(value)
}

/// `<prefix>_<context>_<stat>`, with anything outside `[a-zA-Z0-9_]` mapped to `_`.
pub fn metric_name(prefix: &str, context: &str, stat: &str) -> String {
    format!("{}_{}_{}", prefix, context, stat)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn label_value<'a>(label: &str, observer: &'a Observer, key: &'a StatKey) -> Option<&'a str> {
    match label {
        CLUSTER_NAME_LABEL => observer.cluster_name.as_deref(),
        SERVICE_LABEL => Some(observer.service.as_str()),
        NAMESPACE_LABEL => key.namespace.as_deref(),
        other => observer.labels.get(other).map(String::as_str),
    }
}

fn build_labels(definition: &MetricDefinition, observer: &Observer, key: &StatKey) -> LabelSet {
    let mut labels = LabelSet::new();
    if definition.labels.is_empty() {
        labels.insert(
            CLUSTER_NAME_LABEL,
            label_value(CLUSTER_NAME_LABEL, observer, key).unwrap_or(MISSING_LABEL_VALUE),
        );
        labels.insert(SERVICE_LABEL, observer.service.as_str());
        if let Some(ns) = &key.namespace {
            labels.insert(NAMESPACE_LABEL, ns.as_str());
        }
    } else {
        for name in &definition.labels {
            let value = label_value(name, observer, key).unwrap_or(MISSING_LABEL_VALUE);
            labels.insert(name.as_str(), value);
        }
    }
    for (name, value) in &observer.labels {
        if labels.get(name).is_none() {
            labels.insert(name.as_str(), value.as_str());
        }
    }
    labels
}

/// Drives refresh cycles for one stat context.
pub struct StatsWatcher {
    resolver: Arc<dyn KeyResolver>,
    generation: AtomicU64,
    stats: WatcherStats,
}

impl StatsWatcher {
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            resolver,
            generation: AtomicU64::new(0),
            stats: WatcherStats::new(),
        }
    }

    pub fn resolver(&self) -> &dyn KeyResolver {
        self.resolver.as_ref()
    }

    pub fn context(&self) -> &str {
        self.resolver.context()
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }

    pub fn pass_one_keys(&self) -> ResolvedKeySet {
        self.resolver.pass_one_keys()
    }

    pub fn pass_two_keys(&self, raw_stats: &RawStatsMap) -> WatcherResult<ResolvedKeySet> {
        self.resolver.pass_two_keys(raw_stats)
    }

    /// Run one cycle over `raw_stats` and emit the resulting metrics.
    ///
    /// `info_keys` are the keys the caller fetched. The marker slot is
    /// reserved before anything is emitted: an `Ok` return has sent the
    /// end-of-cycle marker, an `Err` after the reservation has sent an abort
    /// marker, and a failed reservation leaves nothing of this cycle on the
    /// channel.
    pub async fn refresh(
        &self,
        snapshot: &PipelineSnapshot,
        observer: &Observer,
        info_keys: &[String],
        raw_stats: &RawStatsMap,
        out: &MetricEmitter,
    ) -> WatcherResult<CycleSummary> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let span = tracing::info_span!(
            "refresh",
            context = self.context(),
            service = %observer.service,
            generation
        );

        let marker = match out.reserve_marker().instrument(span.clone()).await {
            Ok(marker) => marker,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };
        let result = self
            .run_cycle(generation, snapshot, observer, info_keys, raw_stats, out)
            .instrument(span)
            .await;
        match &result {
            Ok(summary) => {
                marker.finish(summary.clone());
                self.stats.record_cycle(summary);
            }
            Err(e) => {
                self.record_failure(e);
                marker.abort(self.context(), e.to_string());
            }
        }
        result
    }

    /// Account for a cycle that failed before `refresh` could run, and tell
    /// the consumer.
    pub async fn fail_cycle(&self, error: &WatcherError, out: &MetricEmitter) {
        self.record_failure(error);
        out.abort_cycle(self.context(), error.to_string()).await;
    }

    fn record_failure(&self, error: &WatcherError) {
        self.stats.record_failed_cycle();
        tracing::error!(context = self.context(), error = %error, "cycle failed");
    }

    async fn run_cycle(
        &self,
        generation: u64,
        snapshot: &PipelineSnapshot,
        observer: &Observer,
        info_keys: &[String],
        raw_stats: &RawStatsMap,
        out: &MetricEmitter,
    ) -> WatcherResult<CycleSummary> {
        let categories = self.resolver.pass_two_keys(raw_stats)?;
        let mut summary = CycleSummary::new(generation, self.context(), &observer.service);
        summary.category_keys = categories.as_slice().to_vec();

        if categories.is_empty() {
            tracing::debug!("no category keys, nothing to publish");
            return Ok(summary);
        }
        if !info_keys.is_empty() && !categories.iter().any(|k| info_keys.contains(k)) {
            tracing::warn!(
                ?info_keys,
                categories = ?categories.as_slice(),
                "fetched keys cover none of the resolved categories"
            );
        }

        let listing_keys = self.resolver.pass_one_keys();
        for (raw_key, raw_value) in raw_stats {
            if listing_keys.contains(raw_key) {
                continue;
            }
            summary.entries += 1;

            let Some(key) = StatKey::parse(raw_key) else {
                summary.coverage_gaps += 1;
                self.stats.record_gap(raw_key);
                tracing::debug!(stat = %raw_key, "malformed stat key");
                continue;
            };
            let context = if key.is_namespaced() {
                NAMESPACE_CONTEXT
            } else {
                self.context()
            };

            let Some(definition) = snapshot.registry().lookup(context, &key.stat) else {
                summary.coverage_gaps += 1;
                self.stats.record_gap(&format!("{}:{}", context, key.stat));
                tracing::debug!(stat = %key, context, "no metric definition");
                continue;
            };

            if !snapshot.filter().is_eligible(context, &key) {
                summary.filtered += 1;
                tracing::trace!(stat = %key, "filtered out");
                continue;
            }

            let value = match parse_value(definition.kind, raw_value) {
                Ok(v) => v,
                Err(e) => {
                    summary.parse_failures += 1;
                    tracing::warn!(stat = %key, kind = %definition.kind, error = %e, "skipping unparsable value");
                    continue;
                }
            };

            let name = metric_name(snapshot.metric_prefix(), context, &definition.name);
            let labels = build_labels(definition, observer, &key);
            let metric = Metric::from_definition(definition, name, value, labels, key);
            match out.emit(metric).await? {
                EmitOutcome::Sent => summary.emitted += 1,
                EmitOutcome::Dropped => summary.dropped += 1,
            }
        }

        tracing::debug!(
            entries = summary.entries,
            emitted = summary.emitted,
            filtered = summary.filtered,
            coverage_gaps = summary.coverage_gaps,
            parse_failures = summary.parse_failures,
            dropped = summary.dropped,
            "cycle complete"
        );
        Ok(summary)
    }
}
