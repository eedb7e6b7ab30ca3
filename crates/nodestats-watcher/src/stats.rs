//! Per-cycle summaries and long-lived watcher counters.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// What one refresh cycle did. Sent as the end-of-cycle marker and returned
/// from `refresh`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub generation: u64,
    pub context: String,
    pub service: String,
    pub category_keys: Vec<String>,
    /// Raw entries examined.
    pub entries: usize,
    pub emitted: usize,
    pub filtered: usize,
    pub coverage_gaps: usize,
    pub parse_failures: usize,
    /// Metrics dropped because the output channel stayed full.
    pub dropped: usize,
}

impl CycleSummary {
    pub fn new(generation: u64, context: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            generation,
            context: context.into(),
            service: service.into(),
            ..Default::default()
        }
    }
}

/// Counters accumulated across cycles, readable at any time.
#[derive(Debug, Default)]
pub struct WatcherStats {
    cycles: AtomicU64,
    emitted: AtomicU64,
    filtered: AtomicU64,
    parse_failures: AtomicU64,
    dropped: AtomicU64,
    failed_cycles: AtomicU64,
    coverage_gaps: DashMap<String, u64>,
}

impl WatcherStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_cycle(&self, summary: &CycleSummary) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.emitted
            .fetch_add(summary.emitted as u64, Ordering::Relaxed);
        self.filtered
            .fetch_add(summary.filtered as u64, Ordering::Relaxed);
        self.parse_failures
            .fetch_add(summary.parse_failures as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(summary.dropped as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_cycle(&self) {
        self.failed_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gap(&self, stat: &str) {
        *self.coverage_gaps.entry(stat.to_string()).or_insert(0) += 1;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stats seen without a definition, with how often, sorted by name.
    pub fn coverage_gaps(&self) -> Vec<(String, u64)> {
        let mut gaps: Vec<_> = self
            .coverage_gaps
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        gaps.sort();
        gaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cycle_accumulates() {
        let stats = WatcherStats::new();
        let mut summary = CycleSummary::new(1, "node_stats", "127.0.0.1:3000");
        summary.emitted = 3;
        summary.filtered = 1;
        summary.dropped = 2;
        stats.record_cycle(&summary);
        stats.record_cycle(&summary);

        assert_eq!(stats.cycles(), 2);
        assert_eq!(stats.emitted(), 6);
        assert_eq!(stats.filtered(), 2);
        assert_eq!(stats.dropped(), 4);
        assert_eq!(stats.parse_failures(), 0);
    }

    #[test]
    fn test_coverage_gaps_counted_per_stat() {
        let stats = WatcherStats::new();
        stats.record_gap("namespace:zeta");
        stats.record_gap("node_stats:alpha");
        stats.record_gap("namespace:zeta");
        assert_eq!(
            stats.coverage_gaps(),
            vec![
                ("namespace:zeta".to_string(), 2),
                ("node_stats:alpha".to_string(), 1)
            ]
        );
    }
}
