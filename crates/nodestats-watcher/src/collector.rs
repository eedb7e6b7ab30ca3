//! Drives the fetch side of a cycle: pass one, node fetches, pass two, then
//! hands the flattened stats to each context's watcher.

use nodestats_metrics::StatKey;
use std::sync::Arc;
use tracing::Instrument;

use crate::client::{parse_info_response, NodeClient};
use crate::emitter::MetricEmitter;
use crate::error::WatcherResult;
use crate::observer::Observer;
use crate::resolver::KeyResolver;
use crate::stats::CycleSummary;
use crate::watcher::{PipelineSnapshot, StatsWatcher};
use crate::RawStatsMap;

/// Collects every configured stat context of one node target.
pub struct Collector<C> {
    client: C,
    watchers: Vec<StatsWatcher>,
}

impl<C: NodeClient> Collector<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            watchers: Vec::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.watchers.push(StatsWatcher::new(resolver));
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn watchers(&self) -> &[StatsWatcher] {
        &self.watchers
    }

    /// Run one cycle per context. A failed context does not stop the others;
    /// each result carries its own outcome.
    pub async fn collect(
        &self,
        snapshot: &PipelineSnapshot,
        observer: &Observer,
        out: &MetricEmitter,
    ) -> Vec<WatcherResult<CycleSummary>> {
        let mut results = Vec::with_capacity(self.watchers.len());
        for watcher in &self.watchers {
            results.push(self.collect_context(watcher, snapshot, observer, out).await);
        }
        results
    }

    async fn collect_context(
        &self,
        watcher: &StatsWatcher,
        snapshot: &PipelineSnapshot,
        observer: &Observer,
        out: &MetricEmitter,
    ) -> WatcherResult<CycleSummary> {
        let span = tracing::info_span!(
            "collect",
            context = watcher.context(),
            service = %observer.service
        );
        match self.fetch(watcher).instrument(span).await {
            Ok((info_keys, raw_stats)) => {
                watcher
                    .refresh(snapshot, observer, &info_keys, &raw_stats, out)
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    context = watcher.context(),
                    service = %observer.service,
                    error = %e,
                    "fetch failed"
                );
                watcher.fail_cycle(&e, out).await;
                Err(e)
            }
        }
    }

    async fn fetch(&self, watcher: &StatsWatcher) -> WatcherResult<(Vec<String>, RawStatsMap)> {
        let resolver = watcher.resolver();
        let mut raw_stats = RawStatsMap::new();
        let mut info_keys = Vec::new();

        let listing = resolver.pass_one_keys();
        if !listing.is_empty() {
            let response = self.client.request_info(listing.as_slice()).await?;
            for key in &listing {
                if let Some(value) = response.get(key) {
                    raw_stats.insert(key.clone(), value.clone());
                }
                info_keys.push(key.clone());
            }
        }

        let categories = resolver.pass_two_keys(&raw_stats)?;
        for category in &categories {
            let response = self
                .client
                .request_info(std::slice::from_ref(category))
                .await?;
            info_keys.push(category.clone());
            let Some(body) = response.get(category) else {
                tracing::warn!(category = %category, "node returned no data for category");
                continue;
            };
            let sub_resource = resolver.sub_resource(category);
            for (stat, value) in parse_info_response(body) {
                let key = match &sub_resource {
                    Some(ns) => StatKey::namespaced(ns.as_str(), stat),
                    None => StatKey::node(stat),
                };
                raw_stats.insert(key.to_string(), value);
            }
        }

        Ok((info_keys, raw_stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StaticNodeClient;
    use crate::emitter::{channel, CycleEvent};
    use crate::error::{ClientError, WatcherError};
    use crate::filter::FilterEngine;
    use crate::resolver::{NamespaceResolver, NodeStatsResolver};
    use async_trait::async_trait;
    use nodestats_metrics::DefinitionRegistry;
    use std::collections::HashMap;
    use std::time::Duration;

    fn snapshot() -> PipelineSnapshot {
        PipelineSnapshot::from_parts(
            Arc::new(DefinitionRegistry::builtin().unwrap()),
            FilterEngine::allow_all(),
            "aerospike",
        )
    }

    #[tokio::test]
    async fn test_node_stats_skips_pass_one_fetch() {
        let client = StaticNodeClient::new().with_response("statistics", "cluster_size=2;uptime=9");
        let collector = Collector::new(client).with_resolver(Arc::new(NodeStatsResolver));
        let (tx, mut rx) = channel(16);
        let emitter = MetricEmitter::new(tx, Duration::from_millis(100));

        let results = collector
            .collect(&snapshot(), &Observer::new("h:1"), &emitter)
            .await;
        let summary = results.into_iter().next().unwrap().unwrap();
        assert_eq!(summary.emitted, 2);
        // no per-sub-resource fetch: one request, for the category only
        assert_eq!(collector.client().requests(), vec![vec!["statistics".to_string()]]);

        let mut metrics = 0;
        while let Ok(CycleEvent::Metric(_)) = rx.try_recv() {
            metrics += 1;
        }
        assert_eq!(metrics, 2);
    }

    #[tokio::test]
    async fn test_namespace_two_pass_fetch() {
        let client = StaticNodeClient::new()
            .with_response("namespaces", "test;bar")
            .with_response("namespace/test", "objects=10;memory_free_pct=80")
            .with_response("namespace/bar", "objects=20");
        let collector = Collector::new(client).with_resolver(Arc::new(NamespaceResolver));
        let (tx, mut rx) = channel(16);
        let emitter = MetricEmitter::new(tx, Duration::from_millis(100));

        let results = collector
            .collect(&snapshot(), &Observer::new("h:1"), &emitter)
            .await;
        let summary = results.into_iter().next().unwrap().unwrap();
        assert_eq!(summary.emitted, 3);
        assert_eq!(
            collector.client().requests(),
            vec![
                vec!["namespaces".to_string()],
                vec!["namespace/test".to_string()],
                vec!["namespace/bar".to_string()],
            ]
        );

        let mut seen = Vec::new();
        while let Ok(CycleEvent::Metric(m)) = rx.try_recv() {
            seen.push(format!("{}@{}", m.name(), m.labels().get("ns").unwrap_or("")));
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![
                "aerospike_namespace_memory_free_pct@test",
                "aerospike_namespace_objects@bar",
                "aerospike_namespace_objects@test",
            ]
        );
    }

    struct FailingClient;

    #[async_trait]
    impl NodeClient for FailingClient {
        async fn request_info(&self, _keys: &[String]) -> Result<HashMap<String, String>, ClientError> {
            Err(ClientError::Unreachable("h:1".into()))
        }
    }

    #[tokio::test]
    async fn test_client_failure_aborts_cycle() {
        let collector = Collector::new(FailingClient)
            .with_resolver(Arc::new(NamespaceResolver))
            .with_resolver(Arc::new(NodeStatsResolver));
        let (tx, mut rx) = channel(16);
        let emitter = MetricEmitter::new(tx, Duration::from_millis(100));

        let results = collector
            .collect(&snapshot(), &Observer::new("h:1"), &emitter)
            .await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(WatcherError::Client(_)))));
        assert!(matches!(rx.try_recv(), Ok(CycleEvent::Aborted { .. })));
        assert!(matches!(rx.try_recv(), Ok(CycleEvent::Aborted { .. })));
        for watcher in collector.watchers() {
            assert_eq!(watcher.stats().failed_cycles(), 1);
            assert_eq!(watcher.stats().cycles(), 0);
        }
    }
}
