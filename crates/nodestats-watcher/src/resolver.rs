//! Two-pass key discovery.
//!
//! The node exposes its statistics as at most two levels: node-wide
//! categories and per-sub-resource categories (one per namespace). Pass one
//! names the listing keys to fetch first; pass two turns what came back into
//! the category keys of the main fetch. Resolvers never talk to the node.

use std::collections::HashSet;

use crate::error::{WatcherError, WatcherResult};
use crate::RawStatsMap;

pub const NODE_STATS_CONTEXT: &str = "node_stats";
pub const NAMESPACE_CONTEXT: &str = "namespace";

const STATISTICS_KEY: &str = "statistics";
const NAMESPACES_KEY: &str = "namespaces";
const NAMESPACE_KEY_PREFIX: &str = "namespace/";

/// Ordered keys produced by a resolution pass. Empty means nothing to expand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedKeySet(Vec<String>);

impl ResolvedKeySet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|k| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl<S: Into<String>> FromIterator<S> for ResolvedKeySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a ResolvedKeySet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Decides which info keys a stat context needs.
///
/// Both passes are pure: same input, same output, no I/O.
pub trait KeyResolver: Send + Sync {
    /// Stat context name, used for metric naming and filter scoping.
    fn context(&self) -> &str;

    /// Listing keys to fetch before the main fetch. Empty when the context
    /// has no sub-resource hierarchy.
    fn pass_one_keys(&self) -> ResolvedKeySet;

    /// Category keys to request next, given what pass one fetched.
    fn pass_two_keys(&self, raw_stats: &RawStatsMap) -> WatcherResult<ResolvedKeySet>;

    /// The sub-resource a category key addresses, if any.
    fn sub_resource(&self, _category_key: &str) -> Option<String> {
        None
    }
}

/// Node-wide statistics: no hierarchy, one aggregate category.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStatsResolver;

impl KeyResolver for NodeStatsResolver {
    fn context(&self) -> &str {
        NODE_STATS_CONTEXT
    }

    fn pass_one_keys(&self) -> ResolvedKeySet {
        ResolvedKeySet::new()
    }

    fn pass_two_keys(&self, _raw_stats: &RawStatsMap) -> WatcherResult<ResolvedKeySet> {
        Ok([STATISTICS_KEY].into_iter().collect())
    }
}

/// Per-namespace statistics: list namespaces, then one category per namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceResolver;

impl KeyResolver for NamespaceResolver {
    fn context(&self) -> &str {
        NAMESPACE_CONTEXT
    }

    fn pass_one_keys(&self) -> ResolvedKeySet {
        [NAMESPACES_KEY].into_iter().collect()
    }

    fn pass_two_keys(&self, raw_stats: &RawStatsMap) -> WatcherResult<ResolvedKeySet> {
        let listing = raw_stats
            .get(NAMESPACES_KEY)
            .ok_or_else(|| WatcherError::Resolution {
                context: NAMESPACE_CONTEXT.to_string(),
                reason: format!("`{}` listing missing from pass one", NAMESPACES_KEY),
            })?;

        let mut seen = HashSet::new();
        Ok(listing
            .split(';')
            .map(str::trim)
            .filter(|ns| !ns.is_empty() && seen.insert(*ns))
            .map(|ns| format!("{}{}", NAMESPACE_KEY_PREFIX, ns))
            .collect())
    }

    fn sub_resource(&self, category_key: &str) -> Option<String> {
        category_key
            .strip_prefix(NAMESPACE_KEY_PREFIX)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawStatsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_node_stats_pass_one_empty() {
        let resolver = NodeStatsResolver;
        assert!(resolver.pass_one_keys().is_empty());
        assert_eq!(resolver.context(), "node_stats");
    }

    #[test]
    fn test_node_stats_pass_two_fixed_category() {
        let resolver = NodeStatsResolver;
        let empty = RawStatsMap::new();
        let keys = resolver.pass_two_keys(&empty).unwrap();
        assert_eq!(keys.as_slice(), ["statistics".to_string()]);

        let populated = raw(&[("cluster_size", "3"), ("uptime", "100")]);
        let snapshot = populated.clone();
        for _ in 0..3 {
            assert_eq!(resolver.pass_two_keys(&populated).unwrap(), keys);
        }
        assert_eq!(populated, snapshot);
    }

    #[test]
    fn test_namespace_pass_one_lists_namespaces() {
        let resolver = NamespaceResolver;
        assert_eq!(resolver.pass_one_keys().as_slice(), ["namespaces".to_string()]);
    }

    #[test]
    fn test_namespace_pass_two_expands_listing() {
        let resolver = NamespaceResolver;
        let stats = raw(&[("namespaces", "test; bar;;test;")]);
        let keys = resolver.pass_two_keys(&stats).unwrap();
        assert_eq!(
            keys.into_vec(),
            vec!["namespace/test".to_string(), "namespace/bar".to_string()]
        );
        // deterministic
        assert_eq!(
            resolver.pass_two_keys(&stats).unwrap(),
            resolver.pass_two_keys(&stats).unwrap()
        );
    }

    #[test]
    fn test_namespace_pass_two_empty_listing() {
        let resolver = NamespaceResolver;
        let keys = resolver.pass_two_keys(&raw(&[("namespaces", "")])).unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_namespace_pass_two_missing_listing_fails() {
        let resolver = NamespaceResolver;
        let err = resolver.pass_two_keys(&RawStatsMap::new()).unwrap_err();
        assert!(matches!(err, WatcherError::Resolution { .. }));
    }

    #[test]
    fn test_namespace_sub_resource() {
        let resolver = NamespaceResolver;
        assert_eq!(resolver.sub_resource("namespace/test").as_deref(), Some("test"));
        assert_eq!(resolver.sub_resource("namespace/"), None);
        assert_eq!(resolver.sub_resource("statistics"), None);
        assert_eq!(NodeStatsResolver.sub_resource("statistics"), None);
    }
}
