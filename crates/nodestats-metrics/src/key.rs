use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw stat key split into its scope and stat segments.
///
/// Node-wide stats have no namespace; namespace-scoped stats arrive as
/// `"<namespace>/<stat>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StatKey {
    pub namespace: Option<String>,
    pub stat: String,
}

impl StatKey {
    pub fn node(stat: impl Into<String>) -> Self {
        Self {
            namespace: None,
            stat: stat.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, stat: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            stat: stat.into(),
        }
    }

    /// Parse a raw key. Returns `None` for malformed keys: empty segments or
    /// more than one `/`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once('/') {
            None if raw.is_empty() => None,
            None => Some(Self::node(raw)),
            Some((ns, stat)) => {
                let (ns, stat) = (ns.trim(), stat.trim());
                if ns.is_empty() || stat.is_empty() || stat.contains('/') {
                    return None;
                }
                Some(Self::namespaced(ns, stat))
            }
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.stat),
            None => f.write_str(&self.stat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_key() {
        let key = StatKey::parse("client_connections").unwrap();
        assert_eq!(key, StatKey::node("client_connections"));
        assert!(!key.is_namespaced());
    }

    #[test]
    fn test_parse_namespaced_key() {
        let key = StatKey::parse("test/memory_free_pct").unwrap();
        assert_eq!(key.namespace.as_deref(), Some("test"));
        assert_eq!(key.stat, "memory_free_pct");
        assert_eq!(key.to_string(), "test/memory_free_pct");
    }

    #[test]
    fn test_parse_malformed() {
        assert!(StatKey::parse("").is_none());
        assert!(StatKey::parse("/objects").is_none());
        assert!(StatKey::parse("test/").is_none());
        assert!(StatKey::parse("a/b/c").is_none());
    }
}
