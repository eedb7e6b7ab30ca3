use std::collections::HashMap;
use std::path::Path;

use crate::definition::{is_valid_label_name, DefinitionError, DefinitionFile, MetricDefinition};

const BUILTIN_DEFINITIONS: &str = include_str!("../resources/metric_definitions.toml");

/// Fold a raw stat name onto its canonical spelling: trimmed, ASCII
/// lower-case, with `-`, `.` and spaces turned into `_`.
pub fn normalize_stat_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Read-only lookup table from stat name to [`MetricDefinition`].
///
/// Built once from a definitions resource and shared behind an `Arc`. A
/// reload builds a fresh registry; this type has no mutating methods.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    // canonical name -> variants (at most one per context, plus one unscoped)
    definitions: HashMap<String, Vec<MetricDefinition>>,
    aliases: HashMap<String, String>,
}

impl DefinitionRegistry {
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = MetricDefinition>,
    ) -> Result<Self, DefinitionError> {
        let mut registry = Self::default();
        for def in definitions {
            registry.insert(def)?;
        }
        Ok(registry)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, DefinitionError> {
        let file: DefinitionFile = toml::from_str(content)?;
        Self::from_definitions(file.metric)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), count = registry.len(), "loaded metric definitions");
        Ok(registry)
    }

    /// The definitions shipped with the exporter.
    pub fn builtin() -> Result<Self, DefinitionError> {
        Self::from_toml_str(BUILTIN_DEFINITIONS)
    }

    fn insert(&mut self, mut def: MetricDefinition) -> Result<(), DefinitionError> {
        let canonical = normalize_stat_name(&def.name);
        if canonical.is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if let Some(label) = def.labels.iter().find(|l| !is_valid_label_name(l)) {
            return Err(DefinitionError::InvalidLabel {
                name: canonical,
                label: label.clone(),
            });
        }
        if let Some(existing) = self.aliases.get(&canonical) {
            return Err(DefinitionError::AliasConflict {
                alias: canonical.clone(),
                name: canonical,
                existing: existing.clone(),
            });
        }

        for alias in &def.aliases {
            let alias = normalize_stat_name(alias);
            if alias == canonical {
                continue;
            }
            let taken_by = if self.definitions.contains_key(&alias) {
                Some(alias.clone())
            } else {
                self.aliases
                    .get(&alias)
                    .filter(|target| **target != canonical)
                    .cloned()
            };
            if let Some(existing) = taken_by {
                return Err(DefinitionError::AliasConflict {
                    alias,
                    name: canonical,
                    existing,
                });
            }
            self.aliases.insert(alias, canonical.clone());
        }

        def.name = canonical.clone();
        let variants = self.definitions.entry(canonical.clone()).or_default();
        if variants.iter().any(|v| v.context == def.context) {
            return Err(DefinitionError::Duplicate { name: canonical });
        }
        variants.push(def);
        Ok(())
    }

    /// Resolve a raw stat name within a stat context.
    ///
    /// A definition scoped to `context` wins over an unscoped one.
    pub fn lookup(&self, context: &str, stat: &str) -> Option<&MetricDefinition> {
        let name = normalize_stat_name(stat);
        let canonical = self.aliases.get(&name).unwrap_or(&name);
        let variants = self.definitions.get(canonical)?;
        variants
            .iter()
            .find(|v| v.context.as_deref() == Some(context))
            .or_else(|| variants.iter().find(|v| v.context.is_none()))
    }

    pub fn len(&self) -> usize {
        self.definitions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricKind;

    fn registry() -> DefinitionRegistry {
        DefinitionRegistry::from_definitions([
            MetricDefinition::new("client_connections", MetricKind::Gauge)
                .with_description("client connections")
                .with_labels(["cluster_name", "service"])
                .with_alias("client-conns"),
            MetricDefinition::new("objects", MetricKind::Gauge)
                .with_labels(["cluster_name", "service"]),
            MetricDefinition::new("objects", MetricKind::Gauge)
                .with_labels(["cluster_name", "service", "ns"])
                .in_context("namespace"),
            MetricDefinition::new("uptime", MetricKind::Counter),
        ])
        .unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_stat_name("  Client-Connections "), "client_connections");
        assert_eq!(normalize_stat_name("heap.efficiency pct"), "heap_efficiency_pct");
    }

    #[test]
    fn test_lookup_with_normalization_and_alias() {
        let reg = registry();
        assert_eq!(reg.len(), 4);
        let def = reg.lookup("node_stats", "CLIENT_CONNECTIONS").unwrap();
        assert_eq!(def.name, "client_connections");
        let aliased = reg.lookup("node_stats", "Client.Conns").unwrap();
        assert_eq!(aliased.name, "client_connections");
        assert!(reg.lookup("node_stats", "no_such_stat").is_none());
    }

    #[test]
    fn test_context_scoped_definition_wins() {
        let reg = registry();
        let ns = reg.lookup("namespace", "objects").unwrap();
        assert_eq!(ns.labels.last().map(String::as_str), Some("ns"));
        let node = reg.lookup("node_stats", "objects").unwrap();
        assert_eq!(node.labels.len(), 2);
    }

    #[test]
    fn test_lookup_is_stable() {
        let reg = registry();
        let first = reg.lookup("node_stats", "uptime").unwrap() as *const MetricDefinition;
        for _ in 0..3 {
            let again = reg.lookup("node_stats", "uptime").unwrap() as *const MetricDefinition;
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = DefinitionRegistry::from_definitions([
            MetricDefinition::new("uptime", MetricKind::Counter),
            MetricDefinition::new("Uptime", MetricKind::Gauge),
        ])
        .unwrap_err();
        assert!(matches!(err, DefinitionError::Duplicate { .. }));
    }

    #[test]
    fn test_alias_conflict_rejected() {
        let err = DefinitionRegistry::from_definitions([
            MetricDefinition::new("uptime", MetricKind::Counter),
            MetricDefinition::new("cluster_size", MetricKind::Gauge).with_alias("uptime"),
        ])
        .unwrap_err();
        assert!(matches!(err, DefinitionError::AliasConflict { .. }));

        let err = DefinitionRegistry::from_definitions([
            MetricDefinition::new("a", MetricKind::Counter).with_alias("shared"),
            MetricDefinition::new("b", MetricKind::Gauge).with_alias("shared"),
        ])
        .unwrap_err();
        assert!(matches!(err, DefinitionError::AliasConflict { .. }));
    }

    #[test]
    fn test_invalid_label_rejected() {
        let err = DefinitionRegistry::from_definitions([
            MetricDefinition::new("uptime", MetricKind::Counter).with_labels(["bad-label"]),
        ])
        .unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidLabel { .. }));
    }

    #[test]
    fn test_builtin_definitions_load() {
        let reg = DefinitionRegistry::builtin().unwrap();
        assert!(!reg.is_empty());
        let def = reg.lookup("namespace", "memory_free_pct").unwrap();
        assert_eq!(def.kind, MetricKind::Gauge);
        assert_eq!(def.labels, vec!["cluster_name", "service", "ns"]);
        let def = reg.lookup("node_stats", "fabric_rw_recv_rate").unwrap();
        assert_eq!(def.labels, vec!["cluster_name", "service"]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = DefinitionRegistry::load("/nonexistent/definitions.toml").unwrap_err();
        assert!(matches!(err, DefinitionError::Io { .. }));
    }
}
