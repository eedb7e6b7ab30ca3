use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::definition::MetricDefinition;
use crate::key::StatKey;

/// Kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Can go up or down between samples.
    Gauge,
    /// Monotonically non-decreasing between resets.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered label pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a label, replacing the value if the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A classified stat ready for exposition.
///
/// Only built from a [`MetricDefinition`], so the kind and description always
/// come from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    name: String,
    kind: MetricKind,
    value: f64,
    labels: LabelSet,
    description: String,
    stat: StatKey,
    timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn from_definition(
        definition: &MetricDefinition,
        name: impl Into<String>,
        value: f64,
        labels: LabelSet,
        stat: StatKey,
    ) -> Self {
        Self {
            name: name.into(),
            kind: definition.kind,
            value,
            labels,
            description: definition.description.clone(),
            stat,
            timestamp: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The raw stat this metric was translated from.
    pub fn stat(&self) -> &StatKey {
        &self.stat
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
