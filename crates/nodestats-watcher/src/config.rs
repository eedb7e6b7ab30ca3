//! Configuration for the stats exporter.

use nodestats_config::{from_toml_value, Config, ConfigError};
use nodestats_logging::LogConfig;
use nodestats_metrics::is_valid_label_name;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::filter::FilterEngine;
use crate::resolver::{NAMESPACE_CONTEXT, NODE_STATS_CONTEXT};

/// Top-level exporter configuration.
///
/// Controls metric naming, the output channel, filtering, the node identity
/// used for labels, and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Prefix of every published metric name.
    #[serde(default = "default_metric_prefix")]
    pub metric_prefix: String,

    /// Capacity of the bounded metric channel. One slot is held for the
    /// cycle marker, so at least 2.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// How long an emit may wait on a full channel before the metric is dropped.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Interval between collection cycles.
    #[serde(default = "default_scrape_interval_secs")]
    pub scrape_interval_secs: u64,

    /// How long a consumer waits for channel activity before giving up on a cycle.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Metric definitions resource. Uses the built-in set if unset.
    #[serde(default)]
    pub definitions_path: Option<PathBuf>,

    /// Where to write the rendered exposition. Logs the metrics if unset.
    #[serde(default)]
    pub output_path: Option<PathBuf>,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_metric_prefix() -> String {
    "aerospike".to_string()
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_send_timeout_ms() -> u64 {
    500
}

fn default_scrape_interval_secs() -> u64 {
    15
}

fn default_drain_timeout_ms() -> u64 {
    1000
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            metric_prefix: default_metric_prefix(),
            channel_capacity: default_channel_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            scrape_interval_secs: default_scrape_interval_secs(),
            drain_timeout_ms: default_drain_timeout_ms(),
            definitions_path: None,
            output_path: None,
            node: NodeConfig::default(),
            filter: FilterConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl ExporterConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Config for ExporterConfig {
    fn from_toml(value: &toml::Value) -> Result<Self, ConfigError> {
        from_toml_value(value)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.metric_prefix.is_empty()
            || !self
                .metric_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::invalid(
                "metric_prefix",
                "must be non-empty and contain only [a-zA-Z0-9_]",
            ));
        }
        if self.channel_capacity < 2 {
            return Err(ConfigError::invalid("channel_capacity", "must be at least 2"));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::invalid("send_timeout_ms", "must be positive"));
        }
        if self.scrape_interval_secs == 0 {
            return Err(ConfigError::invalid("scrape_interval_secs", "must be positive"));
        }
        if self.drain_timeout_ms == 0 {
            return Err(ConfigError::invalid("drain_timeout_ms", "must be positive"));
        }
        self.node.validate()?;
        self.filter.validate()
    }
}

/// Identity of the monitored node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Service address, published as the `service` label.
    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default)]
    pub cluster_name: Option<String>,

    /// Stat contexts to collect.
    #[serde(default = "default_contexts")]
    pub contexts: Vec<String>,

    /// Static labels added to every metric.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

fn default_service() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_contexts() -> Vec<String> {
    vec![NODE_STATS_CONTEXT.to_string(), NAMESPACE_CONTEXT.to_string()]
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            cluster_name: None,
            contexts: default_contexts(),
            labels: BTreeMap::new(),
        }
    }
}

impl NodeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::invalid("node.service", "must not be empty"));
        }
        if let Some(ctx) = self
            .contexts
            .iter()
            .find(|c| c.as_str() != NODE_STATS_CONTEXT && c.as_str() != NAMESPACE_CONTEXT)
        {
            return Err(ConfigError::invalid(
                "node.contexts",
                format!("unknown stat context `{}`", ctx),
            ));
        }
        if let Some(name) = self.labels.keys().find(|n| !is_valid_label_name(n)) {
            return Err(ConfigError::invalid(
                "node.labels",
                format!("`{}` is not a valid label name", name),
            ));
        }
        Ok(())
    }
}

/// What the filter does with keys no rule speaks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterDefault {
    /// Publish (fail-open).
    #[default]
    Allow,
    /// Drop (fail-closed).
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Allow,
    Deny,
}

/// Which keys a rule governs: every context, or one stat context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterScope {
    Global,
    Context(String),
}

impl From<String> for FilterScope {
    fn from(s: String) -> Self {
        if s.is_empty() || s == "global" {
            FilterScope::Global
        } else {
            FilterScope::Context(s)
        }
    }
}

impl From<FilterScope> for String {
    fn from(scope: FilterScope) -> Self {
        match scope {
            FilterScope::Global => "global".to_string(),
            FilterScope::Context(ctx) => ctx,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(default = "default_scope")]
    pub scope: FilterScope,
    pub mode: FilterMode,
    pub patterns: Vec<String>,
}

fn default_scope() -> FilterScope {
    FilterScope::Global
}

impl FilterRule {
    pub fn allow<I, S>(scope: FilterScope, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope,
            mode: FilterMode::Allow,
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn deny<I, S>(scope: FilterScope, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope,
            mode: FilterMode::Deny,
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Allow/deny rules controlling which stats are published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub default: FilterDefault,

    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

impl FilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.patterns.is_empty() {
                return Err(ConfigError::invalid(
                    "filter.rules",
                    format!("{:?} rule for {:?} has no patterns", rule.mode, rule.scope),
                ));
            }
            if !seen.insert((&rule.scope, rule.mode)) {
                return Err(ConfigError::invalid(
                    "filter.rules",
                    format!("more than one {:?} rule for {:?}", rule.mode, rule.scope),
                ));
            }
        }
        FilterEngine::new(self)
            .map(|_| ())
            .map_err(|e| ConfigError::invalid("filter.rules", e.to_string()))
    }
}
