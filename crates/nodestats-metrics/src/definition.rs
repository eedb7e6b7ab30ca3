use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::metric::MetricKind;

/// Describes how one raw stat is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Canonical stat name, as the node reports it.
    pub name: String,

    pub kind: MetricKind,

    #[serde(default)]
    pub description: String,

    /// Label names in exposition order.
    #[serde(default)]
    pub labels: Vec<String>,

    /// Other spellings of the stat that resolve to this definition.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Restricts the definition to one stat context (e.g. `namespace`).
    /// Unscoped definitions apply to every context.
    #[serde(default)]
    pub context: Option<String>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            labels: Vec::new(),
            aliases: Vec::new(),
            context: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn in_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// On-disk layout of a definitions resource: a list of `[[metric]]` tables.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DefinitionFile {
    #[serde(default)]
    pub metric: Vec<MetricDefinition>,
}

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("failed to read definitions from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse definitions: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("definition has an empty name")]
    EmptyName,

    #[error("duplicate definition for `{name}`")]
    Duplicate { name: String },

    #[error("alias `{alias}` of `{name}` is already taken by `{existing}`")]
    AliasConflict {
        alias: String,
        name: String,
        existing: String,
    },

    #[error("definition `{name}` has invalid label name `{label}`")]
    InvalidLabel { name: String, label: String },
}

/// Label names follow the usual exposition rules: `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Label names follow `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
