//! Metric model for the node stats exporter.
//!
//! Raw node statistics are flat `name=value` strings. This crate owns the
//! typed side of the translation: the [`MetricDefinition`]s loaded from a
//! definitions resource, the [`DefinitionRegistry`] that classifies a raw
//! stat name, and the [`Metric`] values handed to the exposition layer.

pub mod definition;
pub mod key;
pub mod metric;
pub mod registry;

pub use definition::{is_valid_label_name, DefinitionError, MetricDefinition};
pub use key::StatKey;
pub use metric::{LabelSet, Metric, MetricKind};
pub use registry::{normalize_stat_name, DefinitionRegistry};
