//! Consumer side of the metric channel.
//!
//! [`drain_cycle`] reads one cycle's worth of metrics, stopping at the
//! end-of-cycle marker. The drained metrics are then handed to an
//! [`Exporter`]:
//!
//! - `LogExporter`: Logs metrics via `tracing`.
//! - `ExpositionFileExporter`: Writes the text exposition to a file.
//! - `InMemoryExporter`: Keeps each export as a batch in memory.

use async_trait::async_trait;
use nodestats_metrics::Metric;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::emitter::CycleEvent;
use crate::stats::CycleSummary;

/// Metrics of one completed cycle.
#[derive(Debug, Clone)]
pub struct DrainedCycle {
    pub metrics: Vec<Metric>,
    pub summary: CycleSummary,
}

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    /// No channel activity for the whole safety timeout.
    #[error("no end-of-cycle marker after {idle:?} of inactivity ({received} metrics discarded)")]
    Timeout { idle: Duration, received: usize },

    #[error("metric channel closed")]
    Closed,

    #[error("cycle for `{context}` aborted: {reason}")]
    Aborted { context: String, reason: String },
}

/// Receive metrics until the end-of-cycle marker.
///
/// `idle_timeout` only guards against a producer that vanished mid-cycle;
/// it restarts on every received event. On any error the partial output is
/// discarded.
pub async fn drain_cycle(
    rx: &mut mpsc::Receiver<CycleEvent>,
    idle_timeout: Duration,
) -> Result<DrainedCycle, DrainError> {
    let mut metrics = Vec::new();
    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(CycleEvent::Metric(metric))) => metrics.push(metric),
            Ok(Some(CycleEvent::EndOfCycle(summary))) => {
                return Ok(DrainedCycle { metrics, summary });
            }
            Ok(Some(CycleEvent::Aborted { context, reason })) => {
                return Err(DrainError::Aborted { context, reason });
            }
            Ok(None) => return Err(DrainError::Closed),
            Err(_) => {
                return Err(DrainError::Timeout {
                    idle: idle_timeout,
                    received: metrics.len(),
                })
            }
        }
    }
}

/// Render metrics in the Prometheus text exposition format.
///
/// Samples sharing a name are grouped under one `# HELP`/`# TYPE` header,
/// in first-seen order.
pub fn render_exposition(metrics: &[Metric]) -> String {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Metric>> = HashMap::new();
    for metric in metrics {
        groups
            .entry(metric.name())
            .or_insert_with(|| {
                order.push(metric.name());
                Vec::new()
            })
            .push(metric);
    }

    let mut out = String::new();
    for name in order {
        let group = &groups[name];
        let first = group[0];
        out.push_str(&format!("# HELP {} {}\n", name, escape_help(first.description())));
        out.push_str(&format!("# TYPE {} {}\n", name, first.kind()));
        for metric in group {
            out.push_str(name);
            if !metric.labels().is_empty() {
                let pairs: Vec<String> = metric
                    .labels()
                    .iter()
                    .map(|(label, value)| format!("{}=\"{}\"", label, escape_label_value(value)))
                    .collect();
                out.push('{');
                out.push_str(&pairs.join(","));
                out.push('}');
            }
            out.push_str(&format!(" {}\n", metric.value()));
        }
    }
    out
}

fn escape_help(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Trait for exporting drained metrics to a backend.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Export one cycle's metrics.
    async fn export(&self, metrics: &[Metric]) -> Result<(), String>;
}

/// Exports metrics by logging them via tracing.
pub struct LogExporter;

#[async_trait]
impl Exporter for LogExporter {
    async fn export(&self, metrics: &[Metric]) -> Result<(), String> {
        for metric in metrics {
            tracing::info!(
                name = %metric.name(),
                kind = %metric.kind(),
                value = metric.value(),
                labels = ?metric.labels(),
                "metric"
            );
        }
        Ok(())
    }
}

/// Writes the text exposition of each export to a file, replacing the
/// previous content. The file is written next to the target and renamed
/// into place, so readers never see a half-written exposition.
pub struct ExpositionFileExporter {
    path: PathBuf,
}

impl ExpositionFileExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Exporter for ExpositionFileExporter {
    async fn export(&self, metrics: &[Metric]) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create directory: {}", e))?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, render_exposition(metrics))
            .map_err(|e| format!("failed to write {}: {}", tmp.display(), e))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| format!("failed to move exposition to {}: {}", self.path.display(), e))?;
        Ok(())
    }
}

/// Keeps every export as one batch, in call order. Used to inspect what
/// a run published without going through a file.
pub struct InMemoryExporter {
    batches: Mutex<Vec<Vec<Metric>>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Take all recorded batches, leaving none behind.
    pub fn take_batches(&self) -> Vec<Vec<Metric>> {
        std::mem::take(&mut *self.batches.lock())
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Metrics of the most recent export with the given name.
    pub fn latest(&self, name: &str) -> Vec<Metric> {
        self.batches
            .lock()
            .last()
            .map(|batch| batch.iter().filter(|m| m.name() == name).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for InMemoryExporter {
    async fn export(&self, metrics: &[Metric]) -> Result<(), String> {
        self.batches.lock().push(metrics.to_vec());
        Ok(())
    }
}
