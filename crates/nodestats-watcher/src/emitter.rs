//! Hand-off of classified metrics to the exposition side.
//!
//! The bounded channel is the only thing shared between collection and
//! exposition. A send first tries without waiting, then waits at most the
//! configured timeout; past that the metric is dropped with a warning so a
//! slow consumer cannot stall collection.
//!
//! Cycle markers are never dropped: a cycle reserves the slot for its marker
//! before it emits anything. If no slot frees up within the timeout the cycle
//! does not start and nothing of it reaches the channel.

use nodestats_metrics::Metric;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use crate::error::{WatcherError, WatcherResult};
use crate::stats::CycleSummary;

/// What travels on the output channel.
#[derive(Debug, Clone)]
pub enum CycleEvent {
    Metric(Metric),
    /// The cycle finished; no more metrics of this generation follow.
    EndOfCycle(CycleSummary),
    /// The cycle failed; metrics already received from it should be discarded.
    Aborted { context: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Sent,
    /// The channel stayed full past the send timeout.
    Dropped,
}

/// Create the bounded output channel.
pub fn channel(capacity: usize) -> (mpsc::Sender<CycleEvent>, mpsc::Receiver<CycleEvent>) {
    mpsc::channel(capacity.max(1))
}

/// A reserved channel slot for one cycle's terminal marker.
#[derive(Debug)]
pub struct CycleMarker {
    permit: mpsc::OwnedPermit<CycleEvent>,
}

impl CycleMarker {
    /// Send the end-of-cycle marker.
    pub fn finish(self, summary: CycleSummary) {
        self.permit.send(CycleEvent::EndOfCycle(summary));
    }

    /// Tell the consumer the cycle failed.
    pub fn abort(self, context: &str, reason: impl Into<String>) {
        self.permit.send(CycleEvent::Aborted {
            context: context.to_string(),
            reason: reason.into(),
        });
    }
}

/// Writes cycle events into the output channel. Cheap to clone; clones may
/// send concurrently.
#[derive(Debug, Clone)]
pub struct MetricEmitter {
    sender: mpsc::Sender<CycleEvent>,
    send_timeout: Duration,
}

impl MetricEmitter {
    pub fn new(sender: mpsc::Sender<CycleEvent>, send_timeout: Duration) -> Self {
        Self {
            sender,
            send_timeout,
        }
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub async fn emit(&self, metric: Metric) -> WatcherResult<EmitOutcome> {
        let metric = match self.sender.try_send(CycleEvent::Metric(metric)) {
            Ok(()) => return Ok(EmitOutcome::Sent),
            Err(TrySendError::Closed(_)) => return Err(WatcherError::ChannelClosed),
            Err(TrySendError::Full(event)) => event,
        };
        match self.sender.send_timeout(metric, self.send_timeout).await {
            Ok(()) => Ok(EmitOutcome::Sent),
            Err(SendTimeoutError::Timeout(CycleEvent::Metric(m))) => {
                tracing::warn!(
                    metric = m.name(),
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "output channel full, dropping"
                );
                Ok(EmitOutcome::Dropped)
            }
            Err(SendTimeoutError::Timeout(_)) => Ok(EmitOutcome::Dropped),
            Err(SendTimeoutError::Closed(_)) => Err(WatcherError::ChannelClosed),
        }
    }

    /// Reserve the slot for a cycle's terminal marker, waiting at most the
    /// send timeout.
    pub async fn reserve_marker(&self) -> WatcherResult<CycleMarker> {
        let reserve = self.sender.clone().reserve_owned();
        match tokio::time::timeout(self.send_timeout, reserve).await {
            Ok(Ok(permit)) => Ok(CycleMarker { permit }),
            Ok(Err(_)) => Err(WatcherError::ChannelClosed),
            Err(_) => Err(WatcherError::ChannelSaturated {
                timeout_ms: self.send_timeout.as_millis() as u64,
            }),
        }
    }

    /// Reserve a slot and send the end-of-cycle marker.
    pub async fn finish_cycle(&self, summary: CycleSummary) -> WatcherResult<()> {
        self.reserve_marker().await?.finish(summary);
        Ok(())
    }

    /// Tell the consumer the cycle failed. Best effort.
    pub async fn abort_cycle(&self, context: &str, reason: impl Into<String>) {
        match self.reserve_marker().await {
            Ok(marker) => marker.abort(context, reason),
            Err(e) => tracing::debug!(context, error = %e, "could not deliver abort marker"),
        }
    }
}
