//! Production collaborators: an alert sink that logs through `tracing` and an
//! error counter that also feeds the `metrics` recorder.

use std::sync::atomic::{AtomicU64, Ordering};

use callflow_core::{Alert, AlertKind, AlertSink, ErrorCounter};
use tracing::{info, warn};

/// [`AlertSink`] that writes every alert as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: Alert) {
        match alert.kind {
            AlertKind::Success => info!(
                title = %alert.title,
                persistent = alert.persistent,
                "{}",
                alert.message
            ),
            AlertKind::Error => warn!(
                title = %alert.title,
                persistent = alert.persistent,
                "{}",
                alert.message
            ),
        }
    }
}

/// [`ErrorCounter`] backed by an atomic that also increments the
/// `callflow_operation_errors_total` counter.
#[derive(Debug, Default)]
pub struct MetricsErrorCounter {
    count: AtomicU64,
}

impl MetricsErrorCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorCounter for MetricsErrorCounter {
    fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("callflow_operation_errors_total").increment(1);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_counter_counts_without_a_recorder() {
        let counter = MetricsErrorCounter::new();
        counter.increment();
        counter.increment();
        counter.increment();
        assert_eq!(counter.count(), 3);
    }

    #[test]
    fn tracing_sink_accepts_both_kinds() {
        let sink = TracingAlertSink;
        sink.notify(Alert::success("Saved", "Visitor checked in"));
        sink.notify(Alert::error("Error", "Could not reach the server"));
    }
}
