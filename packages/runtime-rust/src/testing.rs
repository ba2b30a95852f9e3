//! In-memory collaborators for tests of code built on the runtime.

use std::sync::Arc;

use callflow_core::{Alert, AlertKind, AlertSink, AtomicErrorCounter};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::executor::Executor;

/// [`AlertSink`] that keeps every alert it receives.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far, oldest first.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    #[must_use]
    pub fn count_of(&self, kind: AlertKind) -> usize {
        self.alerts.lock().iter().filter(|a| a.kind == kind).count()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl AlertSink for RecordingAlertSink {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// An executor wired to recording collaborators.
#[derive(Debug, Clone)]
pub struct Harness {
    pub executor: Executor,
    pub alerts: Arc<RecordingAlertSink>,
    pub errors: Arc<AtomicErrorCounter>,
}

impl Harness {
    /// Harness with default configuration and jitter-free backoff.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let alerts = Arc::new(RecordingAlertSink::new());
        let errors = Arc::new(AtomicErrorCounter::new());
        let executor = Executor::new(alerts.clone(), errors.clone()).with_config(config);
        Self {
            executor,
            alerts,
            errors,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
