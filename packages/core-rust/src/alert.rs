//! User-visible alert dispatch and the process-wide error counter.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Success,
    Error,
}

/// A message for the user, handed to an [`AlertSink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub title: String,
    pub message: String,
    /// Persistent alerts stay visible until dismissed.
    pub persistent: bool,
}

impl Alert {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Success,
            title: title.into(),
            message: message.into(),
            persistent: false,
        }
    }

    /// Error alerts are persistent unless changed with [`Alert::persistent`].
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Error,
            title: title.into(),
            message: message.into(),
            persistent: true,
        }
    }

    #[must_use]
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }
}

/// Destination for user-visible messages (toasts, banners, logs).
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Sink that discards every alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAlertSink;

impl AlertSink for NoopAlertSink {
    fn notify(&self, _alert: Alert) {}
}

/// Increment-only counter of operation failures across all sessions.
pub trait ErrorCounter: Send + Sync {
    fn increment(&self);

    fn count(&self) -> u64;
}

/// In-memory [`ErrorCounter`].
#[derive(Debug, Default)]
pub struct AtomicErrorCounter {
    count: AtomicU64,
}

impl AtomicErrorCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ErrorCounter for AtomicErrorCounter {
    fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_alerts_default_to_persistent() {
        assert!(Alert::error("Error", "boom").persistent);
        assert!(!Alert::success("Saved", "ok").persistent);
        assert!(!Alert::error("Error", "boom").persistent(false).persistent);
    }

    #[test]
    fn atomic_counter_counts() {
        let counter = AtomicErrorCounter::new();
        counter.increment();
        counter.increment();
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn alert_serializes_kind_in_snake_case() {
        let json = serde_json::to_value(Alert::success("Saved", "Visitor checked in")).unwrap();
        assert_eq!(json["kind"], "success");
        assert_eq!(json["persistent"], false);
    }
}
