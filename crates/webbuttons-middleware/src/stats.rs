//! [`PublishStats`] – what the republisher did with each publish decision.
//!
//! Transport failures never leave the republisher, so these counters are the
//! only way an operator can tell a healthy topic from a silently degraded
//! one.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lock-free counters plus the most recent delivery time and error.
#[derive(Debug, Default)]
pub struct PublishStats {
    attempts: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    open_failures: AtomicU64,
    close_failures: AtomicU64,
    last_delivered_at: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

/// Serializable point-in-time copy of [`PublishStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub skipped: u64,
    pub open_failures: u64,
    pub close_failures: u64,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PublishStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_delivered(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut at) = self.last_delivered_at.lock() {
            *at = Some(Utc::now());
        }
    }

    pub(crate) fn record_failed(&self, error: &str) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    /// A publish decision taken while the transport never opened.
    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_open_failure(&self, error: &str) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    pub(crate) fn record_close_failure(&self, error: &str) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(error);
    }

    /// Number of publishes the transport accepted.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of publishes the transport rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            last_delivered_at: self.last_delivered_at.lock().ok().and_then(|at| *at),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }

    fn set_last_error(&self, error: &str) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error.to_string());
        }
    }
}
