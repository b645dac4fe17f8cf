use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Monotonic counters for the lifetime of the process. Never reset.
#[derive(Debug, Default)]
pub struct DiagnosticsCounters {
    public_endpoint_401: AtomicU64,
    private_refresh_attempts: AtomicU64,
    refresh_successes: AtomicU64,
    refresh_failures: AtomicU64,
    forced_logouts: AtomicU64,
    last_refresh_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub public_endpoint_401_count: u64,
    pub private_refresh_attempt_count: u64,
    pub refresh_success_count: u64,
    pub refresh_failure_count: u64,
    pub forced_logout_count: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

impl DiagnosticsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_public_401(&self) {
        self.public_endpoint_401.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh_attempt(&self) {
        self.private_refresh_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh_success(&self) {
        self.refresh_successes.fetch_add(1, Ordering::Relaxed);
        let mut last = match self.last_refresh_at.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        *last = Some(Utc::now());
    }

    pub(crate) fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forced_logout(&self) {
        self.forced_logouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn public_endpoint_401_count(&self) -> u64 {
        self.public_endpoint_401.load(Ordering::Relaxed)
    }

    pub fn private_refresh_attempt_count(&self) -> u64 {
        self.private_refresh_attempts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let last_refresh_at = match self.last_refresh_at.lock() {
            Ok(g) => *g,
            Err(e) => *e.into_inner(),
        };
        DiagnosticsSnapshot {
            public_endpoint_401_count: self.public_endpoint_401_count(),
            private_refresh_attempt_count: self.private_refresh_attempt_count(),
            refresh_success_count: self.refresh_successes.load(Ordering::Relaxed),
            refresh_failure_count: self.refresh_failures.load(Ordering::Relaxed),
            forced_logout_count: self.forced_logouts.load(Ordering::Relaxed),
            last_refresh_at,
        }
    }
}
