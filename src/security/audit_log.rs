use tracing::{info, warn};

/// Session lifecycle events, emitted on the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn session_seeded(&self, has_access: bool, has_refresh: bool, has_user: bool) {
        info!(target: "audit", event = "session_seeded", has_access, has_refresh, has_user);
    }

    pub fn session_cleared(&self, reason: &str) {
        info!(target: "audit", event = "session_cleared", reason);
    }

    pub fn refresh_started(&self, path: &str) {
        info!(target: "audit", event = "refresh_started", path);
    }

    pub fn refresh_succeeded(&self, path: &str, waiters: usize, rotated: bool) {
        info!(target: "audit", event = "refresh_succeeded", path, waiters, rotated);
    }

    pub fn refresh_failed(&self, path: &str, waiters: usize, error: &str) {
        warn!(target: "audit", event = "refresh_failed", path, waiters, error);
    }

    pub fn forced_logout(&self, path: &str, status: Option<u16>, reason: &str) {
        warn!(target: "audit", event = "forced_logout", path, status = status.unwrap_or(0), reason);
    }

    pub fn public_unauthorized(&self, path: &str) {
        warn!(target: "audit", event = "public_unauthorized", path);
    }
}
