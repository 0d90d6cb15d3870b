//! Recent admission decisions, kept for the admin API.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Which surface the decision was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionSurface {
    Webhook,
    WebSocket,
}

/// One admission decision.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionEntry {
    pub at: DateTime<Utc>,
    pub tenant_id: String,
    pub surface: AdmissionSurface,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Bounded in-memory log of admission decisions, newest first.
pub struct AdmissionLog {
    entries: Mutex<VecDeque<AdmissionEntry>>,
    capacity: usize,
}

impl AdmissionLog {
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn record(
        &self,
        tenant_id: &str,
        surface: AdmissionSurface,
        allowed: bool,
        reason: Option<String>,
    ) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_back();
        }
        entries.push_front(AdmissionEntry {
            at: Utc::now(),
            tenant_id: tenant_id.to_string(),
            surface,
            allowed,
            reason,
        });
    }

    /// Entries, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AdmissionEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_and_bounded() {
        let log = AdmissionLog::new(3);
        for i in 0..5 {
            log.record(&format!("t{i}"), AdmissionSurface::Webhook, true, None);
        }

        let entries = log.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].tenant_id, "t4");
        assert_eq!(entries[2].tenant_id, "t2");
    }

    #[test]
    fn records_denials_with_reason() {
        let log = AdmissionLog::new(10);
        log.record(
            "t",
            AdmissionSurface::WebSocket,
            false,
            Some("Tenant is disabled".to_string()),
        );

        let entries = log.snapshot();
        assert!(!entries[0].allowed);
        assert_eq!(entries[0].reason.as_deref(), Some("Tenant is disabled"));
    }
}
