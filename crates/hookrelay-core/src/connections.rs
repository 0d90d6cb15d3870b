//! Live-connection table and payload fan-out.
//!
//! The table (tenant id to connection set) is the one piece of shared
//! mutable state touched by dispatch, transport events and the heartbeat
//! timer. A single coarse lock serializes mutations; sends happen on a
//! snapshot taken under the lock, never inside it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::{AdmissionError, Channel, ChannelMessage, TenantRegistry};

/// Stable identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection was removed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCause {
    /// The peer closed the transport.
    TransportClosed,
    /// The transport reported an error.
    TransportError,
    /// A send to the channel failed during dispatch.
    SendFailed,
    /// The supervisor gave up after the missed-probe threshold.
    HeartbeatTimeout,
    /// An administrator kicked the connection.
    AdminKick,
    /// The tenant was disabled or deleted.
    TenantRevoked,
    /// Process shutdown.
    Shutdown,
}

impl std::fmt::Display for DropCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TransportClosed => "transport_closed",
            Self::TransportError => "transport_error",
            Self::SendFailed => "send_failed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::AdminKick => "admin_kick",
            Self::TenantRevoked => "tenant_revoked",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Outcome of a payload dispatch, reported to the webhook caller as a
/// status value — delivery failures are not the caller's to recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryResult {
    /// At least one subscriber received the payload.
    Delivered {
        /// How many channels accepted the send.
        receivers: usize,
    },
    /// No live connection for the tenant.
    NoSubscriber,
    /// Connections existed but every send failed.
    SendFailed,
}

/// One live connection. Liveness fields are atomics so the heartbeat
/// supervisor can update them without the table lock.
pub(crate) struct ConnectionEntry {
    pub(crate) id: ConnectionId,
    pub(crate) tenant_id: String,
    pub(crate) channel: Arc<dyn Channel>,
    pub(crate) connected_at: DateTime<Utc>,
    /// Epoch millis of the last liveness signal.
    pub(crate) last_seen_ms: AtomicI64,
    /// Epoch millis of the outstanding probe; 0 means none outstanding.
    pub(crate) last_probe_ms: AtomicI64,
    pub(crate) missed_probes: AtomicU32,
}

impl ConnectionEntry {
    fn new(id: ConnectionId, tenant_id: String, channel: Arc<dyn Channel>) -> Self {
        Self {
            id,
            tenant_id,
            channel,
            connected_at: Utc::now(),
            last_seen_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            last_probe_ms: AtomicI64::new(0),
            missed_probes: AtomicU32::new(0),
        }
    }

    pub(crate) fn mark_alive(&self) {
        self.last_seen_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.last_probe_ms.store(0, Ordering::SeqCst);
        self.missed_probes.store(0, Ordering::SeqCst);
    }
}

/// Read-only view of a live connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub tenant_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub missed_probes: u32,
}

/// Per-tenant view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct TenantConnections {
    pub tenant_id: String,
    pub connection_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub connections: Vec<ConnectionSnapshot>,
}

/// Monotonic relay counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    total_accepted: AtomicU64,
    max_concurrent: AtomicU64,
    probes_sent: AtomicU64,
    probes_received: AtomicU64,
    dropped: AtomicU64,
}

/// Serializable view of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub active: usize,
    pub total_accepted: u64,
    pub max_concurrent: u64,
    pub probes_sent: u64,
    pub probes_received: u64,
    pub dropped: u64,
}

/// Owner of the live-connection table.
///
/// Connections for one tenant coexist up to the effective limit; a
/// replace-previous policy is the degenerate configuration of limit 1.
pub struct ConnectionManager {
    registry: Arc<TenantRegistry>,
    table: RwLock<HashMap<String, Vec<Arc<ConnectionEntry>>>>,
    next_id: AtomicU64,
    stats: ConnectionStats,
}

impl ConnectionManager {
    /// Create an empty table consulting `registry` for admission.
    #[must_use]
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self {
            registry,
            table: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: ConnectionStats::default(),
        }
    }

    /// Admit a transport connection for `tenant_id`.
    ///
    /// Checks run in order: the tenant must exist (connections never
    /// auto-provision tenants), must be enabled, and must be under its
    /// effective connection cap.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as an [`AdmissionError`].
    pub fn admit(
        &self,
        tenant_id: &str,
        channel: Arc<dyn Channel>,
    ) -> Result<ConnectionId, AdmissionError> {
        let record = self
            .registry
            .get(tenant_id)
            .ok_or(AdmissionError::UnknownTenant)?;
        if !record.enabled {
            return Err(AdmissionError::TenantDisabled);
        }
        let limit = record
            .max_connections
            .unwrap_or(self.registry.policy().max_connections_per_tenant);

        let mut table = self.table.write();
        let entries = table.entry(tenant_id.to_string()).or_default();
        if entries.len() >= limit as usize {
            return Err(AdmissionError::ConnectionLimitExceeded { limit });
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        entries.push(Arc::new(ConnectionEntry::new(
            id,
            tenant_id.to_string(),
            channel,
        )));

        let active: usize = table.values().map(Vec::len).sum();
        drop(table);

        self.stats.total_accepted.fetch_add(1, Ordering::SeqCst);
        self.stats
            .max_concurrent
            .fetch_max(active as u64, Ordering::SeqCst);

        tracing::info!(tenant = tenant_id, connection = %id, active, "connection admitted");
        Ok(id)
    }

    /// Deliver `payload` to every live connection of `tenant_id`.
    ///
    /// A send failure on one channel removes that channel only; siblings
    /// still receive the payload.
    pub fn dispatch(&self, tenant_id: &str, payload: &str) -> DeliveryResult {
        let targets: Vec<Arc<ConnectionEntry>> = self
            .table
            .read()
            .get(tenant_id)
            .map(|entries| entries.clone())
            .unwrap_or_default();

        if targets.is_empty() {
            return DeliveryResult::NoSubscriber;
        }

        let mut delivered = 0usize;
        let mut failed: Vec<ConnectionId> = Vec::new();
        for entry in &targets {
            match entry.channel.send(ChannelMessage::Text(payload.to_string())) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    tracing::warn!(
                        tenant = tenant_id,
                        connection = %entry.id,
                        %error,
                        "payload send failed"
                    );
                    failed.push(entry.id);
                }
            }
        }

        for id in failed {
            self.remove(id, DropCause::SendFailed);
        }

        if delivered > 0 {
            DeliveryResult::Delivered {
                receivers: delivered,
            }
        } else {
            DeliveryResult::SendFailed
        }
    }

    /// Remove one connection, closing its channel. Returns `false` if the
    /// connection was already gone, making racing evictions harmless.
    pub fn remove(&self, id: ConnectionId, cause: DropCause) -> bool {
        let mut table = self.table.write();
        let mut removed = None;
        for (tenant, entries) in table.iter_mut() {
            if let Some(index) = entries.iter().position(|entry| entry.id == id) {
                removed = Some((tenant.clone(), entries.swap_remove(index)));
                break;
            }
        }
        if let Some((tenant, _)) = &removed {
            if table.get(tenant).is_some_and(Vec::is_empty) {
                table.remove(tenant);
            }
        }
        drop(table);

        let Some((tenant, entry)) = removed else {
            return false;
        };
        entry.channel.close();
        self.stats.dropped.fetch_add(1, Ordering::SeqCst);
        tracing::info!(tenant = %tenant, connection = %id, %cause, "connection removed");
        true
    }

    /// Close and remove every connection of a tenant. Returns the count.
    pub fn evict_tenant(&self, tenant_id: &str, cause: DropCause) -> usize {
        let entries = self.table.write().remove(tenant_id).unwrap_or_default();
        for entry in &entries {
            entry.channel.close();
            self.stats.dropped.fetch_add(1, Ordering::SeqCst);
        }
        if !entries.is_empty() {
            tracing::info!(
                tenant = tenant_id,
                count = entries.len(),
                %cause,
                "tenant connections evicted"
            );
        }
        entries.len()
    }

    /// Close everything, e.g. on shutdown.
    pub fn evict_all(&self, cause: DropCause) -> usize {
        let tenants: Vec<String> = self.table.read().keys().cloned().collect();
        tenants
            .iter()
            .map(|tenant| self.evict_tenant(tenant, cause))
            .sum()
    }

    /// Live-connection count for one tenant.
    #[must_use]
    pub fn count(&self, tenant_id: &str) -> usize {
        self.table.read().get(tenant_id).map_or(0, Vec::len)
    }

    /// Total live connections.
    #[must_use]
    pub fn active(&self) -> usize {
        self.table.read().values().map(Vec::len).sum()
    }

    /// A liveness signal arrived for a connection (pong or client ping).
    pub fn record_liveness(&self, id: ConnectionId) {
        let entry = self.find(id);
        if let Some(entry) = entry {
            entry.mark_alive();
            self.stats.probes_received.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Per-tenant snapshot for the admin API, newest tenants last.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TenantConnections> {
        let table = self.table.read();
        let mut tenants: Vec<TenantConnections> = table
            .iter()
            .map(|(tenant_id, entries)| TenantConnections {
                tenant_id: tenant_id.clone(),
                connection_count: entries.len(),
                last_used: self.registry.get(tenant_id).and_then(|r| r.last_used),
                connections: entries.iter().map(|e| Self::snapshot_entry(e)).collect(),
            })
            .collect();
        drop(table);
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        tenants
    }

    /// Counter snapshot for health/dashboard endpoints.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            active: self.active(),
            total_accepted: self.stats.total_accepted.load(Ordering::SeqCst),
            max_concurrent: self.stats.max_concurrent.load(Ordering::SeqCst),
            probes_sent: self.stats.probes_sent.load(Ordering::SeqCst),
            probes_received: self.stats.probes_received.load(Ordering::SeqCst),
            dropped: self.stats.dropped.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn entries(&self) -> Vec<Arc<ConnectionEntry>> {
        self.table.read().values().flatten().cloned().collect()
    }

    pub(crate) fn note_probe_sent(&self) {
        self.stats.probes_sent.fetch_add(1, Ordering::SeqCst);
    }

    fn find(&self, id: ConnectionId) -> Option<Arc<ConnectionEntry>> {
        self.table
            .read()
            .values()
            .flatten()
            .find(|entry| entry.id == id)
            .cloned()
    }

    fn snapshot_entry(entry: &ConnectionEntry) -> ConnectionSnapshot {
        let last_seen_ms = entry.last_seen_ms.load(Ordering::SeqCst);
        ConnectionSnapshot {
            id: entry.id,
            tenant_id: entry.tenant_id.clone(),
            connected_at: entry.connected_at,
            last_seen: Utc
                .timestamp_millis_opt(last_seen_ms)
                .single()
                .unwrap_or_else(Utc::now),
            missed_probes: entry.missed_probes.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordingChannel, RegistryPolicy, TenantRecord};

    fn manager_with_tenant(id: &str, max_connections: Option<u32>) -> Arc<ConnectionManager> {
        let registry = Arc::new(TenantRegistry::in_memory(RegistryPolicy {
            max_connections_per_tenant: 5,
            ..RegistryPolicy::default()
        }));
        let mut record = TenantRecord::new();
        record.max_connections = max_connections;
        registry.upsert(id, record);
        Arc::new(ConnectionManager::new(registry))
    }

    #[test]
    fn admit_requires_existing_enabled_tenant() {
        let registry = Arc::new(TenantRegistry::in_memory(RegistryPolicy::default()));
        registry.upsert("off", TenantRecord::new().with_enabled(false));
        let manager = ConnectionManager::new(registry);

        assert_eq!(
            manager.admit("ghost", Arc::new(RecordingChannel::new())),
            Err(AdmissionError::UnknownTenant)
        );
        assert_eq!(
            manager.admit("off", Arc::new(RecordingChannel::new())),
            Err(AdmissionError::TenantDisabled)
        );
    }

    #[test]
    fn connection_cap_is_enforced() {
        let manager = manager_with_tenant("t", Some(2));

        let first = manager.admit("t", Arc::new(RecordingChannel::new())).unwrap();
        manager.admit("t", Arc::new(RecordingChannel::new())).unwrap();
        assert_eq!(
            manager.admit("t", Arc::new(RecordingChannel::new())),
            Err(AdmissionError::ConnectionLimitExceeded { limit: 2 })
        );

        // Evicting one frees a slot.
        assert!(manager.remove(first, DropCause::AdminKick));
        manager.admit("t", Arc::new(RecordingChannel::new())).unwrap();
        assert_eq!(manager.count("t"), 2);
    }

    #[test]
    fn dispatch_fans_out_to_all_connections() {
        let manager = manager_with_tenant("t", None);
        let a = Arc::new(RecordingChannel::new());
        let b = Arc::new(RecordingChannel::new());
        manager.admit("t", a.clone()).unwrap();
        manager.admit("t", b.clone()).unwrap();

        let result = manager.dispatch("t", r#"{"n":1}"#);
        assert_eq!(result, DeliveryResult::Delivered { receivers: 2 });
        assert_eq!(a.sent_count(), 1);
        assert_eq!(b.sent_count(), 1);
    }

    #[test]
    fn dispatch_isolates_failing_channel() {
        let manager = manager_with_tenant("t", None);
        let good_a = Arc::new(RecordingChannel::new());
        let bad = Arc::new(RecordingChannel::new());
        let good_b = Arc::new(RecordingChannel::new());
        manager.admit("t", good_a.clone()).unwrap();
        manager.admit("t", bad.clone()).unwrap();
        manager.admit("t", good_b.clone()).unwrap();
        bad.fail_sends(true);

        let result = manager.dispatch("t", "payload");
        assert_eq!(result, DeliveryResult::Delivered { receivers: 2 });
        assert_eq!(good_a.sent_count(), 1);
        assert_eq!(good_b.sent_count(), 1);
        // The failing channel is removed, siblings stay.
        assert_eq!(manager.count("t"), 2);
        assert!(bad.is_closed());
    }

    #[test]
    fn dispatch_without_subscribers() {
        let manager = manager_with_tenant("t", None);
        assert_eq!(manager.dispatch("t", "x"), DeliveryResult::NoSubscriber);
    }

    #[test]
    fn dispatch_all_sends_failing() {
        let manager = manager_with_tenant("t", None);
        let bad = Arc::new(RecordingChannel::new());
        manager.admit("t", bad.clone()).unwrap();
        bad.fail_sends(true);

        assert_eq!(manager.dispatch("t", "x"), DeliveryResult::SendFailed);
        assert_eq!(manager.count("t"), 0);
    }

    #[test]
    fn evict_tenant_closes_everything() {
        let manager = manager_with_tenant("t", None);
        let a = Arc::new(RecordingChannel::new());
        let b = Arc::new(RecordingChannel::new());
        manager.admit("t", a.clone()).unwrap();
        manager.admit("t", b.clone()).unwrap();

        assert_eq!(manager.evict_tenant("t", DropCause::TenantRevoked), 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(manager.count("t"), 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let manager = manager_with_tenant("t", None);
        let id = manager.admit("t", Arc::new(RecordingChannel::new())).unwrap();

        assert!(manager.remove(id, DropCause::AdminKick));
        assert!(!manager.remove(id, DropCause::HeartbeatTimeout));
    }

    #[test]
    fn stats_track_lifecycle() {
        let manager = manager_with_tenant("t", None);
        let id = manager.admit("t", Arc::new(RecordingChannel::new())).unwrap();
        manager.admit("t", Arc::new(RecordingChannel::new())).unwrap();
        manager.remove(id, DropCause::TransportClosed);

        let stats = manager.stats();
        assert_eq!(stats.total_accepted, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.max_concurrent, 2);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn liveness_signal_resets_missed_probes() {
        let manager = manager_with_tenant("t", None);
        let id = manager.admit("t", Arc::new(RecordingChannel::new())).unwrap();

        let entry = manager.find(id).unwrap();
        entry.missed_probes.store(2, Ordering::SeqCst);
        manager.record_liveness(id);
        assert_eq!(entry.missed_probes.load(Ordering::SeqCst), 0);
        assert_eq!(manager.stats().probes_received, 1);
    }
}
