//! Tenant records and the admission-policy registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// One subscriber identity, keyed by its opaque secret string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    /// Whether the tenant may connect and receive payloads.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Free-text note, e.g. how the tenant was provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Per-tenant connection cap; falls back to the registry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    /// When the record was created. Repaired to load time when a
    /// hand-edited config file omits it.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last successful handshake or payload dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

const fn default_enabled() -> bool {
    true
}

impl TenantRecord {
    /// Create an enabled record with the current timestamp.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            description: None,
            max_connections: None,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the per-tenant connection cap.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for TenantRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry-wide admission policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryPolicy {
    /// Whether unknown tenant ids are admissible (auto-onboarding mode).
    pub default_allow_new_connections: bool,

    /// Allow-list mode: unknown ids are never admissible, regardless of
    /// `default_allow_new_connections`, and handshakes never auto-onboard.
    pub require_manual_key_management: bool,

    /// Connection cap applied when a tenant has no explicit cap.
    pub max_connections_per_tenant: u32,
}

impl Default for RegistryPolicy {
    fn default() -> Self {
        Self {
            default_allow_new_connections: true,
            require_manual_key_management: false,
            max_connections_per_tenant: 5,
        }
    }
}

/// Persistence seam for tenant records.
///
/// The registry calls `persist` after every mutation. Persist failures are
/// logged, not propagated: a subscriber-facing request must not fail
/// because a config write did.
pub trait TenantStore: Send + Sync {
    /// Load all records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot be read.
    fn load(&self) -> Result<HashMap<String, TenantRecord>, StoreError>;

    /// Write all records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot be written.
    fn persist(&self, tenants: &HashMap<String, TenantRecord>) -> Result<(), StoreError>;
}

/// Volatile store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryTenantStore;

impl TenantStore for MemoryTenantStore {
    fn load(&self) -> Result<HashMap<String, TenantRecord>, StoreError> {
        Ok(HashMap::new())
    }

    fn persist(&self, _tenants: &HashMap<String, TenantRecord>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Aggregate counts over the tenant table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TenantStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    /// Used within the last 7 days.
    pub recently_used: usize,
    pub never_used: usize,
}

/// Stateful map of tenant id to record, with the dual-mode admission rule.
pub struct TenantRegistry {
    policy: RegistryPolicy,
    tenants: RwLock<HashMap<String, TenantRecord>>,
    store: Arc<dyn TenantStore>,
}

impl TenantRegistry {
    /// Open a registry backed by `store`, loading existing records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the initial load fails.
    pub fn open(policy: RegistryPolicy, store: Arc<dyn TenantStore>) -> Result<Self, StoreError> {
        let tenants = store.load()?;
        Ok(Self {
            policy,
            tenants: RwLock::new(tenants),
            store,
        })
    }

    /// Registry with no persistence, for tests and ephemeral use.
    #[must_use]
    pub fn in_memory(policy: RegistryPolicy) -> Self {
        Self {
            policy,
            tenants: RwLock::new(HashMap::new()),
            store: Arc::new(MemoryTenantStore),
        }
    }

    /// The registry-wide policy.
    #[must_use]
    pub const fn policy(&self) -> &RegistryPolicy {
        &self.policy
    }

    /// Fetch a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TenantRecord> {
        self.tenants.read().get(id).cloned()
    }

    /// Whether a record exists for the id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.tenants.read().contains_key(id)
    }

    /// All records, sorted by id for stable listings.
    #[must_use]
    pub fn list(&self) -> Vec<(String, TenantRecord)> {
        let mut entries: Vec<_> = self
            .tenants
            .read()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// The admission decision for an id.
    ///
    /// Known ids follow their `enabled` flag. Unknown ids follow
    /// `default_allow_new_connections`, unless manual key management is
    /// required, in which case they are never admissible.
    #[must_use]
    pub fn is_admissible(&self, id: &str) -> bool {
        if let Some(record) = self.tenants.read().get(id) {
            return record.enabled;
        }
        if self.policy.require_manual_key_management {
            return false;
        }
        self.policy.default_allow_new_connections
    }

    /// Connection cap in effect for an id.
    #[must_use]
    pub fn effective_limit(&self, id: &str) -> u32 {
        self.tenants
            .read()
            .get(id)
            .and_then(|record| record.max_connections)
            .unwrap_or(self.policy.max_connections_per_tenant)
    }

    /// Insert or replace a record.
    pub fn upsert(&self, id: impl Into<String>, record: TenantRecord) {
        let mut tenants = self.tenants.write();
        tenants.insert(id.into(), record);
        self.persist(&tenants);
    }

    /// Flip the enabled flag. Returns `false` for unknown ids.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut tenants = self.tenants.write();
        let Some(record) = tenants.get_mut(id) else {
            return false;
        };
        record.enabled = enabled;
        self.persist(&tenants);
        true
    }

    /// Delete a record. Returns `false` for unknown ids.
    pub fn remove(&self, id: &str) -> bool {
        let mut tenants = self.tenants.write();
        if tenants.remove(id).is_none() {
            return false;
        }
        self.persist(&tenants);
        true
    }

    /// Stamp `last_used` on an existing record; unknown ids are ignored.
    pub fn touch_last_used(&self, id: &str) {
        let mut tenants = self.tenants.write();
        let Some(record) = tenants.get_mut(id) else {
            return;
        };
        record.last_used = Some(Utc::now());
        self.persist(&tenants);
    }

    /// Aggregate counts for the admin dashboard.
    #[must_use]
    pub fn stats(&self) -> TenantStats {
        let tenants = self.tenants.read();
        let recent_cutoff = Utc::now() - Duration::days(7);

        let enabled = tenants.values().filter(|r| r.enabled).count();
        let recently_used = tenants
            .values()
            .filter(|r| r.last_used.is_some_and(|t| t > recent_cutoff))
            .count();
        let never_used = tenants.values().filter(|r| r.last_used.is_none()).count();

        TenantStats {
            total: tenants.len(),
            enabled,
            disabled: tenants.len() - enabled,
            recently_used,
            never_used,
        }
    }

    fn persist(&self, tenants: &HashMap<String, TenantRecord>) {
        if let Err(error) = self.store.persist(tenants) {
            tracing::warn!(%error, "failed to persist tenant records");
        }
    }
}
