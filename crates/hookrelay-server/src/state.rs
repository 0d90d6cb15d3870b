//! Shared application state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use hookrelay_config::{Config, ConfigStore, FileTenantStore};
use hookrelay_core::{ConnectionManager, EventRouter, StoreError, TenantRegistry};

use crate::admissions::AdmissionLog;

/// How many admission decisions the admin API can look back on.
const ADMISSION_LOG_CAPACITY: usize = 100;

/// Everything the handlers share. Cheap to clone; all fields are `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TenantRegistry>,
    pub manager: Arc<ConnectionManager>,
    pub router: Arc<EventRouter>,
    pub admissions: Arc<AdmissionLog>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build state backed by the config file: tenants load from and
    /// persist to its tenants section.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the tenant table cannot be loaded.
    pub fn open(config: &Config, store: ConfigStore) -> Result<Self, StoreError> {
        let tenant_store = Arc::new(FileTenantStore::new(store));
        let registry = Arc::new(TenantRegistry::open(
            config.security.registry_policy(),
            tenant_store,
        )?);
        Ok(Self::with_registry(config, registry))
    }

    /// State with no persistence, for tests.
    #[cfg(test)]
    #[must_use]
    pub fn in_memory(config: &Config) -> Self {
        let registry = Arc::new(TenantRegistry::in_memory(config.security.registry_policy()));
        Self::with_registry(config, registry)
    }

    fn with_registry(config: &Config, registry: Arc<TenantRegistry>) -> Self {
        let manager = Arc::new(ConnectionManager::new(registry.clone()));
        let router = Arc::new(EventRouter::new(
            registry.clone(),
            manager.clone(),
            config.security.router_config(),
        ));
        Self {
            registry,
            manager,
            router,
            admissions: Arc::new(AdmissionLog::new(ADMISSION_LOG_CAPACITY)),
            started_at: Utc::now(),
        }
    }
}
