//! Config file persistence with backup rotation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use hookrelay_core::{StoreError, TenantRecord, TenantStore};

use crate::{Config, ConfigError, ConfigResult, MAX_BACKUPS};

/// Owns the path of the config file and all reads and writes to it.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The config file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, healing as needed.
    ///
    /// A missing file is created with defaults. An unparseable file is
    /// set aside under an `.invalid-<timestamp>` suffix and replaced with
    /// defaults, so a bad edit never takes the relay down. Missing fields
    /// in a valid file deserialize to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] only for filesystem failures; parse
    /// failures are healed, not propagated.
    pub fn load(&self) -> ConfigResult<Config> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "config file missing, writing defaults");
                let config = Config::default();
                self.save(&config)?;
                return Ok(config);
            }
            Err(error) => return Err(ConfigError::Io(error)),
        };

        match serde_json::from_str(&raw) {
            Ok(config) => Ok(config),
            Err(error) => {
                let aside = self.set_aside_invalid()?;
                tracing::warn!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    %error,
                    "config file unreadable, replaced with defaults"
                );
                let config = Config::default();
                self.save(&config)?;
                Ok(config)
            }
        }
    }

    /// Write the config, rotating a backup of the previous file first.
    ///
    /// The write goes to a temp file in the same directory and is renamed
    /// into place, so readers never see a half-written file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if serialization or any filesystem step
    /// fails.
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        if self.path.exists() {
            self.rotate_backup()?;
        } else if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(config)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "config saved");
        Ok(())
    }

    /// Backup files for this config, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the directory cannot be read.
    pub fn backups(&self) -> ConfigResult<Vec<PathBuf>> {
        let Some(parent) = self.path.parent() else {
            return Ok(Vec::new());
        };
        let prefix = self.backup_prefix();

        let mut backups: Vec<PathBuf> = fs::read_dir(parent)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix))
            })
            .collect();
        // Timestamped names sort chronologically.
        backups.sort();
        backups.reverse();
        Ok(backups)
    }

    fn rotate_backup(&self) -> ConfigResult<()> {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let backup = self
            .path
            .with_file_name(format!("{}{timestamp}.json", self.backup_prefix()));
        fs::copy(&self.path, &backup)?;

        for stale in self.backups()?.into_iter().skip(MAX_BACKUPS) {
            if let Err(error) = fs::remove_file(&stale) {
                tracing::warn!(path = %stale.display(), %error, "failed to prune backup");
            }
        }
        Ok(())
    }

    fn backup_prefix(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("config");
        format!("{stem}.backup-")
    }

    fn set_aside_invalid(&self) -> ConfigResult<PathBuf> {
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let aside = self
            .path
            .with_file_name(format!(
                "{}.invalid-{timestamp}.json",
                self.path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or("config")
            ));
        fs::rename(&self.path, &aside)?;
        Ok(aside)
    }
}

/// [`TenantStore`] backed by the tenants section of the config file.
///
/// Mutations read the current file, replace the tenant table and save,
/// so concurrent admin edits to other sections are preserved.
#[derive(Debug, Clone)]
pub struct FileTenantStore {
    store: ConfigStore,
}

impl FileTenantStore {
    #[must_use]
    pub const fn new(store: ConfigStore) -> Self {
        Self { store }
    }
}

impl TenantStore for FileTenantStore {
    fn load(&self) -> Result<HashMap<String, TenantRecord>, StoreError> {
        self.store
            .load()
            .map(|config| config.tenants)
            .map_err(|error| StoreError(error.to_string()))
    }

    fn persist(&self, tenants: &HashMap<String, TenantRecord>) -> Result<(), StoreError> {
        let mut config = self
            .store
            .load()
            .map_err(|error| StoreError(error.to_string()))?;
        config.tenants = tenants.clone();
        self.store
            .save(&config)
            .map_err(|error| StoreError(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("config.json"))
    }

    #[test]
    fn missing_file_yields_defaults_and_creates_it() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let config = store.load().unwrap();
        assert_eq!(config, Config::default());
        assert!(store.path().exists());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut config = Config::default();
        config.server.port = 9000;
        config.security.require_manual_key_management = true;
        config
            .tenants
            .insert("secret-a".to_string(), TenantRecord::new());
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert!(loaded.security.require_manual_key_management);
        assert!(loaded.tenants.contains_key("secret-a"));
    }

    #[test]
    fn corrupt_file_is_set_aside_and_replaced() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{not json").unwrap();

        let config = store.load().unwrap();
        assert_eq!(config, Config::default());

        let aside: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".invalid-"))
            .collect();
        assert_eq!(aside.len(), 1);
        // The replacement parses.
        store.load().unwrap();
    }

    #[test]
    fn backups_rotate_and_stay_bounded() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut config = Config::default();

        for port in 0..8u16 {
            config.server.port = 3000 + port;
            store.save(&config).unwrap();
            // Distinct millisecond timestamps for distinct backup names.
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let backups = store.backups().unwrap();
        assert!(backups.len() <= MAX_BACKUPS);
        assert!(!backups.is_empty());

        // Newest backup holds the second-to-last save.
        let newest: Config =
            serde_json::from_str(&fs::read_to_string(&backups[0]).unwrap()).unwrap();
        assert_eq!(newest.server.port, 3006);
    }

    #[test]
    fn tenant_store_persists_through_config_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut config = Config::default();
        config.server.port = 4444;
        store.save(&config).unwrap();

        let tenant_store = FileTenantStore::new(store.clone());
        let mut tenants = HashMap::new();
        tenants.insert(
            "secret-b".to_string(),
            TenantRecord::new().with_description("from admin"),
        );
        tenant_store.persist(&tenants).unwrap();

        // Tenants landed without clobbering the rest of the file.
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.server.port, 4444);
        assert!(reloaded.tenants.contains_key("secret-b"));
        assert_eq!(tenant_store.load().unwrap().len(), 1);
    }
}
