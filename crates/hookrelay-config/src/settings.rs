//! Configuration schema.
//!
//! Every section and every field carries a serde default, so a partial or
//! outdated file deserializes into a complete config. That is the whole
//! repair story: load, fill gaps, save back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use hookrelay_core::{HandshakeExtractor, HeartbeatConfig, RegistryPolicy, RouterConfig, TenantRecord};

/// HTTP listener binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for the TCP listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Admission and handshake policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Sign handshake challenges for real; off returns a sentinel.
    pub validate_signatures: bool,
    /// Admit tenants never seen before.
    pub default_allow_new_connections: bool,
    /// Allow-list mode: only explicitly provisioned tenants, ever.
    pub require_manual_key_management: bool,
    /// Connection cap for tenants without their own.
    pub max_connections_per_tenant: u32,
    /// Field names identifying a handshake body.
    pub handshake: HandshakeExtractor,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            validate_signatures: true,
            default_allow_new_connections: true,
            require_manual_key_management: false,
            max_connections_per_tenant: 5,
            handshake: HandshakeExtractor::default(),
        }
    }
}

impl SecurityConfig {
    /// The registry policy slice of this section.
    #[must_use]
    pub const fn registry_policy(&self) -> RegistryPolicy {
        RegistryPolicy {
            default_allow_new_connections: self.default_allow_new_connections,
            require_manual_key_management: self.require_manual_key_management,
            max_connections_per_tenant: self.max_connections_per_tenant,
        }
    }

    /// The router configuration slice of this section.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            validate_signatures: self.validate_signatures,
            extractor: self.handshake.clone(),
        }
    }
}

/// Log output tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` overrides it.
    pub level: String,
    /// Emit JSON lines instead of the human format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Root of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub heartbeat: HeartbeatConfig,
    pub logging: LoggingConfig,
    /// Tenant table, keyed by secret. Mutated at runtime through the
    /// registry and written back on every change.
    pub tenants: HashMap<String, TenantRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:3000");
        assert!(config.security.validate_signatures);
        assert!(config.security.default_allow_new_connections);
        assert!(!config.security.require_manual_key_management);
        assert_eq!(config.security.max_connections_per_tenant, 5);
        assert!(!config.heartbeat.enabled);
        assert_eq!(config.heartbeat.interval_ms, 30_000);
        assert_eq!(config.heartbeat.probe_timeout_ms, 5_000);
        assert_eq!(config.heartbeat.max_missed, 3);
        assert_eq!(config.logging.level, "info");
        assert!(config.tenants.is_empty());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let json = r#"{"server": {"port": 8080}, "security": {"require_manual_key_management": true}}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.security.require_manual_key_management);
        assert_eq!(config.security.max_connections_per_tenant, 5);
        assert_eq!(config.heartbeat.max_missed, 3);
    }

    #[test]
    fn policy_and_router_slices() {
        let security = SecurityConfig {
            validate_signatures: false,
            require_manual_key_management: true,
            ..SecurityConfig::default()
        };

        let policy = security.registry_policy();
        assert!(policy.require_manual_key_management);
        assert_eq!(policy.max_connections_per_tenant, 5);

        let router = security.router_config();
        assert!(!router.validate_signatures);
        assert_eq!(router.extractor.envelope_field, "d");
    }
}
