//! Inbound event routing.
//!
//! Every webhook POST lands here. The router decides whether the body is
//! a verification handshake (answered inline with a signed challenge) or
//! an application payload (fanned out to the tenant's live connections),
//! enforcing admission and stamping tenant usage on the way through.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use hookrelay_crypto::{SignatureRequest, SignatureResponse};

use crate::{
    ConnectionManager, DeliveryResult, RouterError, TenantRecord, TenantRegistry,
    VALIDATION_DISABLED_SIGNATURE,
};

/// Field names that identify a verification handshake in an inbound body.
///
/// Providers differ only in naming, so the shape is data rather than
/// code: the body must carry an object under `envelope_field` holding a
/// challenge token and a timestamp under the other two names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeExtractor {
    pub envelope_field: String,
    pub event_ts_field: String,
    pub plain_token_field: String,
}

impl Default for HandshakeExtractor {
    fn default() -> Self {
        Self {
            envelope_field: "d".to_string(),
            event_ts_field: "event_ts".to_string(),
            plain_token_field: "plain_token".to_string(),
        }
    }
}

impl HandshakeExtractor {
    /// Pull a challenge out of `body`, or `None` for ordinary payloads.
    ///
    /// Timestamps arrive as strings or integers depending on provider;
    /// both are accepted and canonicalized to the string form signed.
    #[must_use]
    pub fn extract(&self, body: &Value) -> Option<SignatureRequest> {
        let envelope = body.get(&self.envelope_field)?;
        let plain_token = envelope.get(&self.plain_token_field)?.as_str()?;
        let event_ts = match envelope.get(&self.event_ts_field)? {
            Value::String(ts) => ts.clone(),
            Value::Number(ts) => ts.to_string(),
            _ => return None,
        };
        Some(SignatureRequest {
            event_ts,
            plain_token: plain_token.to_string(),
        })
    }
}

/// Router behavior toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// When off, handshakes are answered with a fixed sentinel signature
    /// instead of a real one. Development aid only.
    pub validate_signatures: bool,
    pub extractor: HandshakeExtractor,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            validate_signatures: true,
            extractor: HandshakeExtractor::default(),
        }
    }
}

/// What the router did with an inbound body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterOutcome {
    /// The body was a verification handshake; reply with this challenge
    /// response.
    Handshake(SignatureResponse),
    /// The body was a payload; this is the fan-out result.
    Dispatched(DeliveryResult),
}

/// Entry point for inbound webhook events.
pub struct EventRouter {
    registry: Arc<TenantRegistry>,
    manager: Arc<ConnectionManager>,
    config: RouterConfig,
}

impl EventRouter {
    #[must_use]
    pub const fn new(
        registry: Arc<TenantRegistry>,
        manager: Arc<ConnectionManager>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            manager,
            config,
        }
    }

    /// Route one inbound body for the tenant identified by `tenant_id`.
    ///
    /// Handshakes are always answered, even for disabled or unprovisioned
    /// tenants: verification is a capability proof, not an admission
    /// decision. Onboarding is what admission mode gates, and a handshake
    /// never re-enables a disabled tenant. Payloads are admission-checked
    /// and only an admitted payload stamps `last_used` or reaches
    /// subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::AdmissionDenied`] for a payload whose tenant
    /// is unknown-and-not-allowed or disabled, and [`RouterError::Crypto`]
    /// if handshake signing fails.
    pub fn handle(&self, tenant_id: &str, body: &Value) -> Result<RouterOutcome, RouterError> {
        if let Some(challenge) = self.config.extractor.extract(body) {
            // Sign first: a failed handshake must not create or touch a
            // record.
            let response = self.answer_handshake(tenant_id, &challenge)?;
            self.onboard_if_unknown(tenant_id);
            self.registry.touch_last_used(tenant_id);
            tracing::info!(tenant = tenant_id, "handshake answered");
            return Ok(RouterOutcome::Handshake(response));
        }

        if !self.registry.is_admissible(tenant_id) {
            tracing::warn!(tenant = tenant_id, "payload denied");
            return Err(RouterError::AdmissionDenied);
        }
        self.registry.touch_last_used(tenant_id);
        let result = self.manager.dispatch(tenant_id, &body.to_string());
        tracing::debug!(tenant = tenant_id, ?result, "payload dispatched");
        Ok(RouterOutcome::Dispatched(result))
    }

    fn answer_handshake(
        &self,
        tenant_id: &str,
        challenge: &SignatureRequest,
    ) -> Result<SignatureResponse, RouterError> {
        if !self.config.validate_signatures {
            return Ok(SignatureResponse {
                plain_token: challenge.plain_token.clone(),
                signature: VALIDATION_DISABLED_SIGNATURE.to_string(),
            });
        }
        let response =
            hookrelay_crypto::sign(tenant_id, &challenge.event_ts, &challenge.plain_token)?;
        Ok(response)
    }

    fn onboard_if_unknown(&self, tenant_id: &str) {
        if self.registry.policy().require_manual_key_management
            || self.registry.contains(tenant_id)
        {
            return;
        }
        // The description records how trustworthy the onboarding was.
        let description = if self.config.validate_signatures {
            "auto-onboarded via verified handshake"
        } else {
            "auto-onboarded (signature validation disabled)"
        };
        tracing::info!(tenant = tenant_id, "onboarding new tenant");
        self.registry
            .upsert(tenant_id, TenantRecord::new().with_description(description));
    }
}
