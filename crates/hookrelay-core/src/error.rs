//! Core error types.

use hookrelay_crypto::CryptoError;

/// Connection-level admission rejections.
///
/// These are user-actionable and reported to the transport as distinct
/// statuses; they are never retried by the core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// No tenant record exists for the id. Connections never auto-create
    /// tenants; a handshake must have provisioned one first.
    #[error("Unknown tenant: verify via webhook handshake first")]
    UnknownTenant,

    /// The tenant exists but is disabled.
    #[error("Tenant is disabled")]
    TenantDisabled,

    /// The tenant is at its connection cap.
    #[error("Connection limit of {limit} reached")]
    ConnectionLimitExceeded {
        /// Effective limit that was hit.
        limit: u32,
    },
}

/// Event-routing failures.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Payload-path rejection. Deliberately collapses unknown and disabled
    /// tenants into one reason so the webhook caller cannot probe for
    /// tenant existence.
    #[error("Tenant disabled or not found")]
    AdmissionDenied,

    /// Handshake signing failed. Fatal to the request, never swallowed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Tenant persistence failure, surfaced by [`crate::TenantStore`] backends.
#[derive(Debug, thiserror::Error)]
#[error("Tenant store failure: {0}")]
pub struct StoreError(pub String);
