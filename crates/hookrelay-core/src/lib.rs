//! Hookrelay Core - webhook-to-subscriber relay engine
//!
//! This crate owns the relay's real invariants:
//!
//! - **TenantRegistry**: secret-keyed tenant records with the dual-mode
//!   admission rule (auto-onboarding vs. allow-list).
//! - **ConnectionManager**: the live-connection table, per-tenant caps and
//!   fan-out dispatch with per-channel failure isolation.
//! - **HeartbeatSupervisor**: single-timer liveness probing and eviction.
//! - **EventRouter**: the inbound entry point that disambiguates
//!   verification handshakes from payloads.
//!
//! Transports plug in through the [`Channel`] trait; persistence plugs in
//! through [`TenantStore`]. Neither HTTP nor disk formats live here.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod channel;
mod connections;
mod error;
mod heartbeat;
mod router;
mod tenant;

pub use channel::*;
pub use connections::*;
pub use error::*;
pub use heartbeat::*;
pub use router::*;
pub use tenant::*;

/// Sentinel signature returned when signature validation is disabled.
pub const VALIDATION_DISABLED_SIGNATURE: &str = "signature_disabled";
