//! Hookrelay Crypto - challenge signing for webhook verification
//!
//! Implements the upstream verification scheme: a per-tenant secret string
//! is stretched into a 32-byte Ed25519 seed, and the handshake challenge
//! (`event_ts || plain_token`) is signed with it. The same authority both
//! signs and verifies, so verification is recompute-and-compare — there is
//! no key exchange and no stored nonce.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod signer;

pub use error::*;
pub use signer::*;

/// Ed25519 seed size the secret is stretched to.
pub const DERIVED_KEY_SIZE: usize = 32;

/// Hex-encoded Ed25519 signature length (64 bytes).
pub const SIGNATURE_HEX_LEN: usize = 128;
