//! Deterministic challenge signing.
//!
//! The signing key is derived from the tenant secret alone, so the same
//! `(secret, event_ts, plain_token)` triple always yields the same
//! signature and verification needs no shared state.

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};

use crate::{CryptoError, CryptoResult, DERIVED_KEY_SIZE};

/// Handshake challenge carried by a verification event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    /// Timestamp string from the event source.
    pub event_ts: String,
    /// One-shot plaintext token to sign.
    pub plain_token: String,
}

/// Response to a handshake challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// Echo of the challenge token.
    pub plain_token: String,
    /// Lowercase hex Ed25519 signature over `event_ts || plain_token`.
    pub signature: String,
}

/// Stretch a secret into an Ed25519 seed.
///
/// The secret's UTF-8 bytes are repeated until at least
/// [`DERIVED_KEY_SIZE`] bytes are available, then truncated to exactly
/// that length. The same secret always derives the same seed.
///
/// # Errors
///
/// Returns [`CryptoError::EmptySecret`] if the secret has no bytes.
pub fn derive_seed(secret: &str) -> CryptoResult<[u8; DERIVED_KEY_SIZE]> {
    let bytes = secret.as_bytes();
    if bytes.is_empty() {
        return Err(CryptoError::EmptySecret);
    }

    let mut seed = [0u8; DERIVED_KEY_SIZE];
    for (i, slot) in seed.iter_mut().enumerate() {
        *slot = bytes[i % bytes.len()];
    }
    Ok(seed)
}

/// Sign a handshake challenge with the key derived from `secret`.
///
/// The message is the concatenation of `event_ts` and `plain_token` with
/// no separator.
///
/// # Errors
///
/// Returns [`CryptoError::EmptySecret`] if no key can be derived.
pub fn sign(secret: &str, event_ts: &str, plain_token: &str) -> CryptoResult<SignatureResponse> {
    let seed = derive_seed(secret)?;
    let key = SigningKey::from_bytes(&seed);

    let mut message = Vec::with_capacity(event_ts.len() + plain_token.len());
    message.extend_from_slice(event_ts.as_bytes());
    message.extend_from_slice(plain_token.as_bytes());

    let signature = key.sign(&message);
    Ok(SignatureResponse {
        plain_token: plain_token.to_string(),
        signature: hex::encode(signature.to_bytes()),
    })
}

/// Verify a signature by recomputing it.
///
/// Degrades to `false` on any internal failure; verification is only ever
/// observable as a boolean.
#[must_use]
pub fn verify(secret: &str, event_ts: &str, plain_token: &str, signature: &str) -> bool {
    match sign(secret, event_ts, plain_token) {
        Ok(expected) => expected.signature == signature,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SIGNATURE_HEX_LEN;

    #[test]
    fn sign_is_deterministic() {
        let a = sign("secret", "1700000000", "token").unwrap();
        let b = sign("secret", "1700000000", "token").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let response = sign("my-secret", "1700000000", "tok").unwrap();
        assert!(verify("my-secret", "1700000000", "tok", &response.signature));
    }

    #[test]
    fn verify_rejects_tampered_signature() {
        let response = sign("my-secret", "1700000000", "tok").unwrap();
        let mut tampered = response.signature.into_bytes();
        tampered[0] = if tampered[0] == b'a' { b'b' } else { b'a' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(!verify("my-secret", "1700000000", "tok", &tampered));
    }

    #[test]
    fn verify_rejects_varied_inputs() {
        let sig = sign("s", "ts", "tok").unwrap().signature;
        assert!(verify("s", "ts", "tok", &sig));
        assert!(!verify("other", "ts", "tok", &sig));
        assert!(!verify("s", "ts2", "tok", &sig));
        assert!(!verify("s", "ts", "tok2", &sig));
    }

    #[test]
    fn verify_never_panics_on_garbage() {
        assert!(!verify("s", "ts", "tok", "not even hex"));
        assert!(!verify("s", "ts", "tok", ""));
        assert!(!verify("", "ts", "tok", "deadbeef"));
    }

    #[test]
    fn short_secret_derives_full_seed() {
        let seed = derive_seed("abc").unwrap();
        assert_eq!(seed.len(), DERIVED_KEY_SIZE);
        // "abc" cycled: a b c a b c ...
        assert_eq!(&seed[..6], b"abcabc");
        assert_eq!(seed, derive_seed("abc").unwrap());
    }

    #[test]
    fn long_secret_truncates_to_seed() {
        let long = "x".repeat(100);
        let seed = derive_seed(&long).unwrap();
        assert_eq!(seed, [b'x'; DERIVED_KEY_SIZE]);
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(derive_seed(""), Err(CryptoError::EmptySecret)));
        assert!(matches!(
            sign("", "ts", "tok"),
            Err(CryptoError::EmptySecret)
        ));
    }

    #[test]
    fn end_to_end_challenge() {
        let response = sign("s3cr3t", "1700000000", "abcd1234").unwrap();

        assert_eq!(response.plain_token, "abcd1234");
        assert_eq!(response.signature.len(), SIGNATURE_HEX_LEN);
        assert!(
            response
                .signature
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );

        assert!(verify("s3cr3t", "1700000000", "abcd1234", &response.signature));
        assert!(!verify("s3cr3t", "1700000000", "abcd9999", &response.signature));
    }
}
