//! Crypto error types.

/// Challenge signing errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The tenant secret is empty; no key can be derived from it.
    #[error("Cannot derive a signing key from an empty secret")]
    EmptySecret,
}

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
