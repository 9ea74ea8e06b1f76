//! Error types shared across layers.

use thiserror::Error;

/// Errors in the crypto layer.
///
/// Every variant raised on the receive path results in the datagram being
/// dropped; none of them tears down the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// ECDH produced a non-contributory (all-zero) shared secret.
    #[error("key agreement failed")]
    AgreementFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Keyed MAC did not match.
    #[error("MAC verification failed")]
    MacMismatch,

    /// Nonce already seen under this key.
    #[error("replay detected")]
    ReplayDetected,

    /// Sender timestamp outside the tolerance window.
    #[error("stale timestamp: {skew_ms}ms from local clock")]
    StaleTimestamp {
        /// Absolute distance from the local clock in milliseconds.
        skew_ms: u64,
    },

    /// No session key has been installed yet.
    #[error("no session key installed")]
    NoSessionKey,

    /// Ciphertext shorter than the fixed overhead.
    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),

    /// Nonce counter exhausted - key must be rotated.
    #[error("nonce counter exhausted - key must be rotated")]
    CounterExhaustion,
}

impl CryptoError {
    /// Check if this error indicates tampering or replay rather than a local
    /// condition.
    pub fn is_attack_indicator(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed
                | CryptoError::MacMismatch
                | CryptoError::ReplayDetected
                | CryptoError::StaleTimestamp { .. }
        )
    }
}
