//! Security layer.
//!
//! Implements the cryptographic primitives of the transport:
//! - X25519 ephemeral key agreement and per-direction HKDF-SHA256 keys
//! - ChaCha20-Poly1305 AEAD with an independent BLAKE2s MAC
//! - Nonce construction (random prefix + per-connection counter)
//! - Bounded FIFO replay guard
//! - Key rotation schedule and old-key retention

mod aead;
mod keys;
mod nonce;
mod rekey;
mod replay;
mod session;

pub use aead::{authenticate, check_timestamp, open, seal, verify, Opened};
pub use keys::{
    ConnectionId, ConnectionIdHasher, DirectionKeys, EphemeralKeypair, Role, SessionKeys,
    SessionToken, SharedSecret,
};
pub use nonce::{nonce_counter, NonceGenerator};
pub use rekey::{OldKeyRetention, RotationSchedule};
pub use replay::BoundedSet;
pub use session::CryptoSession;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch.
///
/// Used for sender timestamps; a clock before 1970 reads as zero.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
