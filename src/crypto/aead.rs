//! ChaCha20-Poly1305 sealing with an independent BLAKE2s MAC.
//!
//! Sealed body layout:
//! ```text
//! [ AEAD(timestamp (8, LE64) | payload) + tag (16) | MAC (16) ]
//! ```
//! The MAC covers `aad || timestamp || payload` under the MAC key, so a
//! packet must pass both the Poly1305 tag and the keyed MAC.

use std::time::Duration;

use blake2::digest::consts::U16;
use blake2::digest::{KeyInit, Mac};
use blake2::Blake2sMac;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::core::{
    CryptoError, AEAD_TAG_SIZE, MAC_SIZE, NONCE_SIZE, SESSION_KEY_SIZE, TIMESTAMP_SIZE,
};

use super::DirectionKeys;

type Blake2sMac128 = Blake2sMac<U16>;

/// Decrypted and authenticated packet contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Sender wall-clock milliseconds.
    pub timestamp_ms: u64,
    /// Application payload.
    pub payload: Vec<u8>,
}

fn mac_state(key: &[u8; SESSION_KEY_SIZE]) -> Blake2sMac128 {
    <Blake2sMac128 as KeyInit>::new_from_slice(key).expect("32-byte key is valid for BLAKE2s")
}

/// Compute the keyed MAC over the concatenation of `parts`.
pub fn authenticate(keys: &DirectionKeys, parts: &[&[u8]]) -> [u8; MAC_SIZE] {
    let mut mac = mac_state(keys.mac_key());
    for part in parts {
        Mac::update(&mut mac, part);
    }
    mac.finalize().into_bytes().into()
}

/// Verify a keyed MAC in constant time.
pub fn verify(keys: &DirectionKeys, parts: &[&[u8]], tag: &[u8]) -> Result<(), CryptoError> {
    let mut mac = mac_state(keys.mac_key());
    for part in parts {
        Mac::update(&mut mac, part);
    }
    mac.verify_slice(tag).map_err(|_| CryptoError::MacMismatch)
}

/// Encrypt `payload` prefixed with `timestamp_ms` and append the MAC.
pub fn seal(
    keys: &DirectionKeys,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    timestamp_ms: u64,
    payload: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut inner = Vec::with_capacity(TIMESTAMP_SIZE + payload.len());
    inner.extend_from_slice(&timestamp_ms.to_le_bytes());
    inner.extend_from_slice(payload);

    let cipher = ChaCha20Poly1305::new(keys.enc_key().into());
    let mut body = cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: &inner, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let tag = authenticate(keys, &[aad, &inner]);
    body.extend_from_slice(&tag);
    Ok(body)
}

/// Decrypt and authenticate a sealed body.
///
/// Checks the AEAD tag first, then the keyed MAC. Timestamp freshness is
/// left to [`check_timestamp`].
pub fn open(
    keys: &DirectionKeys,
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    body: &[u8],
) -> Result<Opened, CryptoError> {
    if body.len() < AEAD_TAG_SIZE + TIMESTAMP_SIZE + MAC_SIZE {
        return Err(CryptoError::Truncated(body.len()));
    }
    let (ciphertext, tag) = body.split_at(body.len() - MAC_SIZE);

    let cipher = ChaCha20Poly1305::new(keys.enc_key().into());
    let mut inner = cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)?;

    verify(keys, &[aad, &inner], tag)?;

    let mut ts = [0u8; TIMESTAMP_SIZE];
    ts.copy_from_slice(&inner[..TIMESTAMP_SIZE]);
    let payload = inner.split_off(TIMESTAMP_SIZE);

    Ok(Opened {
        timestamp_ms: u64::from_le_bytes(ts),
        payload,
    })
}

/// Reject timestamps further than `tolerance` from `now_ms` in either
/// direction.
pub fn check_timestamp(timestamp_ms: u64, now_ms: u64, tolerance: Duration) -> Result<(), CryptoError> {
    let skew_ms = timestamp_ms.abs_diff(now_ms);
    if skew_ms > tolerance.as_millis() as u64 {
        return Err(CryptoError::StaleTimestamp { skew_ms });
    }
    Ok(())
}
