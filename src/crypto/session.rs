//! Crypto session management with replay protection.
//!
//! Combines the primitives into a per-connection [`CryptoSession`] that
//! handles:
//! - Session key installation and rotation (with old-key retention)
//! - Nonce generation
//! - Sealing and opening packet bodies
//! - Nonce replay rejection and timestamp freshness

use std::time::{Duration, Instant};

use crate::core::{CryptoError, MAC_SIZE, MAX_RECENT_SEQUENCES, NONCE_SIZE, TIMESTAMP_TOLERANCE};

use super::{
    aead::{self, Opened},
    nonce::NonceGenerator,
    rekey::OldKeyRetention,
    replay::BoundedSet,
    SessionKeys,
};

/// Per-connection cryptographic state.
///
/// Empty until a handshake installs the first key. Never shared across
/// threads without the owning connection's lock.
#[derive(Debug)]
pub struct CryptoSession {
    /// Current keys.
    keys: Option<SessionKeys>,
    /// Previous keys after a rotation.
    old_keys: OldKeyRetention,
    /// Outbound nonce source.
    nonces: NonceGenerator,
    /// Nonces already accepted.
    used_nonces: BoundedSet<[u8; NONCE_SIZE]>,
    /// Accepted sender clock skew.
    tolerance: Duration,
}

impl CryptoSession {
    /// Create a session with no key installed.
    pub fn new() -> Self {
        Self {
            keys: None,
            old_keys: OldKeyRetention::new(),
            nonces: NonceGenerator::new(),
            used_nonces: BoundedSet::new(MAX_RECENT_SEQUENCES),
            tolerance: TIMESTAMP_TOLERANCE,
        }
    }

    /// Check if a session key is installed.
    pub fn has_key(&self) -> bool {
        self.keys.is_some()
    }

    /// Current keys, if installed.
    pub fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// Install a new session key.
    ///
    /// The previous key (if any) is retained for decryption only, and the
    /// nonce counter restarts.
    pub fn install(&mut self, keys: SessionKeys, now: Instant) {
        if let Some(previous) = self.keys.take() {
            self.old_keys.retain(previous, now);
        }
        self.keys = Some(keys);
        self.nonces.reset();
    }

    /// Number of nonces recorded by the replay guard.
    pub fn used_nonce_count(&self) -> usize {
        self.used_nonces.len()
    }

    /// Counter value the next outbound nonce will carry.
    pub fn nonce_counter(&self) -> u64 {
        self.nonces.counter()
    }

    /// Produce the next outbound nonce.
    pub fn next_nonce(&mut self) -> Result<[u8; NONCE_SIZE], CryptoError> {
        if self.keys.is_none() {
            return Err(CryptoError::NoSessionKey);
        }
        self.nonces.next_nonce()
    }

    /// Seal a payload under the current outbound key.
    pub fn seal(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        timestamp_ms: u64,
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::NoSessionKey)?;
        aead::seal(keys.send(), nonce, aad, timestamp_ms, payload)
    }

    /// Open a sealed body.
    ///
    /// Checks, in order: key installed, nonce unseen, AEAD tag, MAC, timestamp
    /// freshness. The nonce is recorded only after every check passes.
    pub fn open(
        &mut self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        body: &[u8],
        now: Instant,
        now_ms: u64,
    ) -> Result<Opened, CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::NoSessionKey)?;

        if self.used_nonces.contains(nonce) {
            return Err(CryptoError::ReplayDetected);
        }

        self.old_keys.clear_if_expired(now);
        let opened = match aead::open(keys.recv(), nonce, aad, body) {
            Ok(opened) => opened,
            Err(err) => match self.old_keys.keys(now) {
                Some(old) => aead::open(old.recv(), nonce, aad, body).map_err(|_| err)?,
                None => return Err(err),
            },
        };

        aead::check_timestamp(opened.timestamp_ms, now_ms, self.tolerance)?;

        self.used_nonces.insert(*nonce);
        Ok(opened)
    }

    /// MAC `parts` under the current outbound key.
    pub fn authenticate(&self, parts: &[&[u8]]) -> Result<[u8; MAC_SIZE], CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::NoSessionKey)?;
        Ok(aead::authenticate(keys.send(), parts))
    }

    /// Verify a MAC under the current inbound key, falling back to the
    /// retained one.
    pub fn verify(&self, parts: &[&[u8]], tag: &[u8], now: Instant) -> Result<(), CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::NoSessionKey)?;
        match aead::verify(keys.recv(), parts, tag) {
            Ok(()) => Ok(()),
            Err(err) => match self.old_keys.keys(now) {
                Some(old) => aead::verify(old.recv(), parts, tag).map_err(|_| err),
                None => Err(err),
            },
        }
    }
}

#[cfg(test)]
impl CryptoSession {
    /// Use up the nonce space of the current key.
    pub(crate) fn exhaust_nonces(&mut self) {
        self.nonces = NonceGenerator::resume_at(u64::MAX);
    }
}

impl Default for CryptoSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SESSION_KEY_SIZE;
    use crate::crypto::{unix_millis, DirectionKeys, Role};

    fn keys(b: u8, role: Role) -> SessionKeys {
        let i2r = DirectionKeys::from_bytes([b; SESSION_KEY_SIZE], [b ^ 0xFF; SESSION_KEY_SIZE]);
        let r2i = DirectionKeys::from_bytes([b ^ 0x0F; SESSION_KEY_SIZE], [b ^ 0xF0; SESSION_KEY_SIZE]);
        match role {
            Role::Initiator => SessionKeys::from_directions(i2r, r2i),
            Role::Responder => SessionKeys::from_directions(r2i, i2r),
        }
    }

    fn pair(b: u8) -> (CryptoSession, CryptoSession) {
        let now = Instant::now();
        let mut tx = CryptoSession::new();
        let mut rx = CryptoSession::new();
        tx.install(keys(b, Role::Initiator), now);
        rx.install(keys(b, Role::Responder), now);
        (tx, rx)
    }

    #[test]
    fn test_crypto_session_roundtrip() {
        let (mut tx, mut rx) = pair(1);
        let now_ms = unix_millis();

        let nonce = tx.next_nonce().unwrap();
        let body = tx.seal(&nonce, b"hdr", now_ms, b"Hello, shroud!").unwrap();

        let opened = rx.open(&nonce, b"hdr", &body, Instant::now(), now_ms).unwrap();
        assert_eq!(opened.payload, b"Hello, shroud!");
        assert_eq!(rx.used_nonce_count(), 1);
    }

    #[test]
    fn test_crypto_session_replay_detection() {
        let (mut tx, mut rx) = pair(1);
        let now_ms = unix_millis();

        let nonce = tx.next_nonce().unwrap();
        let body = tx.seal(&nonce, b"hdr", now_ms, b"test").unwrap();

        assert!(rx.open(&nonce, b"hdr", &body, Instant::now(), now_ms).is_ok());
        assert_eq!(
            rx.open(&nonce, b"hdr", &body, Instant::now(), now_ms),
            Err(CryptoError::ReplayDetected)
        );
    }

    #[test]
    fn test_failed_open_does_not_record_nonce() {
        let (mut tx, mut rx) = pair(1);
        let now_ms = unix_millis();

        let nonce = tx.next_nonce().unwrap();
        let body = tx.seal(&nonce, b"hdr", now_ms, b"test").unwrap();

        assert!(rx.open(&nonce, b"other", &body, Instant::now(), now_ms).is_err());
        assert_eq!(rx.used_nonce_count(), 0);
        assert!(rx.open(&nonce, b"hdr", &body, Instant::now(), now_ms).is_ok());
    }

    #[test]
    fn test_no_key_rejected() {
        let mut rx = CryptoSession::new();
        let result = rx.open(&[0u8; NONCE_SIZE], b"", &[0u8; 64], Instant::now(), 0);
        assert_eq!(result, Err(CryptoError::NoSessionKey));

        let mut tx = CryptoSession::new();
        assert_eq!(tx.next_nonce(), Err(CryptoError::NoSessionKey));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let (mut tx, mut rx) = pair(1);
        let now_ms = unix_millis();

        let nonce = tx.next_nonce().unwrap();
        let body = tx.seal(&nonce, b"hdr", now_ms - 6_000, b"old").unwrap();

        let result = rx.open(&nonce, b"hdr", &body, Instant::now(), now_ms);
        assert!(matches!(result, Err(CryptoError::StaleTimestamp { .. })));
    }

    #[test]
    fn test_install_resets_counter_and_retains_old_key() {
        let (mut tx, mut rx) = pair(1);
        let now_ms = unix_millis();

        // Sealed under the first key, delivered after the receiver rotated
        let late_nonce = tx.next_nonce().unwrap();
        let late_body = tx.seal(&late_nonce, b"hdr", now_ms, b"late").unwrap();
        assert_eq!(tx.nonce_counter(), 1);

        let now = Instant::now();
        tx.install(keys(2, Role::Initiator), now);
        rx.install(keys(2, Role::Responder), now);
        assert_eq!(tx.nonce_counter(), 0);

        let opened = rx.open(&late_nonce, b"hdr", &late_body, now, now_ms).unwrap();
        assert_eq!(opened.payload, b"late");

        let nonce = tx.next_nonce().unwrap();
        let body = tx.seal(&nonce, b"hdr", now_ms, b"fresh").unwrap();
        assert_eq!(
            rx.open(&nonce, b"hdr", &body, now, now_ms).unwrap().payload,
            b"fresh"
        );
    }

    #[test]
    fn test_old_key_expires() {
        let (mut tx, mut rx) = pair(1);
        let now_ms = unix_millis();

        let nonce = tx.next_nonce().unwrap();
        let body = tx.seal(&nonce, b"hdr", now_ms, b"late").unwrap();

        let now = Instant::now();
        rx.install(keys(2, Role::Responder), now);
        let later = now + Duration::from_secs(6);
        assert_eq!(
            rx.open(&nonce, b"hdr", &body, later, now_ms),
            Err(CryptoError::DecryptionFailed)
        );
    }

    #[test]
    fn test_authenticate_verify() {
        let (tx, rx) = pair(3);
        let tag = tx.authenticate(&[b"ack", &7u64.to_le_bytes()]).unwrap();
        assert!(rx.verify(&[b"ack", &7u64.to_le_bytes()], &tag, Instant::now()).is_ok());
        assert_eq!(
            rx.verify(&[b"ack", &8u64.to_le_bytes()], &tag, Instant::now()),
            Err(CryptoError::MacMismatch)
        );
    }

    #[test]
    fn test_own_output_does_not_open() {
        let (mut tx, rx) = pair(4);
        let now_ms = unix_millis();

        let nonce = tx.next_nonce().unwrap();
        let body = tx.seal(&nonce, b"hdr", now_ms, b"mine").unwrap();
        assert_eq!(
            tx.open(&nonce, b"hdr", &body, Instant::now(), now_ms),
            Err(CryptoError::DecryptionFailed)
        );
        assert_eq!(tx.used_nonce_count(), 0);

        let tag = rx.authenticate(&[b"ack"]).unwrap();
        assert_eq!(rx.verify(&[b"ack"], &tag, Instant::now()), Err(CryptoError::MacMismatch));
        assert!(tx.verify(&[b"ack"], &tag, Instant::now()).is_ok());
    }
}
