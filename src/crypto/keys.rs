//! X25519 key management and identifier derivation.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use blake2::digest::{KeyInit, Mac};
use blake2::Blake2sMac256;
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{CryptoError, PUBLIC_KEY_SIZE, SESSION_KEY_SIZE, SESSION_TOKEN_SIZE};

/// HKDF info labels, initiator to responder.
const I2R_ENC_LABEL: &[u8] = b"shroud v1 i2r enc";
const I2R_MAC_LABEL: &[u8] = b"shroud v1 i2r mac";

/// HKDF info labels, responder to initiator.
const R2I_ENC_LABEL: &[u8] = b"shroud v1 r2i enc";
const R2I_MAC_LABEL: &[u8] = b"shroud v1 r2i mac";

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent HANDSHAKE_INIT.
    Initiator,
    /// Answered HANDSHAKE_INIT.
    Responder,
}

/// An ephemeral X25519 keypair used for one handshake or one rotation.
///
/// Held as a `StaticSecret` so a HANDSHAKE_INIT can be retried with the same
/// public key. The secret is zeroized on drop.
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Serialized public key.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Compute the shared secret with a peer's public key.
    ///
    /// Low-order peer keys yield a non-contributory secret and are rejected
    /// with [`CryptoError::AgreementFailed`].
    pub fn agree(&self, remote_public: &[u8; PUBLIC_KEY_SIZE]) -> Result<SharedSecret, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*remote_public));
        if !shared.was_contributory() {
            return Err(CryptoError::AgreementFailed);
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

/// Raw ECDH output. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Get the raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Key material for one direction of traffic.
///
/// The AEAD key and the MAC key are independent HKDF outputs.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DirectionKeys {
    enc: [u8; SESSION_KEY_SIZE],
    mac: [u8; SESSION_KEY_SIZE],
}

impl DirectionKeys {
    fn expand(hk: &Hkdf<Sha256>, enc_label: &[u8], mac_label: &[u8]) -> Result<Self, CryptoError> {
        let mut enc = [0u8; SESSION_KEY_SIZE];
        let mut mac = [0u8; SESSION_KEY_SIZE];
        hk.expand(enc_label, &mut enc)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        hk.expand(mac_label, &mut mac)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(Self { enc, mac })
    }

    /// Create keys from raw material (tests and fixtures).
    pub fn from_bytes(enc: [u8; SESSION_KEY_SIZE], mac: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { enc, mac }
    }

    /// AEAD key.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn enc_key(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.enc
    }

    /// MAC key.
    pub fn mac_key(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.mac
    }
}

impl fmt::Debug for DirectionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DirectionKeys(..)")
    }
}

/// Session key material derived from a shared secret.
///
/// Each direction has its own keys, so a datagram sealed by one side never
/// opens on the same side.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    send: DirectionKeys,
    recv: DirectionKeys,
}

impl SessionKeys {
    /// Derive session keys with HKDF-SHA256, salted with the session token.
    ///
    /// Both peers derive the same two directions; `role` picks which one this
    /// side seals with.
    pub fn derive(shared: &SharedSecret, token: SessionToken, role: Role) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(&token.to_bytes()), shared.as_bytes());
        let i2r = DirectionKeys::expand(&hk, I2R_ENC_LABEL, I2R_MAC_LABEL)?;
        let r2i = DirectionKeys::expand(&hk, R2I_ENC_LABEL, R2I_MAC_LABEL)?;

        Ok(match role {
            Role::Initiator => Self { send: i2r, recv: r2i },
            Role::Responder => Self { send: r2i, recv: i2r },
        })
    }

    /// Assemble keys from per-direction material.
    pub fn from_directions(send: DirectionKeys, recv: DirectionKeys) -> Self {
        Self { send, recv }
    }

    /// Keys for sealing and authenticating outbound traffic.
    pub fn send(&self) -> &DirectionKeys {
        &self.send
    }

    /// Keys for opening and verifying inbound traffic.
    pub fn recv(&self) -> &DirectionKeys {
        &self.recv
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

/// Random 64-bit token naming a connection on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    /// Generate a new random session token.
    pub fn generate() -> Self {
        Self(OsRng.next_u64())
    }

    /// Create from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Little-endian wire bytes.
    pub fn to_bytes(self) -> [u8; SESSION_TOKEN_SIZE] {
        self.0.to_le_bytes()
    }

    /// Parse little-endian wire bytes.
    pub fn from_bytes(bytes: [u8; SESSION_TOKEN_SIZE]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Local identifier of a connection, derived from peer address and token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create from a raw value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Keyed hash deriving [`ConnectionId`]s.
///
/// The key is local to one manager, so ids cannot be predicted by peers.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ConnectionIdHasher {
    key: [u8; 32],
}

impl ConnectionIdHasher {
    /// Create a hasher with a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Create a hasher with a fixed key.
    pub fn with_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the id for `(addr, token)`.
    pub fn derive(&self, addr: &SocketAddr, token: SessionToken) -> ConnectionId {
        let mut mac = <Blake2sMac256 as KeyInit>::new_from_slice(&self.key)
            .expect("32-byte key is valid for BLAKE2s");
        match addr.ip() {
            IpAddr::V4(ip) => {
                Mac::update(&mut mac, &[4]);
                Mac::update(&mut mac, &ip.octets());
            }
            IpAddr::V6(ip) => {
                Mac::update(&mut mac, &[6]);
                Mac::update(&mut mac, &ip.octets());
            }
        }
        Mac::update(&mut mac, &addr.port().to_le_bytes());
        Mac::update(&mut mac, &token.to_bytes());

        let out = mac.finalize().into_bytes();
        let mut id = [0u8; 8];
        id.copy_from_slice(&out[..8]);
        ConnectionId(u64::from_le_bytes(id))
    }
}

impl fmt::Debug for ConnectionIdHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionIdHasher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = EphemeralKeypair::generate();
        let kp2 = EphemeralKeypair::generate();

        assert_ne!(kp1.public_bytes(), kp2.public_bytes());
        assert_eq!(kp1.public_bytes().len(), PUBLIC_KEY_SIZE);
    }

    #[test]
    fn test_agreement_symmetry() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();

        let ab = alice.agree(&bob.public_bytes()).unwrap();
        let ba = bob.agree(&alice.public_bytes()).unwrap();
        assert_eq!(ab.as_bytes(), ba.as_bytes());

        let token = SessionToken::new(7);
        let initiator = SessionKeys::derive(&ab, token, Role::Initiator).unwrap();
        let responder = SessionKeys::derive(&ba, token, Role::Responder).unwrap();
        assert!(initiator.send() == responder.recv());
        assert!(initiator.recv() == responder.send());
        assert_ne!(initiator.send().enc_key(), initiator.send().mac_key());
    }

    #[test]
    fn test_directions_are_independent() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();
        let shared = alice.agree(&bob.public_bytes()).unwrap();

        let keys = SessionKeys::derive(&shared, SessionToken::new(7), Role::Initiator).unwrap();
        assert_ne!(keys.send().enc_key(), keys.recv().enc_key());
        assert_ne!(keys.send().mac_key(), keys.recv().mac_key());
    }

    #[test]
    fn test_agreement_rejects_low_order_key() {
        let alice = EphemeralKeypair::generate();
        let result = alice.agree(&[0u8; PUBLIC_KEY_SIZE]);
        assert!(matches!(result, Err(CryptoError::AgreementFailed)));
    }

    #[test]
    fn test_corrupted_public_key_diverges() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();

        let mut corrupted = bob.public_bytes();
        corrupted[5] ^= 0x40;

        let good = bob.agree(&alice.public_bytes()).unwrap();
        match alice.agree(&corrupted) {
            Ok(bad) => assert_ne!(good.as_bytes(), bad.as_bytes()),
            Err(e) => assert_eq!(e, CryptoError::AgreementFailed),
        }
    }

    #[test]
    fn test_token_salts_derivation() {
        let alice = EphemeralKeypair::generate();
        let bob = EphemeralKeypair::generate();
        let shared = alice.agree(&bob.public_bytes()).unwrap();

        let k1 = SessionKeys::derive(&shared, SessionToken::new(1), Role::Initiator).unwrap();
        let k2 = SessionKeys::derive(&shared, SessionToken::new(2), Role::Initiator).unwrap();
        assert!(k1 != k2);
    }

    #[test]
    fn test_session_token_bytes() {
        let token = SessionToken::new(0x0102030405060708);
        assert_eq!(hex::encode(token.to_bytes()), "0807060504030201");
        assert_eq!(SessionToken::from_bytes(token.to_bytes()), token);
        assert_eq!(token.to_string(), "0102030405060708");
    }

    #[test]
    fn test_connection_id_deterministic() {
        let hasher = ConnectionIdHasher::with_key([0x11; 32]);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let token = SessionToken::new(42);

        assert_eq!(hasher.derive(&addr, token), hasher.derive(&addr, token));

        let other_port: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        assert_ne!(hasher.derive(&addr, token), hasher.derive(&other_port, token));
        assert_ne!(
            hasher.derive(&addr, token),
            hasher.derive(&addr, SessionToken::new(43))
        );
    }

    #[test]
    fn test_connection_id_keyed() {
        let addr: SocketAddr = "[::1]:4000".parse().unwrap();
        let token = SessionToken::new(42);

        let a = ConnectionIdHasher::with_key([0x11; 32]).derive(&addr, token);
        let b = ConnectionIdHasher::with_key([0x22; 32]).derive(&addr, token);
        assert_ne!(a, b);
    }
}
