//! Protocol constants.
//!
//! Wire sizes and packet types are fixed by the protocol and MUST NOT be
//! changed. Capacity defaults can be overridden through the manager and
//! connection configs.

use std::time::Duration;

// =============================================================================
// PACKET TYPES
// =============================================================================

/// Handshake initiation (initiator ephemeral public key).
pub const PACKET_TYPE_HANDSHAKE_INIT: u8 = 0x01;

/// Handshake response (responder ephemeral public key).
pub const PACKET_TYPE_HANDSHAKE_RESPONSE: u8 = 0x02;

/// Encrypted data, acknowledgment or keepalive.
pub const PACKET_TYPE_DATA: u8 = 0x03;

/// Key rotation request/response.
pub const PACKET_TYPE_KEY_ROTATION: u8 = 0x04;

// =============================================================================
// DATA FLAGS
// =============================================================================

/// Body starts with an 8-byte sequence number and the payload must be
/// delivered in order.
pub const FLAG_RELIABLE: u8 = 0x01;

/// Body is a pure acknowledgment: sequence number and MAC, no ciphertext.
pub const FLAG_ACK: u8 = 0x02;

/// Encrypted empty payload that only refreshes liveness.
pub const FLAG_KEEPALIVE: u8 = 0x04;

// =============================================================================
// WIRE SIZES
// =============================================================================

/// Session token size.
pub const SESSION_TOKEN_SIZE: usize = 8;

/// AEAD nonce size (96-bit ChaCha20-Poly1305 nonce).
pub const NONCE_SIZE: usize = 12;

/// Random prefix of each nonce.
pub const NONCE_RANDOM_SIZE: usize = 4;

/// Per-connection counter suffix of each nonce.
pub const NONCE_COUNTER_SIZE: usize = 8;

/// Handshake/rotation header size (type + session token).
pub const HANDSHAKE_HEADER_SIZE: usize = 1 + SESSION_TOKEN_SIZE;

/// Data header size (type + session token + nonce + flags).
pub const DATA_HEADER_SIZE: usize = 1 + SESSION_TOKEN_SIZE + NONCE_SIZE + 1;

/// Reliable sequence number size.
pub const SEQUENCE_SIZE: usize = 8;

/// Sender timestamp prefixed to every plaintext.
pub const TIMESTAMP_SIZE: usize = 8;

/// X25519 public key size. Also the fixed handshake key blob size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Derived session key size (encryption key or MAC key).
pub const SESSION_KEY_SIZE: usize = 32;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Keyed BLAKE2s MAC size.
pub const MAC_SIZE: usize = 16;

/// Maximum application payload per packet.
pub const MAX_PAYLOAD_SIZE: usize = 1200;

/// Largest datagram a socket is asked to receive.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// =============================================================================
// SECURITY
// =============================================================================

/// Accepted skew between a sender timestamp and the local clock.
pub const TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(5);

/// Capacity of the per-connection nonce and sequence dedup sets.
pub const MAX_RECENT_SEQUENCES: usize = 4096;

/// Default interval between key rotations.
pub const KEY_ROTATION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Previous session key stays valid for decryption this long after rotation.
pub const OLD_KEY_RETENTION: Duration = Duration::from_secs(5);

// =============================================================================
// RELIABILITY
// =============================================================================

/// First sequence number assigned to a reliable packet.
pub const INITIAL_SEQUENCE: u64 = 1;

/// Default retransmission timeout for unacknowledged reliable packets.
pub const DEFAULT_RETRANSMIT_TIMEOUT: Duration = Duration::from_millis(200);

/// Default maximum number of unacknowledged reliable packets.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default maximum number of reliable packets awaiting in-order delivery.
pub const DEFAULT_MAX_RECEIVED: usize = 1024;

// =============================================================================
// JITTER
// =============================================================================

/// Default maximum number of buffered unreliable packets.
pub const DEFAULT_MAX_JITTER: usize = 256;

/// Number of inter-arrival deltas kept for jitter statistics.
pub const JITTER_HISTORY_SIZE: usize = 32;

/// Lower clamp for the adaptive jitter delay.
pub const MIN_JITTER_DELAY: Duration = Duration::from_millis(10);

/// Upper clamp for the adaptive jitter delay.
pub const MAX_JITTER_DELAY: Duration = Duration::from_millis(500);

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Default inactivity timeout before a connection is evicted.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between HANDSHAKE_INIT retries.
pub const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Idle send interval after which a keepalive is emitted.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Default connection table capacity.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Default per-address packet ceiling within one window.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Rate-limit window length.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);
