//! Wire frame encoding and decoding.
//!
//! All integers are little-endian.
//!
//! Handshake frames (HANDSHAKE_INIT, HANDSHAKE_RESPONSE):
//! ```text
//! +--------+------------------+----------------------+
//! | Type   | Session Token    | Public Key           |
//! | 1 byte | 8 bytes          | 32 bytes             |
//! +--------+------------------+----------------------+
//! ```
//!
//! Key rotation frames append a 16-byte MAC under the current session key.
//!
//! Data frames:
//! ```text
//! +--------+------------------+------------+--------+---------------------+
//! | Type   | Session Token    | Nonce      | Flags  | Body                |
//! | 1 byte | 8 bytes          | 12 bytes   | 1 byte | type-specific       |
//! +--------+------------------+------------+--------+---------------------+
//! ```
//! Body: reliable = sequence (8) + sealed; unreliable/keepalive = sealed;
//! ack = sequence (8) + MAC (16).

use thiserror::Error;

use crate::core::{
    DATA_HEADER_SIZE, FLAG_ACK, FLAG_KEEPALIVE, FLAG_RELIABLE, HANDSHAKE_HEADER_SIZE, MAC_SIZE,
    NONCE_SIZE, PACKET_TYPE_DATA, PACKET_TYPE_HANDSHAKE_INIT, PACKET_TYPE_HANDSHAKE_RESPONSE,
    PACKET_TYPE_KEY_ROTATION, PUBLIC_KEY_SIZE, SEQUENCE_SIZE, SESSION_TOKEN_SIZE,
};
use crate::crypto::SessionToken;

/// Frame parsing errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is shorter than its fixed layout.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Frame is longer than its fixed layout.
    #[error("frame too long: expected {expected} bytes, got {actual}")]
    TooLong {
        /// Exact size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02x}")]
    InvalidType(u8),

    /// Reserved or contradictory flag bits.
    #[error("invalid flags: 0x{0:02x}")]
    InvalidFlags(u8),

    /// Empty datagram.
    #[error("empty datagram")]
    Empty,
}

/// Packet type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Initiator's ephemeral public key.
    HandshakeInit = PACKET_TYPE_HANDSHAKE_INIT,
    /// Responder's ephemeral public key.
    HandshakeResponse = PACKET_TYPE_HANDSHAKE_RESPONSE,
    /// Encrypted data, ack or keepalive.
    Data = PACKET_TYPE_DATA,
    /// Key rotation request/response.
    KeyRotation = PACKET_TYPE_KEY_ROTATION,
}

impl PacketType {
    /// Parse packet type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            PACKET_TYPE_HANDSHAKE_INIT => Some(Self::HandshakeInit),
            PACKET_TYPE_HANDSHAKE_RESPONSE => Some(Self::HandshakeResponse),
            PACKET_TYPE_DATA => Some(Self::Data),
            PACKET_TYPE_KEY_ROTATION => Some(Self::KeyRotation),
            _ => None,
        }
    }

    /// Convert to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Data frame flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataFlags(u8);

impl DataFlags {
    /// Unreliable data.
    pub const NONE: Self = Self(0);
    /// Reliable data.
    pub const RELIABLE: Self = Self(FLAG_RELIABLE);
    /// Pure acknowledgment.
    pub const ACK: Self = Self(FLAG_ACK);
    /// Keepalive.
    pub const KEEPALIVE: Self = Self(FLAG_KEEPALIVE);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if RELIABLE is set.
    pub fn is_reliable(self) -> bool {
        self.0 & FLAG_RELIABLE != 0
    }

    /// Check if ACK is set.
    pub fn is_ack(self) -> bool {
        self.0 & FLAG_ACK != 0
    }

    /// Check if KEEPALIVE is set.
    pub fn is_keepalive(self) -> bool {
        self.0 & FLAG_KEEPALIVE != 0
    }

    /// Reserved bits must be zero and at most one kind bit may be set.
    pub fn is_valid(self) -> bool {
        let known = FLAG_RELIABLE | FLAG_ACK | FLAG_KEEPALIVE;
        self.0 & !known == 0 && self.0.count_ones() <= 1
    }
}

/// Data frame header (unencrypted, authenticated as AAD).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Session token of the connection.
    pub token: SessionToken,
    /// Per-packet nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Frame flags.
    pub flags: DataFlags,
}

impl DataHeader {
    /// Create a data header.
    pub fn new(token: SessionToken, nonce: [u8; NONCE_SIZE], flags: DataFlags) -> Self {
        Self { token, nonce, flags }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; DATA_HEADER_SIZE] {
        let mut buf = [0u8; DATA_HEADER_SIZE];
        buf[0] = PacketType::Data.as_byte();
        buf[1..9].copy_from_slice(&self.token.to_bytes());
        buf[9..21].copy_from_slice(&self.nonce);
        buf[21] = self.flags.as_byte();
        buf
    }

    /// Parse header from the start of a datagram.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < DATA_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: DATA_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != PACKET_TYPE_DATA {
            return Err(FrameError::InvalidType(bytes[0]));
        }

        let token = read_token(&bytes[1..9]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[9..21]);

        let flags = DataFlags::from_byte(bytes[21]);
        if !flags.is_valid() {
            return Err(FrameError::InvalidFlags(bytes[21]));
        }

        Ok(Self { token, nonce, flags })
    }
}

/// A parsed datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    /// HANDSHAKE_INIT.
    HandshakeInit {
        /// Initiator's session token.
        token: SessionToken,
        /// Initiator's ephemeral public key.
        public_key: [u8; PUBLIC_KEY_SIZE],
    },
    /// HANDSHAKE_RESPONSE.
    HandshakeResponse {
        /// Echoed session token.
        token: SessionToken,
        /// Responder's ephemeral public key.
        public_key: [u8; PUBLIC_KEY_SIZE],
    },
    /// KEY_ROTATION request or response.
    KeyRotation {
        /// Session token.
        token: SessionToken,
        /// Sender's new ephemeral public key.
        public_key: [u8; PUBLIC_KEY_SIZE],
        /// MAC under the current session key.
        mac: [u8; MAC_SIZE],
    },
    /// DATA (data, ack or keepalive).
    Data {
        /// Header.
        header: DataHeader,
        /// Type-specific body.
        body: &'a [u8],
    },
}

impl Frame<'_> {
    /// Session token carried by the frame.
    pub fn token(&self) -> SessionToken {
        match self {
            Frame::HandshakeInit { token, .. }
            | Frame::HandshakeResponse { token, .. }
            | Frame::KeyRotation { token, .. } => *token,
            Frame::Data { header, .. } => header.token,
        }
    }
}

/// Parse a datagram.
pub fn parse(datagram: &[u8]) -> Result<Frame<'_>, FrameError> {
    let type_byte = *datagram.first().ok_or(FrameError::Empty)?;
    let packet_type = PacketType::from_byte(type_byte).ok_or(FrameError::InvalidType(type_byte))?;

    match packet_type {
        PacketType::HandshakeInit | PacketType::HandshakeResponse => {
            exact_len(datagram, HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE)?;
            let token = read_token(&datagram[1..HANDSHAKE_HEADER_SIZE]);
            let public_key = read_public_key(&datagram[HANDSHAKE_HEADER_SIZE..]);
            Ok(if packet_type == PacketType::HandshakeInit {
                Frame::HandshakeInit { token, public_key }
            } else {
                Frame::HandshakeResponse { token, public_key }
            })
        }
        PacketType::KeyRotation => {
            exact_len(datagram, HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE + MAC_SIZE)?;
            let token = read_token(&datagram[1..HANDSHAKE_HEADER_SIZE]);
            let key_end = HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE;
            let public_key = read_public_key(&datagram[HANDSHAKE_HEADER_SIZE..key_end]);
            let mut mac = [0u8; MAC_SIZE];
            mac.copy_from_slice(&datagram[key_end..]);
            Ok(Frame::KeyRotation {
                token,
                public_key,
                mac,
            })
        }
        PacketType::Data => {
            let header = DataHeader::from_bytes(datagram)?;
            let body = &datagram[DATA_HEADER_SIZE..];
            if header.flags.is_ack() {
                exact_len(body, SEQUENCE_SIZE + MAC_SIZE).map_err(|e| shift(e, DATA_HEADER_SIZE))?;
            } else if header.flags.is_reliable() && body.len() < SEQUENCE_SIZE {
                return Err(FrameError::TooShort {
                    expected: DATA_HEADER_SIZE + SEQUENCE_SIZE,
                    actual: datagram.len(),
                });
            }
            Ok(Frame::Data { header, body })
        }
    }
}

/// Encode a HANDSHAKE_INIT or HANDSHAKE_RESPONSE frame.
pub fn encode_handshake(
    packet_type: PacketType,
    token: SessionToken,
    public_key: &[u8; PUBLIC_KEY_SIZE],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE);
    buf.push(packet_type.as_byte());
    buf.extend_from_slice(&token.to_bytes());
    buf.extend_from_slice(public_key);
    buf
}

/// Encode a KEY_ROTATION frame.
pub fn encode_key_rotation(
    token: SessionToken,
    public_key: &[u8; PUBLIC_KEY_SIZE],
    mac: &[u8; MAC_SIZE],
) -> Vec<u8> {
    let mut buf = encode_handshake(PacketType::KeyRotation, token, public_key);
    buf.extend_from_slice(mac);
    buf
}

/// Bytes covered by a KEY_ROTATION MAC.
pub fn key_rotation_mac_input(
    token: SessionToken,
    public_key: &[u8; PUBLIC_KEY_SIZE],
) -> [u8; HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE] {
    let mut buf = [0u8; HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE];
    buf[0] = PacketType::KeyRotation.as_byte();
    buf[1..HANDSHAKE_HEADER_SIZE].copy_from_slice(&token.to_bytes());
    buf[HANDSHAKE_HEADER_SIZE..].copy_from_slice(public_key);
    buf
}

fn exact_len(bytes: &[u8], expected: usize) -> Result<(), FrameError> {
    if bytes.len() < expected {
        return Err(FrameError::TooShort {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(FrameError::TooLong {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn shift(err: FrameError, offset: usize) -> FrameError {
    match err {
        FrameError::TooShort { expected, actual } => FrameError::TooShort {
            expected: expected + offset,
            actual: actual + offset,
        },
        FrameError::TooLong { expected, actual } => FrameError::TooLong {
            expected: expected + offset,
            actual: actual + offset,
        },
        other => other,
    }
}

fn read_token(bytes: &[u8]) -> SessionToken {
    let mut token = [0u8; SESSION_TOKEN_SIZE];
    token.copy_from_slice(&bytes[..SESSION_TOKEN_SIZE]);
    SessionToken::from_bytes(token)
}

fn read_public_key(bytes: &[u8]) -> [u8; PUBLIC_KEY_SIZE] {
    let mut key = [0u8; PUBLIC_KEY_SIZE];
    key.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_bytes() {
        assert_eq!(PacketType::HandshakeInit.as_byte(), 1);
        assert_eq!(PacketType::HandshakeResponse.as_byte(), 2);
        assert_eq!(PacketType::Data.as_byte(), 3);
        assert_eq!(PacketType::KeyRotation.as_byte(), 4);
        assert_eq!(PacketType::from_byte(5), None);
    }

    #[test]
    fn test_handshake_layout() {
        let token = SessionToken::new(0x1122334455667788);
        let frame = encode_handshake(PacketType::HandshakeInit, token, &[0xAA; PUBLIC_KEY_SIZE]);

        assert_eq!(frame.len(), 41);
        assert_eq!(hex::encode(&frame[..9]), "018877665544332211");

        match parse(&frame).unwrap() {
            Frame::HandshakeInit { token: t, public_key } => {
                assert_eq!(t, token);
                assert_eq!(public_key, [0xAA; PUBLIC_KEY_SIZE]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_undersized_handshake_rejected() {
        let token = SessionToken::new(1);
        let mut frame =
            encode_handshake(PacketType::HandshakeResponse, token, &[1; PUBLIC_KEY_SIZE]);
        frame.truncate(30);

        assert_eq!(
            parse(&frame),
            Err(FrameError::TooShort {
                expected: 41,
                actual: 30
            })
        );
    }

    #[test]
    fn test_oversized_handshake_rejected() {
        let mut frame =
            encode_handshake(PacketType::HandshakeInit, SessionToken::new(1), &[1; PUBLIC_KEY_SIZE]);
        frame.push(0);
        assert!(matches!(parse(&frame), Err(FrameError::TooLong { .. })));
    }

    #[test]
    fn test_key_rotation_frame() {
        let token = SessionToken::new(9);
        let frame = encode_key_rotation(token, &[2; PUBLIC_KEY_SIZE], &[3; MAC_SIZE]);
        assert_eq!(frame.len(), HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE + MAC_SIZE);

        match parse(&frame).unwrap() {
            Frame::KeyRotation { token: t, public_key, mac } => {
                assert_eq!(t, token);
                assert_eq!(public_key, [2; PUBLIC_KEY_SIZE]);
                assert_eq!(mac, [3; MAC_SIZE]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let input = key_rotation_mac_input(token, &[2; PUBLIC_KEY_SIZE]);
        assert_eq!(&input[..], &frame[..HANDSHAKE_HEADER_SIZE + PUBLIC_KEY_SIZE]);
    }

    #[test]
    fn test_data_header_roundtrip() {
        let header = DataHeader::new(SessionToken::new(5), [7; NONCE_SIZE], DataFlags::RELIABLE);
        let bytes = header.to_bytes();

        assert_eq!(bytes.len(), DATA_HEADER_SIZE);
        assert_eq!(bytes[0], PACKET_TYPE_DATA);
        assert_eq!(bytes[21], FLAG_RELIABLE);
        assert_eq!(DataHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_data_frame_body() {
        let header = DataHeader::new(SessionToken::new(5), [7; NONCE_SIZE], DataFlags::NONE);
        let mut datagram = header.to_bytes().to_vec();
        datagram.extend_from_slice(b"sealed-body");

        match parse(&datagram).unwrap() {
            Frame::Data { header: h, body } => {
                assert_eq!(h, header);
                assert_eq!(body, b"sealed-body");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_ack_body_must_be_exact() {
        let header = DataHeader::new(SessionToken::new(5), [7; NONCE_SIZE], DataFlags::ACK);
        let mut datagram = header.to_bytes().to_vec();
        datagram.extend_from_slice(&[0u8; SEQUENCE_SIZE]);

        assert_eq!(
            parse(&datagram),
            Err(FrameError::TooShort {
                expected: DATA_HEADER_SIZE + SEQUENCE_SIZE + MAC_SIZE,
                actual: DATA_HEADER_SIZE + SEQUENCE_SIZE
            })
        );

        datagram.extend_from_slice(&[0u8; MAC_SIZE]);
        assert!(parse(&datagram).is_ok());
    }

    #[test]
    fn test_invalid_flags() {
        let mut bytes =
            DataHeader::new(SessionToken::new(5), [0; NONCE_SIZE], DataFlags::NONE).to_bytes();
        bytes[21] = FLAG_RELIABLE | FLAG_ACK;
        assert_eq!(
            DataHeader::from_bytes(&bytes),
            Err(FrameError::InvalidFlags(0x03))
        );

        bytes[21] = 0x80;
        assert_eq!(
            DataHeader::from_bytes(&bytes),
            Err(FrameError::InvalidFlags(0x80))
        );
    }

    #[test]
    fn test_malformed_datagrams() {
        assert_eq!(parse(&[]), Err(FrameError::Empty));
        assert_eq!(parse(&[0x09, 1, 2]), Err(FrameError::InvalidType(0x09)));
        assert!(matches!(
            parse(&[PACKET_TYPE_DATA, 0, 0]),
            Err(FrameError::TooShort { .. })
        ));
    }
}
