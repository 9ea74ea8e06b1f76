//! Transport layer error types.
//!
//! Errors raised on the receive path are dropped with a log line; errors
//! raised at the API boundary are returned to the caller.

use std::io;

use thiserror::Error;

use crate::core::CryptoError;
use crate::crypto::ConnectionId;

use super::frame::FrameError;
use super::packet::PacketError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame parsing error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Packet construction error.
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    /// Cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// No live connection with this id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// Handshake has not completed.
    #[error("connection not verified")]
    NotVerified,

    /// Connection table is full.
    #[error("connection limit reached ({max})")]
    ConnectionLimit {
        /// Configured maximum.
        max: usize,
    },

    /// Too many unacknowledged reliable packets.
    #[error("send window full")]
    SendWindowFull,

    /// Unparseable or unusable peer address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Socket handle not owned by this manager.
    #[error("unknown socket")]
    UnknownSocket,

    /// Reliable sequence too far ahead of the receive window.
    #[error("sequence outside receive window")]
    OutOfWindow,
}

impl TransportError {
    /// Check if this error is fatal to the connection.
    ///
    /// The manager evicts a connection whose send path returns a fatal error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionNotFound(_)
                | TransportError::Crypto(CryptoError::CounterExhaustion)
        )
    }

    /// Check if this error is a security-related error.
    ///
    /// Inbound packets failing this way are reported as rejected rather than
    /// dropped.
    pub fn is_security_error(&self) -> bool {
        match self {
            TransportError::Crypto(err) => {
                err.is_attack_indicator() || *err == CryptoError::CounterExhaustion
            }
            _ => false,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(TransportError::ConnectionNotFound(ConnectionId::from_raw(1)).is_fatal());
        assert!(TransportError::Crypto(CryptoError::CounterExhaustion).is_fatal());

        assert!(!TransportError::Crypto(CryptoError::ReplayDetected).is_fatal());
        assert!(!TransportError::NotVerified.is_fatal());
    }

    #[test]
    fn test_security_errors() {
        assert!(TransportError::Crypto(CryptoError::ReplayDetected).is_security_error());
        assert!(TransportError::Crypto(CryptoError::DecryptionFailed).is_security_error());
        assert!(TransportError::Crypto(CryptoError::CounterExhaustion).is_security_error());

        assert!(!TransportError::Crypto(CryptoError::NoSessionKey).is_security_error());
        assert!(!TransportError::ConnectionLimit { max: 4 }.is_security_error());
    }

    #[test]
    fn test_display() {
        let err = TransportError::ConnectionNotFound(ConnectionId::from_raw(0xAB));
        assert!(err.to_string().starts_with("connection not found"));

        let err: TransportError = PacketError::PayloadTooLarge { len: 2000, max: 1200 }.into();
        assert_eq!(
            err.to_string(),
            "packet error: payload out of range: 2000 bytes exceeds maximum of 1200"
        );
    }
}
