//! Application packet.
//!
//! A [`Packet`] carries one application payload plus its transport metadata.
//! It is created by the sender or by the decrypt path and consumed by exactly
//! one buffer slot.

use std::cmp::Ordering;
use std::net::SocketAddr;

use thiserror::Error;

use crate::core::{MAX_PAYLOAD_SIZE, NONCE_SIZE};

use super::sequence;

/// Packet construction errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Payload exceeds the maximum size.
    #[error("payload out of range: {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge {
        /// Offered length.
        len: usize,
        /// Maximum length.
        max: usize,
    },
}

/// Application data plus transport metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    reliable: bool,
    sequence: u64,
    nonce: [u8; NONCE_SIZE],
    timestamp: u64,
    address: SocketAddr,
}

impl Packet {
    /// Create a packet, rejecting payloads over [`MAX_PAYLOAD_SIZE`].
    pub fn new(payload: &[u8], reliable: bool, address: SocketAddr) -> Result<Self, PacketError> {
        check_len(payload.len())?;
        Ok(Self {
            payload: payload.to_vec(),
            reliable,
            sequence: 0,
            nonce: [0u8; NONCE_SIZE],
            timestamp: 0,
            address,
        })
    }

    /// Set the sequence number (reliable packets only; ignored otherwise).
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        if self.reliable {
            self.sequence = sequence;
        }
        self
    }

    /// Set the nonce.
    pub fn with_nonce(mut self, nonce: [u8; NONCE_SIZE]) -> Self {
        self.nonce = nonce;
        self
    }

    /// Set the sender timestamp (wall-clock milliseconds).
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Replace the payload.
    ///
    /// # Errors
    /// Returns `PayloadTooLarge` and leaves the packet unchanged if `payload`
    /// exceeds the maximum.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<(), PacketError> {
        check_len(payload.len())?;
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        Ok(())
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the packet, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Delivery class.
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    /// Sequence number; 0 for unreliable packets.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Nonce the packet was (or will be) sealed with.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Sender wall-clock milliseconds; 0 if unknown.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp;
    }

    /// Peer endpoint.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Order by sequence under wraparound, so sorting a receive buffer puts
    /// the next due sequence first.
    pub fn sequence_cmp(&self, other: &Self) -> Ordering {
        sequence::compare(self.sequence, other.sequence)
    }
}

fn check_len(len: usize) -> Result<(), PacketError> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(PacketError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_packet_new() {
        let packet = Packet::new(b"hello", true, addr()).unwrap().with_sequence(7);
        assert_eq!(packet.payload(), b"hello");
        assert!(packet.is_reliable());
        assert_eq!(packet.sequence(), 7);
        assert_eq!(packet.address(), addr());
    }

    #[test]
    fn test_max_payload_accepted() {
        let payload = vec![0xAB; MAX_PAYLOAD_SIZE];
        assert!(Packet::new(&payload, false, addr()).is_ok());
    }

    #[test]
    fn test_oversize_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            Packet::new(&payload, false, addr()),
            Err(PacketError::PayloadTooLarge {
                len: MAX_PAYLOAD_SIZE + 1,
                max: MAX_PAYLOAD_SIZE
            })
        );
    }

    #[test]
    fn test_set_payload_out_of_range_leaves_packet_unchanged() {
        let mut packet = Packet::new(b"keep", false, addr()).unwrap();
        assert!(packet.set_payload(&vec![1u8; MAX_PAYLOAD_SIZE + 10]).is_err());
        assert_eq!(packet.payload(), b"keep");

        packet.set_payload(b"replaced").unwrap();
        assert_eq!(packet.payload(), b"replaced");
    }

    #[test]
    fn test_unreliable_sequence_stays_zero() {
        let packet = Packet::new(b"x", false, addr()).unwrap().with_sequence(99);
        assert_eq!(packet.sequence(), 0);
    }

    #[test]
    fn test_clone_preserves_fields() {
        let packet = Packet::new(b"data", true, addr())
            .unwrap()
            .with_sequence(3)
            .with_nonce([9; NONCE_SIZE])
            .with_timestamp(1234);
        let copy = packet.clone();
        assert_eq!(copy, packet);
        assert_eq!(copy.nonce(), &[9; NONCE_SIZE]);
        assert_eq!(copy.timestamp(), 1234);
    }

    #[test]
    fn test_sequence_ordering_across_wrap() {
        let mk = |seq| Packet::new(b"", true, addr()).unwrap().with_sequence(seq);
        let mut buffer = vec![mk(1), mk(u64::MAX), mk(0)];
        buffer.sort_by(|a, b| a.sequence_cmp(b));
        let order: Vec<u64> = buffer.iter().map(Packet::sequence).collect();
        assert_eq!(order, vec![u64::MAX, 0, 1]);
    }
}
