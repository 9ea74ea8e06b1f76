//! Per-peer connection state.
//!
//! A [`Connection`] owns everything about one peer relationship: the crypto
//! session, reliable send/receive windows, the jitter buffer and lifecycle
//! clocks. It never touches a socket; every operation returns the datagrams
//! the caller should write.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::core::{
    CryptoError, DATA_HEADER_SIZE, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_MAX_JITTER, DEFAULT_MAX_PENDING,
    DEFAULT_MAX_RECEIVED, INITIAL_SEQUENCE, KEY_ROTATION_INTERVAL, MAC_SIZE,
    MAX_RECENT_SEQUENCES, NONCE_SIZE, PUBLIC_KEY_SIZE, SEQUENCE_SIZE,
};
use crate::crypto::{
    BoundedSet, ConnectionId, CryptoSession, Role, RotationSchedule, SessionKeys, SessionToken,
};

use super::error::{TransportError, TransportResult};
use super::frame::{DataFlags, DataHeader, FrameError};
use super::jitter::{JitterBuffer, JitterStats};
use super::packet::Packet;
use super::sequence;
use super::socket::SocketHandle;

/// Rotation public keys remembered per connection.
const ROTATION_KEYS_SEEN: usize = 16;

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum unacknowledged reliable packets.
    pub max_pending: usize,
    /// Maximum reliable packets awaiting in-order delivery.
    pub max_received: usize,
    /// Maximum unreliable packets in the jitter buffer.
    pub max_jitter: usize,
    /// Inactivity period after which the connection is evicted.
    pub timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            max_received: DEFAULT_MAX_RECEIVED,
            max_jitter: DEFAULT_MAX_JITTER,
            timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Set the inactivity timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the send window size.
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Set the reliable receive window size.
    pub fn with_max_received(mut self, max_received: usize) -> Self {
        self.max_received = max_received;
        self
    }

    /// Set the jitter buffer capacity.
    pub fn with_max_jitter(mut self, max_jitter: usize) -> Self {
        self.max_jitter = max_jitter;
        self
    }
}

/// Handshake / key-exchange state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Created, nothing sent.
    Uninitiated,
    /// Initiator: INIT sent. Responder: RESPONSE sent, awaiting first data.
    HandshakeSent,
    /// Session key installed and confirmed.
    Verified,
    /// Key rotation request in flight; the current key remains usable.
    Rotating,
}

/// Outcome of processing an authenticated DATA frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// New reliable packet buffered.
    Reliable {
        /// Sequence number.
        sequence: u64,
        /// Ack datagram to send back.
        ack: Vec<u8>,
    },
    /// Reliable packet already buffered or delivered.
    Duplicate {
        /// Sequence number.
        sequence: u64,
        /// Ack datagram to send back.
        ack: Vec<u8>,
    },
    /// Unreliable packet pushed into the jitter buffer.
    Unreliable,
    /// Acknowledgment for one of our reliable packets.
    Ack {
        /// Acknowledged sequence.
        sequence: u64,
    },
    /// Keepalive or key confirmation.
    Keepalive,
}

impl Received {
    /// Datagram to send back, if any.
    pub fn into_reply(self) -> Option<Vec<u8>> {
        match self {
            Received::Reliable { ack, .. } | Received::Duplicate { ack, .. } => Some(ack),
            _ => None,
        }
    }
}

/// Snapshot of connection counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionStats {
    /// Handshake state.
    pub state: HandshakeState,
    /// Reliable packets awaiting acknowledgment.
    pub pending: usize,
    /// Reliable packets awaiting in-order delivery.
    pub received: usize,
    /// Unreliable packets in the jitter buffer.
    pub jitter_depth: usize,
    /// Current jitter release delay (no requested minimum).
    pub jitter_delay: Duration,
    /// Jitter buffer counters.
    pub jitter: JitterStats,
    /// Next outbound reliable sequence.
    pub next_send_sequence: u64,
    /// Next reliable sequence to deliver.
    pub next_expected_sequence: u64,
    /// Completed key rotations.
    pub rotations: u32,
    /// Nonces held by the replay guard.
    pub used_nonces: usize,
}

#[derive(Debug)]
struct PendingPacket {
    packet: Packet,
    last_sent: Instant,
    acked: bool,
    transmissions: u32,
}

/// Reply kept so a retried request gets the identical answer.
#[derive(Debug)]
struct CachedReply {
    peer_key: [u8; PUBLIC_KEY_SIZE],
    datagram: Vec<u8>,
}

/// State for one peer.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    token: SessionToken,
    remote: SocketAddr,
    socket: SocketHandle,
    role: Role,
    state: HandshakeState,
    config: ConnectionConfig,

    crypto: CryptoSession,
    rotation: RotationSchedule,
    rotation_keys_seen: BoundedSet<[u8; PUBLIC_KEY_SIZE]>,
    cached_reply: Option<CachedReply>,

    next_send_sequence: u64,
    next_expected_sequence: u64,
    pending: VecDeque<PendingPacket>,
    received: VecDeque<Packet>,
    jitter: JitterBuffer,
    recent_sequences: BoundedSet<u64>,

    last_activity: Instant,
    last_send: Instant,
    handshake_sent_at: Option<Instant>,
    rotation_sent_at: Option<Instant>,
}

impl Connection {
    /// Create an unverified connection.
    pub fn new(
        id: ConnectionId,
        token: SessionToken,
        remote: SocketAddr,
        socket: SocketHandle,
        role: Role,
        config: ConnectionConfig,
        now: Instant,
    ) -> Self {
        Self {
            id,
            token,
            remote,
            socket,
            role,
            state: HandshakeState::Uninitiated,
            config,
            crypto: CryptoSession::new(),
            rotation: RotationSchedule::with_interval(now, KEY_ROTATION_INTERVAL),
            rotation_keys_seen: BoundedSet::new(ROTATION_KEYS_SEEN),
            cached_reply: None,
            next_send_sequence: INITIAL_SEQUENCE,
            next_expected_sequence: INITIAL_SEQUENCE,
            pending: VecDeque::new(),
            received: VecDeque::new(),
            jitter: JitterBuffer::new(config.max_jitter),
            recent_sequences: BoundedSet::new(MAX_RECENT_SEQUENCES),
            last_activity: now,
            last_send: now,
            handshake_sent_at: None,
            rotation_sent_at: None,
        }
    }

    /// Use a custom key rotation interval.
    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation = RotationSchedule::with_interval(self.rotation.installed_at(), interval);
        self
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Session token.
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Peer endpoint.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Socket the connection sends through.
    pub fn socket(&self) -> SocketHandle {
        self.socket
    }

    /// Which side opened the connection.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Connection limits.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Check if the handshake has completed.
    pub fn is_verified(&self) -> bool {
        matches!(self.state, HandshakeState::Verified | HandshakeState::Rotating)
    }

    /// Crypto session.
    pub fn crypto(&self) -> &CryptoSession {
        &self.crypto
    }

    #[cfg(test)]
    pub(crate) fn crypto_mut(&mut self) -> &mut CryptoSession {
        &mut self.crypto
    }

    /// Time of the last authenticated inbound frame.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Record an INIT (re)transmission.
    pub fn mark_handshake_sent(&mut self, now: Instant) {
        self.state = HandshakeState::HandshakeSent;
        self.handshake_sent_at = Some(now);
        self.last_send = now;
    }

    /// Check if an initiator should resend its INIT.
    pub fn handshake_retry_due(&self, now: Instant, interval: Duration) -> bool {
        self.role == Role::Initiator
            && self.state == HandshakeState::HandshakeSent
            && self
                .handshake_sent_at
                .is_some_and(|sent| now.saturating_duration_since(sent) >= interval)
    }

    /// Initiator: install the session key derived from the RESPONSE.
    pub fn complete_handshake(&mut self, keys: SessionKeys, now: Instant) {
        self.crypto.install(keys, now);
        self.rotation.reset(now);
        self.state = HandshakeState::Verified;
        self.handshake_sent_at = None;
        self.last_activity = now;
    }

    /// Responder: install the session key and remember the RESPONSE sent for
    /// `peer_key`. The connection stays unverified until authenticated data
    /// arrives.
    pub fn accept_handshake(
        &mut self,
        keys: SessionKeys,
        peer_key: [u8; PUBLIC_KEY_SIZE],
        response: Vec<u8>,
        now: Instant,
    ) {
        self.crypto.install(keys, now);
        self.rotation.reset(now);
        self.state = HandshakeState::HandshakeSent;
        self.handshake_sent_at = Some(now);
        self.cached_reply = Some(CachedReply {
            peer_key,
            datagram: response,
        });
        self.last_activity = now;
        self.last_send = now;
    }

    /// Previously sent reply for a retried request carrying `peer_key`.
    pub fn cached_reply(&self, peer_key: &[u8; PUBLIC_KEY_SIZE]) -> Option<&[u8]> {
        self.cached_reply
            .as_ref()
            .filter(|reply| reply.peer_key == *peer_key)
            .map(|reply| reply.datagram.as_slice())
    }

    /// Check if an initiator's key is due for rotation.
    pub fn rotation_due(&self, now: Instant) -> bool {
        self.role == Role::Initiator
            && self.state == HandshakeState::Verified
            && self.rotation.should_rotate(now)
    }

    /// Check if a rotation request should be resent.
    pub fn rotation_retry_due(&self, now: Instant, interval: Duration) -> bool {
        self.state == HandshakeState::Rotating
            && self
                .rotation_sent_at
                .is_some_and(|sent| now.saturating_duration_since(sent) >= interval)
    }

    /// Record a rotation request (re)transmission.
    pub fn mark_rotation_sent(&mut self, now: Instant) {
        self.state = HandshakeState::Rotating;
        self.rotation_sent_at = Some(now);
        self.last_send = now;
    }

    /// Remember a rotation public key; `false` if it was seen before.
    pub fn note_rotation_key(&mut self, public_key: [u8; PUBLIC_KEY_SIZE]) -> bool {
        self.rotation_keys_seen.insert(public_key)
    }

    /// Install a rotated key. The old key stays valid for decryption during
    /// the retention window and the nonce counter restarts.
    pub fn install_rotated_key(
        &mut self,
        keys: SessionKeys,
        reply: Option<([u8; PUBLIC_KEY_SIZE], Vec<u8>)>,
        now: Instant,
    ) {
        self.crypto.install(keys, now);
        self.rotation.on_rotated(now);
        self.state = HandshakeState::Verified;
        self.rotation_sent_at = None;
        self.cached_reply = reply.map(|(peer_key, datagram)| CachedReply { peer_key, datagram });
    }

    /// MAC over `parts` under the current key.
    pub fn authenticate(&self, parts: &[&[u8]]) -> TransportResult<[u8; MAC_SIZE]> {
        Ok(self.crypto.authenticate(parts)?)
    }

    /// Verify a MAC under the current (or retained) key.
    pub fn verify(&self, parts: &[&[u8]], tag: &[u8], now: Instant) -> TransportResult<()> {
        Ok(self.crypto.verify(parts, tag, now)?)
    }

    /// Check if nothing authenticated arrived within the timeout.
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > self.config.timeout
    }

    /// Check if nothing was sent for `interval`.
    pub fn is_idle(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_send) >= interval
    }

    // =========================================================================
    // Send path
    // =========================================================================

    /// Seal an application payload.
    ///
    /// Reliable packets are assigned the next sequence number and kept until
    /// acknowledged.
    ///
    /// # Errors
    /// `NotVerified` before the handshake completes, `PayloadTooLarge` for
    /// oversized payloads, `SendWindowFull` when `max_pending` unacknowledged
    /// packets are outstanding.
    pub fn send(
        &mut self,
        payload: &[u8],
        reliable: bool,
        now: Instant,
        now_ms: u64,
    ) -> TransportResult<Vec<u8>> {
        if !self.is_verified() {
            return Err(TransportError::NotVerified);
        }
        let packet = Packet::new(payload, reliable, self.remote)?;

        if !reliable {
            let (datagram, _) =
                seal_datagram(&mut self.crypto, self.token, DataFlags::NONE, None, payload, now_ms)?;
            self.last_send = now;
            return Ok(datagram);
        }

        self.prune_acked();
        if self.pending.len() >= self.config.max_pending {
            return Err(TransportError::SendWindowFull);
        }

        let seq = self.next_send_sequence;
        let (datagram, nonce) = seal_datagram(
            &mut self.crypto,
            self.token,
            DataFlags::RELIABLE,
            Some(seq),
            payload,
            now_ms,
        )?;
        self.next_send_sequence = next_sequence(seq);

        self.pending.push_back(PendingPacket {
            packet: packet
                .with_sequence(seq)
                .with_nonce(nonce)
                .with_timestamp(now_ms),
            last_sent: now,
            acked: false,
            transmissions: 1,
        });
        self.last_send = now;
        Ok(datagram)
    }

    /// Seal an empty keepalive.
    pub fn keepalive(&mut self, now: Instant, now_ms: u64) -> TransportResult<Vec<u8>> {
        let (datagram, _) =
            seal_datagram(&mut self.crypto, self.token, DataFlags::KEEPALIVE, None, &[], now_ms)?;
        self.last_send = now;
        Ok(datagram)
    }

    /// Re-seal every unacknowledged packet older than `timeout` with a fresh
    /// nonce and timestamp.
    pub fn retransmit_due(
        &mut self,
        timeout: Duration,
        now: Instant,
        now_ms: u64,
    ) -> TransportResult<Vec<Vec<u8>>> {
        self.prune_acked();

        let mut datagrams = Vec::new();
        for entry in self.pending.iter_mut() {
            if entry.acked || now.saturating_duration_since(entry.last_sent) < timeout {
                continue;
            }
            let seq = entry.packet.sequence();
            let (datagram, nonce) = seal_datagram(
                &mut self.crypto,
                self.token,
                DataFlags::RELIABLE,
                Some(seq),
                entry.packet.payload(),
                now_ms,
            )?;
            entry.packet = entry.packet.clone().with_nonce(nonce).with_timestamp(now_ms);
            entry.last_sent = now;
            entry.transmissions = entry.transmissions.saturating_add(1);
            datagrams.push(datagram);
        }

        if !datagrams.is_empty() {
            self.last_send = now;
        }
        Ok(datagrams)
    }

    /// Drop acknowledged entries from the send window.
    pub fn prune_acked(&mut self) {
        self.pending.retain(|entry| !entry.acked);
    }

    /// Unacknowledged reliable packets.
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|entry| !entry.acked).count()
    }

    /// Times the packet with `sequence` has been transmitted.
    pub fn transmissions(&self, sequence: u64) -> Option<u32> {
        self.pending
            .iter()
            .find(|entry| entry.packet.sequence() == sequence)
            .map(|entry| entry.transmissions)
    }

    fn ack_datagram(&mut self, seq: u64) -> TransportResult<Vec<u8>> {
        let nonce = self.crypto.next_nonce()?;
        let header = DataHeader::new(self.token, nonce, DataFlags::ACK).to_bytes();
        let seq_bytes = seq.to_le_bytes();
        let mac = self.crypto.authenticate(&[&header, &seq_bytes])?;

        let mut datagram = Vec::with_capacity(header.len() + SEQUENCE_SIZE + MAC_SIZE);
        datagram.extend_from_slice(&header);
        datagram.extend_from_slice(&seq_bytes);
        datagram.extend_from_slice(&mac);
        Ok(datagram)
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    /// Authenticate and absorb a DATA frame.
    ///
    /// # Errors
    /// Crypto failures (replay, AEAD, MAC, stale timestamp) and out-of-window
    /// sequences. The caller drops the datagram; no state changes.
    pub fn receive(
        &mut self,
        header: &DataHeader,
        body: &[u8],
        now: Instant,
        now_ms: u64,
    ) -> TransportResult<Received> {
        let header_bytes = header.to_bytes();
        let flags = header.flags;
        if (flags.is_ack() || flags.is_reliable()) && body.len() < SEQUENCE_SIZE {
            return Err(FrameError::TooShort {
                expected: DATA_HEADER_SIZE + SEQUENCE_SIZE,
                actual: DATA_HEADER_SIZE + body.len(),
            }
            .into());
        }

        let outcome = if flags.is_ack() {
            let (seq_bytes, tag) = body.split_at(SEQUENCE_SIZE);
            self.crypto.verify(&[&header_bytes, seq_bytes], tag, now)?;
            let seq = read_sequence(seq_bytes);
            self.on_ack(seq);
            Received::Ack { sequence: seq }
        } else if flags.is_reliable() {
            let (seq_bytes, sealed) = body.split_at(SEQUENCE_SIZE);
            let seq = read_sequence(seq_bytes);
            if sequence::distance(self.next_expected_sequence, seq) >= self.config.max_received as u64
                && !sequence::is_greater(self.next_expected_sequence, seq)
            {
                return Err(TransportError::OutOfWindow);
            }

            let mut aad = Vec::with_capacity(header_bytes.len() + SEQUENCE_SIZE);
            aad.extend_from_slice(&header_bytes);
            aad.extend_from_slice(seq_bytes);
            let opened = self.crypto.open(&header.nonce, &aad, sealed, now, now_ms)?;
            self.on_verified_traffic(now);

            if self.is_duplicate(seq) {
                let ack = self.ack_datagram(seq)?;
                return Ok(Received::Duplicate { sequence: seq, ack });
            }

            let packet = Packet::new(&opened.payload, true, self.remote)?
                .with_sequence(seq)
                .with_nonce(header.nonce)
                .with_timestamp(opened.timestamp_ms);
            self.insert_received(packet);
            self.recent_sequences.insert(seq);
            let ack = self.ack_datagram(seq)?;
            return Ok(Received::Reliable { sequence: seq, ack });
        } else {
            let opened = self
                .crypto
                .open(&header.nonce, &header_bytes, body, now, now_ms)?;
            if flags.is_keepalive() {
                Received::Keepalive
            } else {
                let packet = Packet::new(&opened.payload, false, self.remote)?
                    .with_nonce(header.nonce)
                    .with_timestamp(opened.timestamp_ms);
                self.jitter.push(packet, now_ms);
                Received::Unreliable
            }
        };

        self.on_verified_traffic(now);
        Ok(outcome)
    }

    /// Pop the next in-order reliable packet.
    ///
    /// Stale entries behind the expected sequence are discarded; a gap at the
    /// front leaves everything buffered.
    pub fn next_reliable(&mut self) -> Option<Packet> {
        loop {
            let front = self.received.front()?.sequence();
            if front == self.next_expected_sequence {
                self.next_expected_sequence = next_sequence(front);
                return self.received.pop_front();
            }
            if sequence::is_greater(self.next_expected_sequence, front) {
                self.received.pop_front();
                continue;
            }
            return None;
        }
    }

    /// Pop the next unreliable packet whose jitter delay has elapsed.
    pub fn next_unreliable(&mut self, min_delay: Duration, now_ms: u64) -> Option<Packet> {
        self.jitter.pop_ready(min_delay, now_ms)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state,
            pending: self.pending_count(),
            received: self.received.len(),
            jitter_depth: self.jitter.len(),
            jitter_delay: self.jitter.delay(Duration::ZERO),
            jitter: self.jitter.stats(),
            next_send_sequence: self.next_send_sequence,
            next_expected_sequence: self.next_expected_sequence,
            rotations: self.rotation.rotations(),
            used_nonces: self.crypto.used_nonce_count(),
        }
    }

    fn on_verified_traffic(&mut self, now: Instant) {
        self.last_activity = now;
        if self.role == Role::Responder && self.state == HandshakeState::HandshakeSent {
            self.state = HandshakeState::Verified;
            self.handshake_sent_at = None;
            self.cached_reply = None;
            tracing::debug!(connection = %self.id, peer = %self.remote, "handshake confirmed");
        }
    }

    fn on_ack(&mut self, seq: u64) {
        if let Some(entry) = self
            .pending
            .iter_mut()
            .find(|entry| entry.packet.sequence() == seq)
        {
            entry.acked = true;
        }
    }

    fn is_duplicate(&self, seq: u64) -> bool {
        sequence::is_greater(self.next_expected_sequence, seq)
            || self.recent_sequences.contains(&seq)
            || self.received.iter().any(|p| p.sequence() == seq)
    }

    fn insert_received(&mut self, packet: Packet) {
        let pos = self
            .received
            .iter()
            .position(|p| packet.sequence_cmp(p).is_lt())
            .unwrap_or(self.received.len());
        self.received.insert(pos, packet);
    }
}

/// Build `header ‖ [sequence] ‖ sealed`; the header and sequence are the AAD.
fn seal_datagram(
    crypto: &mut CryptoSession,
    token: SessionToken,
    flags: DataFlags,
    seq: Option<u64>,
    payload: &[u8],
    now_ms: u64,
) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
    let nonce = crypto.next_nonce()?;
    let mut datagram = DataHeader::new(token, nonce, flags).to_bytes().to_vec();
    if let Some(seq) = seq {
        datagram.extend_from_slice(&seq.to_le_bytes());
    }
    let sealed = crypto.seal(&nonce, &datagram, now_ms, payload)?;
    datagram.extend_from_slice(&sealed);
    Ok((datagram, nonce))
}

fn read_sequence(bytes: &[u8]) -> u64 {
    let mut seq = [0u8; SEQUENCE_SIZE];
    seq.copy_from_slice(&bytes[..SEQUENCE_SIZE]);
    u64::from_le_bytes(seq)
}

/// Sequence after `seq`, skipping zero (reserved for unreliable packets).
fn next_sequence(seq: u64) -> u64 {
    match seq.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}
