//! Connection manager.
//!
//! [`ConnectionManager`] owns the socket pool, the connection table, the
//! in-flight ephemeral keypairs and the rate-limit ledger. Inbound datagrams
//! are demultiplexed into the handshake, key-rotation and data paths;
//! [`ConnectionManager::update`] drives retransmission, eviction, key
//! rotation and rate-limit decay.
//!
//! # Locking
//!
//! The manager state and each connection sit behind their own
//! `std::sync::Mutex`. Locks are always taken manager first, then
//! connection, and neither is held across an `.await`: protocol work
//! produces a list of outgoing datagrams that is written after the locks are
//! released.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use crate::core::{SharedLogSink, TracingSink, MAC_SIZE, PUBLIC_KEY_SIZE};
use crate::crypto::{unix_millis, ConnectionId, ConnectionIdHasher, EphemeralKeypair, SessionKeys, SessionToken};
use crate::transport::{
    bind_udp, encode_handshake, encode_key_rotation, key_rotation_mac_input, parse, try_recv,
    Connection, ConnectionConfig, ConnectionStats, DataHeader, Frame, HandshakeState, Packet,
    PacketType, RateLimiter, Role, SocketHandle, SocketPool, TransportError, TransportResult,
};

use super::config::ManagerConfig;

/// Datagrams drained from one socket per `poll`.
const MAX_DRAIN_PER_SOCKET: usize = 1024;

/// A datagram ready to be written once all locks are released.
struct Outgoing {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    datagram: Vec<u8>,
}

struct ManagerState {
    sockets: SocketPool,
    connections: HashMap<ConnectionId, Arc<Mutex<Connection>>>,
    /// Ephemeral keypairs for handshakes and rotations we initiated.
    handshake_keys: HashMap<ConnectionId, EphemeralKeypair>,
    rate_limiter: RateLimiter,
}

/// Owner of every connection, socket and in-flight handshake.
///
/// # Example
///
/// ```ignore
/// use shroud_transport::prelude::*;
///
/// let server = ConnectionManager::new(ManagerConfig::default());
/// let port = server.local_addr(server.add_socket(7777, false).await?)?.port();
///
/// let client = ConnectionManager::new(ManagerConfig::default());
/// let socket = client.add_socket(0, false).await?;
/// let id = client
///     .initiate_handshake(socket, "127.0.0.1", port, ConnectionConfig::default())
///     .await?;
///
/// loop {
///     client.update(Duration::from_millis(200)).await;
///     server.update(Duration::from_millis(200)).await;
///     if client.is_verified(id)? {
///         client.send(id, b"hello", true).await?;
///     }
/// }
/// ```
pub struct ConnectionManager {
    config: ManagerConfig,
    sink: SharedLogSink,
    id_hasher: ConnectionIdHasher,
    state: Mutex<ManagerState>,
}

impl ConnectionManager {
    /// Create a manager logging drops through `tracing`.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_log_sink(config, Arc::new(TracingSink))
    }

    /// Create a manager reporting dropped and invalid packets to `sink`.
    pub fn with_log_sink(config: ManagerConfig, sink: SharedLogSink) -> Self {
        let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_window);
        Self {
            config,
            sink,
            id_hasher: ConnectionIdHasher::generate(),
            state: Mutex::new(ManagerState {
                sockets: SocketPool::new(),
                connections: HashMap::new(),
                handshake_keys: HashMap::new(),
                rate_limiter,
            }),
        }
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // =========================================================================
    // Sockets
    // =========================================================================

    /// Bind a UDP socket on all interfaces; port 0 picks an ephemeral port.
    ///
    /// # Errors
    /// Bind failures are returned as `Io`.
    pub async fn add_socket(&self, port: u16, ipv6: bool) -> TransportResult<SocketHandle> {
        let socket = bind_udp(port, ipv6).await?;
        let local = socket.local_addr()?;
        let handle = self.lock_state().sockets.insert(socket);
        tracing::info!(%handle, %local, "socket bound");
        Ok(handle)
    }

    /// Local address of a socket.
    pub fn local_addr(&self, handle: SocketHandle) -> TransportResult<SocketAddr> {
        let state = self.lock_state();
        let socket = state.sockets.get(handle).ok_or(TransportError::UnknownSocket)?;
        Ok(socket.local_addr()?)
    }

    /// Wait until `handle` has a datagram queued, up to `timeout`.
    ///
    /// Returns `false` on timeout. Follow with [`poll`](Self::poll) or
    /// [`update`](Self::update) to process what arrived.
    pub async fn recv_ready(&self, handle: SocketHandle, timeout: Duration) -> TransportResult<bool> {
        let socket = self
            .lock_state()
            .sockets
            .get(handle)
            .cloned()
            .ok_or(TransportError::UnknownSocket)?;

        match tokio::time::timeout(timeout, socket.readable()).await {
            Ok(ready) => {
                ready?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    // =========================================================================
    // Application API
    // =========================================================================

    /// Open a connection to `ip:port` through `socket` and send HANDSHAKE_INIT.
    ///
    /// The address family of `ip` must match the socket's. The connection is
    /// usable once [`is_verified`](Self::is_verified) reports `true`; INIT is
    /// resent by [`update`](Self::update) until then, and the attempt is
    /// abandoned after `config.timeout`.
    ///
    /// # Errors
    /// `InvalidAddress` for an unparseable IP, port 0 or a family mismatch;
    /// `UnknownSocket`; `ConnectionLimit` when the table is full.
    pub async fn initiate_handshake(
        &self,
        socket: SocketHandle,
        ip: &str,
        port: u16,
        config: ConnectionConfig,
    ) -> TransportResult<ConnectionId> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| TransportError::InvalidAddress(ip.to_string()))?;
        if port == 0 {
            return Err(TransportError::InvalidAddress(format!("{ip}:0")));
        }
        let remote = SocketAddr::new(ip, port);
        let now = Instant::now();

        let (id, outgoing) = {
            let mut state = self.lock_state();
            let udp = state
                .sockets
                .get(socket)
                .cloned()
                .ok_or(TransportError::UnknownSocket)?;
            if state.sockets.is_ipv6(socket) != Some(remote.is_ipv6()) {
                return Err(TransportError::InvalidAddress(format!(
                    "{remote} does not match the address family of {socket}"
                )));
            }
            if state.connections.len() >= self.config.max_connections {
                return Err(TransportError::ConnectionLimit {
                    max: self.config.max_connections,
                });
            }

            let (token, id) = loop {
                let token = SessionToken::generate();
                let id = self.id_hasher.derive(&remote, token);
                if !state.connections.contains_key(&id) {
                    break (token, id);
                }
            };

            let keypair = EphemeralKeypair::generate();
            let datagram = encode_handshake(PacketType::HandshakeInit, token, &keypair.public_bytes());

            let mut conn = Connection::new(id, token, remote, socket, Role::Initiator, config, now)
                .with_rotation_interval(self.config.key_rotation_interval);
            conn.mark_handshake_sent(now);

            state.connections.insert(id, Arc::new(Mutex::new(conn)));
            state.handshake_keys.insert(id, keypair);
            (
                id,
                Outgoing {
                    socket: udp,
                    addr: remote,
                    datagram,
                },
            )
        };

        tracing::debug!(connection = %id, peer = %remote, "handshake initiated");
        self.flush(vec![outgoing]).await;
        Ok(id)
    }

    /// Encrypt and send `payload` on a verified connection.
    ///
    /// A reliable packet is committed once it is queued: if the socket write
    /// fails, the failure goes to the log sink, `Ok` is returned and
    /// [`update`](Self::update) retransmits it.
    ///
    /// # Errors
    /// `ConnectionNotFound`, `NotVerified`, `Packet` (payload too large),
    /// `SendWindowFull` for reliable sends, `Io` if an unreliable write fails.
    /// A fatal error (nonce counter exhausted) also closes the connection.
    pub async fn send(&self, id: ConnectionId, payload: &[u8], reliable: bool) -> TransportResult<()> {
        let (conn, socket) = self.lookup(id)?;
        let sealed = {
            let mut conn = lock(&conn);
            conn.send(payload, reliable, Instant::now(), unix_millis())
                .map(|datagram| (datagram, conn.remote_addr()))
        };
        let (datagram, addr) = match sealed {
            Ok(sealed) => sealed,
            Err(e) => {
                if e.is_fatal() {
                    self.evict(id, &e);
                }
                return Err(e);
            }
        };

        match socket.send_to(&datagram, addr).await {
            Ok(_) => Ok(()),
            Err(e) if reliable => {
                self.drop_packet(format!("send to {addr} failed, queued for retransmit: {e}"));
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Take the next delivered packet.
    ///
    /// Reliable packets come out in sequence order. Unreliable packets come
    /// out in arrival order once they have sat in the jitter buffer for the
    /// adaptive delay, never less than `min_jitter_delay`.
    ///
    /// # Errors
    /// `ConnectionNotFound` for unknown or evicted ids.
    pub fn receive(
        &self,
        id: ConnectionId,
        reliable: bool,
        min_jitter_delay: Duration,
    ) -> TransportResult<Option<Packet>> {
        let (conn, _) = self.lookup(id)?;
        let mut conn = lock(&conn);
        Ok(if reliable {
            conn.next_reliable()
        } else {
            conn.next_unreliable(min_jitter_delay, unix_millis())
        })
    }

    /// Drain and process every queued datagram, then run maintenance.
    ///
    /// Must be called periodically. Unacknowledged reliable packets older
    /// than `retransmit_timeout` are resent.
    pub async fn update(&self, retransmit_timeout: Duration) -> usize {
        let processed = self.poll().await;
        let outgoing = {
            let mut state = self.lock_state();
            self.maintain(&mut state, retransmit_timeout, Instant::now(), unix_millis())
        };
        self.flush(outgoing).await;
        processed
    }

    /// [`update`](Self::update) with the configured retransmit timeout.
    pub async fn tick(&self) -> usize {
        self.update(self.config.default_retransmit_timeout).await
    }

    /// Drain every socket without waiting and dispatch what arrived.
    ///
    /// Returns the number of datagrams processed.
    pub async fn poll(&self) -> usize {
        let mut buf = vec![0u8; self.config.recv_buffer_size];
        let now = Instant::now();
        let now_ms = unix_millis();

        let (processed, outgoing) = {
            let mut state = self.lock_state();
            let mut inbound = Vec::new();
            for (handle, socket) in state.sockets.iter() {
                for _ in 0..MAX_DRAIN_PER_SOCKET {
                    match try_recv(socket, &mut buf) {
                        Ok(Some((len, from))) => inbound.push((handle, Arc::clone(socket), from, buf[..len].to_vec())),
                        Ok(None) => break,
                        Err(e) => {
                            self.drop_packet(format!("receive on {handle} failed: {e}"));
                            break;
                        }
                    }
                }
            }

            let processed = inbound.len();
            let mut outgoing = Vec::new();
            for (handle, socket, from, datagram) in inbound {
                if let Some(reply) = self.dispatch(&mut state, handle, from, &datagram, now, now_ms) {
                    outgoing.push(Outgoing {
                        socket,
                        addr: from,
                        datagram: reply,
                    });
                }
            }
            (processed, outgoing)
        };

        self.flush(outgoing).await;
        processed
    }

    /// Drop a connection and any in-flight key material.
    ///
    /// # Errors
    /// `ConnectionNotFound` if the id is unknown.
    pub fn close(&self, id: ConnectionId) -> TransportResult<()> {
        let mut state = self.lock_state();
        state.handshake_keys.remove(&id);
        if state.connections.remove(&id).is_none() {
            return Err(TransportError::ConnectionNotFound(id));
        }
        tracing::debug!(connection = %id, "connection closed");
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Number of live connections, verified or not.
    pub fn connection_count(&self) -> usize {
        self.lock_state().connections.len()
    }

    /// Ids of every live connection, including ones opened by peers.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock_state().connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Check if the handshake on `id` has completed.
    pub fn is_verified(&self, id: ConnectionId) -> TransportResult<bool> {
        let (conn, _) = self.lookup(id)?;
        Ok(lock(&conn).is_verified())
    }

    /// Peer address of `id`.
    pub fn remote_addr(&self, id: ConnectionId) -> TransportResult<SocketAddr> {
        let (conn, _) = self.lookup(id)?;
        Ok(lock(&conn).remote_addr())
    }

    /// Counter snapshot for `id`.
    pub fn connection_stats(&self, id: ConnectionId) -> TransportResult<ConnectionStats> {
        let (conn, _) = self.lookup(id)?;
        Ok(lock(&conn).stats())
    }

    // =========================================================================
    // Inbound dispatch
    // =========================================================================

    fn dispatch(
        &self,
        state: &mut ManagerState,
        handle: SocketHandle,
        from: SocketAddr,
        datagram: &[u8],
        now: Instant,
        now_ms: u64,
    ) -> Option<Vec<u8>> {
        if !state.rate_limiter.check(from.ip(), now) {
            self.drop_packet(format!("rate limit exceeded for {}, dropping packet", from.ip()));
            return None;
        }

        let frame = match parse(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                self.drop_packet(format!("malformed packet from {from}: {e}"));
                return None;
            }
        };
        let id = self.id_hasher.derive(&from, frame.token());

        match frame {
            Frame::HandshakeInit { token, public_key } => {
                self.on_handshake_init(state, handle, from, id, token, public_key, now)
            }
            Frame::HandshakeResponse { public_key, .. } => {
                self.on_handshake_response(state, id, public_key, now, now_ms)
            }
            Frame::KeyRotation {
                token,
                public_key,
                mac,
            } => self.on_key_rotation(state, id, token, public_key, mac, now),
            Frame::Data { header, body } => self.on_data(state, id, &header, body, now, now_ms),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_handshake_init(
        &self,
        state: &mut ManagerState,
        handle: SocketHandle,
        from: SocketAddr,
        id: ConnectionId,
        token: SessionToken,
        peer_key: [u8; PUBLIC_KEY_SIZE],
        now: Instant,
    ) -> Option<Vec<u8>> {
        match state.connections.get(&id).cloned() {
            Some(existing) => {
                let existing = lock(&existing);
                if existing.is_verified() || existing.role() == Role::Initiator {
                    self.drop_packet(format!(
                        "handshake init for established connection {id}, dropping"
                    ));
                    return None;
                }
                if let Some(reply) = existing.cached_reply(&peer_key) {
                    return Some(reply.to_vec());
                }
            }
            None if state.connections.len() >= self.config.max_connections => {
                self.drop_packet(format!(
                    "connection limit ({}) reached, dropping handshake from {from}",
                    self.config.max_connections
                ));
                return None;
            }
            None => {}
        }

        let keypair = EphemeralKeypair::generate();
        let keys = match keypair
            .agree(&peer_key)
            .and_then(|shared| SessionKeys::derive(&shared, token, Role::Responder))
        {
            Ok(keys) => keys,
            Err(e) => {
                self.drop_packet(format!("handshake from {from} failed: {e}"));
                return None;
            }
        };

        let response = encode_handshake(PacketType::HandshakeResponse, token, &keypair.public_bytes());
        let mut conn = Connection::new(
            id,
            token,
            from,
            handle,
            Role::Responder,
            self.config.connection,
            now,
        )
        .with_rotation_interval(self.config.key_rotation_interval);
        conn.accept_handshake(keys, peer_key, response.clone(), now);

        state.connections.insert(id, Arc::new(Mutex::new(conn)));
        tracing::debug!(connection = %id, peer = %from, "handshake accepted");
        Some(response)
    }

    fn on_handshake_response(
        &self,
        state: &mut ManagerState,
        id: ConnectionId,
        peer_key: [u8; PUBLIC_KEY_SIZE],
        now: Instant,
        now_ms: u64,
    ) -> Option<Vec<u8>> {
        let Some(conn) = state.connections.get(&id).cloned() else {
            self.drop_packet(format!("handshake response for unknown connection {id}"));
            return None;
        };
        let mut conn = lock(&conn);
        if conn.role() != Role::Initiator || conn.state() != HandshakeState::HandshakeSent {
            self.drop_packet(format!("unexpected handshake response for {id}"));
            return None;
        }
        let Some(keypair) = state.handshake_keys.get(&id) else {
            self.drop_packet(format!("no handshake in flight for {id}"));
            return None;
        };

        let keys = match keypair
            .agree(&peer_key)
            .and_then(|shared| SessionKeys::derive(&shared, conn.token(), Role::Initiator))
        {
            Ok(keys) => keys,
            Err(e) => {
                self.drop_packet(format!("handshake response for {id} rejected: {e}"));
                return None;
            }
        };

        state.handshake_keys.remove(&id);
        conn.complete_handshake(keys, now);
        tracing::info!(connection = %id, peer = %conn.remote_addr(), "handshake complete");

        // Key confirmation for the responder.
        match conn.keepalive(now, now_ms) {
            Ok(datagram) => Some(datagram),
            Err(e) => {
                self.drop_packet(format!("key confirmation for {id} failed: {e}"));
                None
            }
        }
    }

    fn on_key_rotation(
        &self,
        state: &mut ManagerState,
        id: ConnectionId,
        token: SessionToken,
        peer_key: [u8; PUBLIC_KEY_SIZE],
        mac: [u8; MAC_SIZE],
        now: Instant,
    ) -> Option<Vec<u8>> {
        let Some(conn) = state.connections.get(&id).cloned() else {
            self.drop_packet(format!("key rotation for unknown connection {id}"));
            return None;
        };
        let mut conn = lock(&conn);
        if !conn.is_verified() {
            self.drop_packet(format!("key rotation for unverified connection {id}"));
            return None;
        }
        if let Err(e) = conn.verify(&[&key_rotation_mac_input(token, &peer_key)], &mac, now) {
            self.drop_packet(format!("unauthenticated key rotation for {id}: {e}"));
            return None;
        }

        match conn.role() {
            Role::Responder => {
                if let Some(reply) = conn.cached_reply(&peer_key) {
                    return Some(reply.to_vec());
                }
                if !conn.note_rotation_key(peer_key) {
                    self.drop_packet(format!("replayed key rotation for {id}"));
                    return None;
                }

                let keypair = EphemeralKeypair::generate();
                let keys = match keypair
                    .agree(&peer_key)
                    .and_then(|shared| SessionKeys::derive(&shared, token, Role::Responder))
                {
                    Ok(keys) => keys,
                    Err(e) => {
                        self.drop_packet(format!("key rotation for {id} failed: {e}"));
                        return None;
                    }
                };

                let public_key = keypair.public_bytes();
                let reply_mac = match conn.authenticate(&[&key_rotation_mac_input(token, &public_key)]) {
                    Ok(mac) => mac,
                    Err(e) => {
                        self.drop_packet(format!("key rotation reply for {id} failed: {e}"));
                        return None;
                    }
                };
                let reply = encode_key_rotation(token, &public_key, &reply_mac);
                conn.install_rotated_key(keys, Some((peer_key, reply.clone())), now);
                tracing::info!(connection = %id, "session key rotated");
                Some(reply)
            }
            Role::Initiator => {
                if conn.state() != HandshakeState::Rotating {
                    self.drop_packet(format!("unexpected key rotation response for {id}"));
                    return None;
                }
                if !conn.note_rotation_key(peer_key) {
                    self.drop_packet(format!("replayed key rotation for {id}"));
                    return None;
                }
                let Some(keypair) = state.handshake_keys.get(&id) else {
                    self.drop_packet(format!("no key rotation in flight for {id}"));
                    return None;
                };
                let keys = match keypair
                    .agree(&peer_key)
                    .and_then(|shared| SessionKeys::derive(&shared, token, Role::Initiator))
                {
                    Ok(keys) => keys,
                    Err(e) => {
                        self.drop_packet(format!("key rotation response for {id} rejected: {e}"));
                        return None;
                    }
                };

                state.handshake_keys.remove(&id);
                conn.install_rotated_key(keys, None, now);
                tracing::info!(connection = %id, "session key rotated");
                None
            }
        }
    }

    fn on_data(
        &self,
        state: &mut ManagerState,
        id: ConnectionId,
        header: &DataHeader,
        body: &[u8],
        now: Instant,
        now_ms: u64,
    ) -> Option<Vec<u8>> {
        let Some(conn) = state.connections.get(&id).cloned() else {
            self.drop_packet(format!("data for unknown connection {id}"));
            return None;
        };
        let mut conn = lock(&conn);
        match conn.receive(header, body, now, now_ms) {
            Ok(received) => received.into_reply(),
            Err(e) if e.is_security_error() => {
                self.drop_packet(format!("rejected packet for {id}: {e}"));
                None
            }
            Err(e) => {
                self.drop_packet(format!("dropped packet for {id}: {e}"));
                None
            }
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    fn maintain(
        &self,
        state: &mut ManagerState,
        retransmit_timeout: Duration,
        now: Instant,
        now_ms: u64,
    ) -> Vec<Outgoing> {
        state.rate_limiter.decay(now);

        let expired: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, conn)| lock(conn).is_timed_out(now))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            state.connections.remove(&id);
            state.handshake_keys.remove(&id);
            tracing::info!(connection = %id, "connection timed out, evicted");
        }

        let mut outgoing = Vec::new();
        let mut fatal = Vec::new();
        for (id, conn) in &state.connections {
            let mut conn = lock(conn);
            let Some(socket) = state.sockets.get(conn.socket()) else {
                continue;
            };
            let addr = conn.remote_addr();
            let mut emit = |datagram: Vec<u8>| {
                outgoing.push(Outgoing {
                    socket: Arc::clone(socket),
                    addr,
                    datagram,
                })
            };

            if conn.handshake_retry_due(now, self.config.handshake_retry_interval) {
                if let Some(keypair) = state.handshake_keys.get(id) {
                    emit(encode_handshake(
                        PacketType::HandshakeInit,
                        conn.token(),
                        &keypair.public_bytes(),
                    ));
                    conn.mark_handshake_sent(now);
                    tracing::debug!(connection = %id, "handshake init resent");
                }
                continue;
            }
            if !conn.is_verified() {
                continue;
            }

            match conn.retransmit_due(retransmit_timeout, now, now_ms) {
                Ok(datagrams) => datagrams.into_iter().for_each(&mut emit),
                Err(e) if e.is_fatal() => {
                    fatal.push((*id, e));
                    continue;
                }
                Err(e) => self.drop_packet(format!("retransmit on {id} failed: {e}")),
            }

            let rotation_keypair = if conn.rotation_due(now) {
                let keypair = EphemeralKeypair::generate();
                let public_key = keypair.public_bytes();
                state.handshake_keys.insert(*id, keypair);
                Some(public_key)
            } else if conn.rotation_retry_due(now, self.config.handshake_retry_interval) {
                state.handshake_keys.get(id).map(EphemeralKeypair::public_bytes)
            } else {
                None
            };
            if let Some(public_key) = rotation_keypair {
                let token = conn.token();
                match conn.authenticate(&[&key_rotation_mac_input(token, &public_key)]) {
                    Ok(mac) => {
                        emit(encode_key_rotation(token, &public_key, &mac));
                        conn.mark_rotation_sent(now);
                        tracing::debug!(connection = %id, "key rotation requested");
                    }
                    Err(e) => self.drop_packet(format!("key rotation on {id} failed: {e}")),
                }
            }

            if conn.is_idle(now, self.config.keepalive_interval) {
                match conn.keepalive(now, now_ms) {
                    Ok(datagram) => emit(datagram),
                    Err(e) if e.is_fatal() => fatal.push((*id, e)),
                    Err(e) => self.drop_packet(format!("keepalive on {id} failed: {e}")),
                }
            }
        }

        for (id, e) in fatal {
            state.connections.remove(&id);
            state.handshake_keys.remove(&id);
            self.drop_packet(format!("connection {id} closed: {e}"));
        }
        outgoing
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn flush(&self, outgoing: Vec<Outgoing>) {
        for out in outgoing {
            if let Err(e) = out.socket.send_to(&out.datagram, out.addr).await {
                self.drop_packet(format!("send to {} failed: {e}", out.addr));
            }
        }
    }

    fn lookup(&self, id: ConnectionId) -> TransportResult<(Arc<Mutex<Connection>>, Arc<UdpSocket>)> {
        let state = self.lock_state();
        let conn = state
            .connections
            .get(&id)
            .cloned()
            .ok_or(TransportError::ConnectionNotFound(id))?;
        let handle = lock(&conn).socket();
        let socket = state
            .sockets
            .get(handle)
            .cloned()
            .ok_or(TransportError::UnknownSocket)?;
        Ok((conn, socket))
    }

    fn evict(&self, id: ConnectionId, reason: &TransportError) {
        let mut state = self.lock_state();
        state.connections.remove(&id);
        state.handshake_keys.remove(&id);
        self.drop_packet(format!("connection {id} closed: {reason}"));
    }

    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        lock(&self.state)
    }

    fn drop_packet(&self, message: String) {
        self.sink.log(&message);
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("sockets", &state.sockets.len())
            .field("connections", &state.connections.len())
            .field("handshakes_in_flight", &state.handshake_keys.len())
            .finish()
    }
}

/// A panic while a lock was held leaves plain data behind; keep using it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
