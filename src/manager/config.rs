//! Connection manager configuration.

use std::time::Duration;

use crate::core::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_RATE_LIMIT, DEFAULT_RETRANSMIT_TIMEOUT, HANDSHAKE_RETRY_INTERVAL,
    KEEPALIVE_INTERVAL, KEY_ROTATION_INTERVAL, MAX_DATAGRAM_SIZE, RATE_LIMIT_WINDOW,
};
use crate::transport::ConnectionConfig;

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum number of live connections (verified or handshaking).
    pub max_connections: usize,

    /// Packets accepted per source IP per window; zero disables limiting.
    pub rate_limit_per_sec: u32,

    /// Rate limit window.
    pub rate_limit_window: Duration,

    /// Session key lifetime before the initiator rotates it.
    pub key_rotation_interval: Duration,

    /// Resend interval for unanswered HANDSHAKE_INIT and KEY_ROTATION.
    pub handshake_retry_interval: Duration,

    /// Send-side idle time before a keepalive goes out.
    pub keepalive_interval: Duration,

    /// Retransmit timeout used by [`ConnectionManager::tick`].
    ///
    /// [`ConnectionManager::tick`]: super::ConnectionManager::tick
    pub default_retransmit_timeout: Duration,

    /// Receive buffer size for socket reads.
    pub recv_buffer_size: usize,

    /// Limits applied to connections created by inbound handshakes.
    pub connection: ConnectionConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            rate_limit_per_sec: DEFAULT_RATE_LIMIT,
            rate_limit_window: RATE_LIMIT_WINDOW,
            key_rotation_interval: KEY_ROTATION_INTERVAL,
            handshake_retry_interval: HANDSHAKE_RETRY_INTERVAL,
            keepalive_interval: KEEPALIVE_INTERVAL,
            default_retransmit_timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Builder for a [`ManagerConfig`].
#[derive(Debug)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
        }
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the per-source packet ceiling.
    pub fn rate_limit(mut self, per_window: u32) -> Self {
        self.config.rate_limit_per_sec = per_window;
        self
    }

    /// Set the rate limit window.
    pub fn rate_limit_window(mut self, window: Duration) -> Self {
        self.config.rate_limit_window = window;
        self
    }

    /// Set the key rotation interval.
    pub fn key_rotation_interval(mut self, interval: Duration) -> Self {
        self.config.key_rotation_interval = interval;
        self
    }

    /// Set the handshake retry interval.
    pub fn handshake_retry_interval(mut self, interval: Duration) -> Self {
        self.config.handshake_retry_interval = interval;
        self
    }

    /// Set the keepalive interval.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Set the default retransmit timeout.
    pub fn retransmit_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_retransmit_timeout = timeout;
        self
    }

    /// Set the socket receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the limits for inbound connections.
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ManagerConfig {
        self.config
    }
}

impl Default for ManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
