//! # Shroud Transport
//!
//! An encrypted, connection-oriented transport over UDP datagrams.
//!
//! Shroud performs an ephemeral X25519 key exchange, encrypts every payload
//! with ChaCha20-Poly1305 plus an independent BLAKE2s MAC, and layers two
//! delivery classes on top of raw packets:
//!
//! - **Reliable**: ordered, acknowledged, retransmitted until acked
//! - **Unreliable**: best effort, smoothed by an adaptive jitter buffer
//!
//! Replayed nonces and stale timestamps are rejected, session keys rotate
//! periodically, and each source address is rate limited.
//!
//! ## Feature Flags
//!
//! - `crypto` (default): Key agreement, AEAD+MAC sealing, replay guard, rotation
//! - `transport` (default): Packets, frames, connections, jitter buffer, sockets
//! - `manager` (default): [`ConnectionManager`] with handshakes and maintenance
//!
//! ## Modules
//!
//! - [`core`]: Constants, error types and the log sink (always included)
//! - [`crypto`]: Security layer (requires `crypto` feature)
//! - [`transport`]: Transport layer (requires `transport` feature)
//! - [`manager`]: Connection manager (requires `manager` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use shroud_transport::prelude::*;
//!
//! # async fn run() -> TransportResult<()> {
//! let manager = ConnectionManager::new(ManagerConfig::default());
//! let socket = manager.add_socket(0, false).await?;
//! let id = manager
//!     .initiate_handshake(socket, "127.0.0.1", 7777, ConnectionConfig::default())
//!     .await?;
//!
//! loop {
//!     manager.update(Duration::from_millis(200)).await;
//!     if manager.is_verified(id)? {
//!         manager.send(id, b"hello", true).await?;
//!     }
//!     while let Some(packet) = manager.receive(id, true, Duration::ZERO)? {
//!         println!("{} bytes", packet.payload().len());
//!     }
//!     tokio::time::sleep(Duration::from_millis(10)).await;
//! }
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Connection manager (feature-gated)
#[cfg(feature = "manager")]
#[cfg_attr(docsrs, doc(cfg(feature = "manager")))]
pub mod manager;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{CryptoError, LogSink, SharedLogSink, TracingSink};

    #[cfg(feature = "crypto")]
    pub use crate::crypto::{ConnectionId, SessionToken};

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        ConnectionConfig, ConnectionStats, HandshakeState, Packet, PacketError, SocketHandle,
        TransportError, TransportResult,
    };

    #[cfg(feature = "manager")]
    pub use crate::manager::{ConnectionManager, ManagerConfig, ManagerConfigBuilder};
}

// Re-export commonly used items at crate root
pub use crate::core::{CryptoError, LogSink, SharedLogSink};

#[cfg(feature = "transport")]
pub use transport::{ConnectionConfig, Packet, SocketHandle, TransportError, TransportResult};

#[cfg(feature = "manager")]
pub use manager::{ConnectionManager, ManagerConfig};
