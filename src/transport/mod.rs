//! Transport layer.
//!
//! Everything between the crypto primitives and the connection manager:
//!
//! - **Packets**: [`Packet`], the unit of application data
//! - **Sequence arithmetic**: wraparound-aware ordering in [`sequence`]
//! - **Wire frames**: [`Frame`] parsing and encoders for every packet type
//! - **Connections**: [`Connection`] with reliable windows and a [`JitterBuffer`]
//! - **Sockets**: [`SocketPool`] owning the bound UDP sockets
//! - **Rate limiting**: per-source [`RateLimiter`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         ConnectionManager               │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   frames, sequencing, jitter, sockets   │
//! ├─────────────────────────────────────────┤
//! │         Security Layer                  │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod error;
mod frame;
mod jitter;
mod packet;
mod rate_limit;
pub mod sequence;
mod socket;

pub use connection::{Connection, ConnectionConfig, ConnectionStats, HandshakeState, Received};
pub use crate::crypto::Role;
pub use error::{TransportError, TransportResult};
pub use frame::{
    encode_handshake, encode_key_rotation, key_rotation_mac_input, parse, DataFlags, DataHeader,
    Frame, FrameError, PacketType,
};
pub use jitter::{JitterBuffer, JitterStats};
pub use packet::{Packet, PacketError};
pub use rate_limit::RateLimiter;
pub use socket::{bind_udp, try_recv, SocketHandle, SocketPool};
