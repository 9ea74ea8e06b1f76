//! Connection manager.
//!
//! Socket multiplexing, handshake orchestration, rate limiting and periodic
//! maintenance on top of the transport layer.

mod config;
#[allow(clippy::module_inception)]
mod manager;

pub use config::{ManagerConfig, ManagerConfigBuilder};
pub use manager::ConnectionManager;
