//! Core constants, error types and the diagnostic log sink.

mod constants;
mod error;
mod log;

pub use constants::*;
pub use error::*;
pub use log::*;
