//! Nonce construction for ChaCha20-Poly1305.
//!
//! Nonces are 12 bytes:
//! - Random (4 bytes), fresh per packet
//! - Counter (8 bytes, LE64), strictly increasing per connection
//!
//! The counter alone guarantees uniqueness for the lifetime of a session key;
//! it restarts at zero whenever a new key is installed.

use rand::{rngs::OsRng, RngCore};

use crate::core::{CryptoError, NONCE_COUNTER_SIZE, NONCE_RANDOM_SIZE, NONCE_SIZE};

/// Per-connection nonce source.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    counter: u64,
}

impl NonceGenerator {
    /// Create a generator starting at counter zero.
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    #[cfg(test)]
    pub(crate) fn resume_at(counter: u64) -> Self {
        Self { counter }
    }

    /// Produce the next nonce.
    ///
    /// # Errors
    /// Returns `CounterExhaustion` once the counter space is used up; the key
    /// must be rotated before sending again.
    pub fn next_nonce(&mut self) -> Result<[u8; NONCE_SIZE], CryptoError> {
        if self.counter == u64::MAX {
            return Err(CryptoError::CounterExhaustion);
        }
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce[..NONCE_RANDOM_SIZE]);
        nonce[NONCE_RANDOM_SIZE..].copy_from_slice(&self.counter.to_le_bytes());
        self.counter += 1;
        Ok(nonce)
    }

    /// Counter value the next nonce will carry.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Restart the counter (new session key installed).
    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

/// Extract the counter portion of a nonce.
pub fn nonce_counter(nonce: &[u8; NONCE_SIZE]) -> u64 {
    let mut counter = [0u8; NONCE_COUNTER_SIZE];
    counter.copy_from_slice(&nonce[NONCE_RANDOM_SIZE..]);
    u64::from_le_bytes(counter)
}
