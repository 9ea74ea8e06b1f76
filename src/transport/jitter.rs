//! Jitter buffer for unreliable delivery.
//!
//! Unreliable packets are held for an adaptive delay before they are handed
//! to the application, smoothing bursty arrival. The delay tracks the running
//! mean and standard deviation of inter-packet deltas over the last
//! [`JITTER_HISTORY_SIZE`] packets:
//!
//! ```text
//! delay = clamp(max(min_requested, mean + 2 * stddev), 10ms, 500ms)
//! ```
//!
//! Packets leave in arrival order; the buffer never reorders.

use std::collections::VecDeque;
use std::time::Duration;

use crate::core::{JITTER_HISTORY_SIZE, MAX_JITTER_DELAY, MIN_JITTER_DELAY};

use super::packet::Packet;

/// A buffered packet awaiting release.
#[derive(Debug)]
struct JitterEntry {
    packet: Packet,
    /// When the packet was pushed (local wall-clock ms).
    arrival_ms: u64,
}

/// Jitter buffer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JitterStats {
    /// Packets accepted.
    pub received: u64,
    /// Packets released to the application.
    pub released: u64,
    /// Packets evicted because the buffer was full.
    pub evicted: u64,
}

/// Adaptive FIFO delay buffer.
#[derive(Debug)]
pub struct JitterBuffer {
    entries: VecDeque<JitterEntry>,
    capacity: usize,
    /// Inter-packet deltas in milliseconds, oldest first.
    history: VecDeque<f64>,
    mean: f64,
    variance: f64,
    last_timestamp: Option<u64>,
    stats: JitterStats,
}

impl JitterBuffer {
    /// Create a buffer holding at most `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            history: VecDeque::with_capacity(JITTER_HISTORY_SIZE),
            mean: 0.0,
            variance: 0.0,
            last_timestamp: None,
            stats: JitterStats::default(),
        }
    }

    /// Push a packet that arrived at `arrival_ms`.
    ///
    /// The packet's timestamp is the sender's clock if present, otherwise
    /// the arrival time. When the buffer is full the oldest packet is evicted.
    pub fn push(&mut self, mut packet: Packet, arrival_ms: u64) {
        if packet.timestamp() == 0 {
            packet.set_timestamp(arrival_ms);
        }
        self.record_delta(packet.timestamp());

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.stats.evicted += 1;
        }

        self.entries.push_back(JitterEntry { packet, arrival_ms });
        self.stats.received += 1;
    }

    /// Release the head packet if it has been buffered for the current delay.
    pub fn pop_ready(&mut self, min_delay: Duration, now_ms: u64) -> Option<Packet> {
        let delay = self.delay(min_delay).as_millis() as u64;
        let head = self.entries.front()?;
        if now_ms.saturating_sub(head.arrival_ms) < delay {
            return None;
        }

        self.stats.released += 1;
        self.entries.pop_front().map(|entry| entry.packet)
    }

    /// Current release delay for a requested minimum.
    pub fn delay(&self, min_delay: Duration) -> Duration {
        let adaptive_ms = self.mean + 2.0 * self.variance.sqrt();
        let adaptive = Duration::from_micros((adaptive_ms * 1000.0) as u64);
        min_delay
            .max(adaptive)
            .clamp(MIN_JITTER_DELAY, MAX_JITTER_DELAY)
    }

    /// Mean inter-packet delta in milliseconds.
    pub fn mean_delta_ms(&self) -> f64 {
        self.mean
    }

    /// Standard deviation of inter-packet deltas in milliseconds.
    pub fn std_dev_ms(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Number of buffered packets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of buffered packets.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer statistics.
    pub fn stats(&self) -> JitterStats {
        self.stats
    }

    fn record_delta(&mut self, timestamp: u64) {
        if let Some(last) = self.last_timestamp {
            let delta = timestamp.abs_diff(last) as f64;
            if self.history.len() >= JITTER_HISTORY_SIZE {
                self.history.pop_front();
            }
            self.history.push_back(delta);

            let n = self.history.len() as f64;
            self.mean = self.history.iter().sum::<f64>() / n;
            self.variance = self
                .history
                .iter()
                .map(|d| (d - self.mean).powi(2))
                .sum::<f64>()
                / n;
        }
        self.last_timestamp = Some(timestamp);
    }
}
