//! Session key rotation.
//!
//! Verified connections rotate their session key periodically
//! (`KEY_ROTATION_INTERVAL`, 60 minutes by default). After a rotation the
//! previous key is retained for `OLD_KEY_RETENTION` so that packets sealed
//! just before the switch still decrypt.

use std::time::{Duration, Instant};

use crate::core::{KEY_ROTATION_INTERVAL, OLD_KEY_RETENTION};

use super::SessionKeys;

/// Tracks when the current key was installed and when the next rotation is
/// due.
#[derive(Debug, Clone)]
pub struct RotationSchedule {
    /// Time the current key was installed.
    installed_at: Instant,
    /// Rotation interval.
    interval: Duration,
    /// Number of completed rotations.
    rotations: u32,
}

impl RotationSchedule {
    /// Create a schedule starting now with the default interval.
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, KEY_ROTATION_INTERVAL)
    }

    /// Create a schedule with a custom interval.
    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self {
            installed_at: now,
            interval,
            rotations: 0,
        }
    }

    /// Check if the current key has been in use for a full interval.
    pub fn should_rotate(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.installed_at) >= self.interval
    }

    /// Record a freshly installed key (initial handshake).
    pub fn reset(&mut self, now: Instant) {
        self.installed_at = now;
    }

    /// Record a completed rotation.
    pub fn on_rotated(&mut self, now: Instant) {
        self.installed_at = now;
        self.rotations = self.rotations.saturating_add(1);
    }

    /// Time the current key was installed.
    pub fn installed_at(&self) -> Instant {
        self.installed_at
    }

    /// Number of completed rotations.
    pub fn rotations(&self) -> u32 {
        self.rotations
    }

    /// Rotation interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Holds the previous session key during the transition after a rotation.
#[derive(Debug)]
pub struct OldKeyRetention {
    /// The previous keys.
    keys: Option<SessionKeys>,
    /// When the keys were retained.
    retained_at: Option<Instant>,
    /// How long they stay usable.
    retention: Duration,
}

impl OldKeyRetention {
    /// Create a retention slot with the default window.
    pub fn new() -> Self {
        Self::with_retention(OLD_KEY_RETENTION)
    }

    /// Create a retention slot with a custom window.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            keys: None,
            retained_at: None,
            retention,
        }
    }

    /// Retain `keys` as the previous keys.
    pub fn retain(&mut self, keys: SessionKeys, now: Instant) {
        self.keys = Some(keys);
        self.retained_at = Some(now);
    }

    /// Get the previous keys if still within the retention window.
    pub fn keys(&self, now: Instant) -> Option<&SessionKeys> {
        if self.within_retention_window(now) {
            self.keys.as_ref()
        } else {
            None
        }
    }

    /// Check if we're within the retention window.
    pub fn within_retention_window(&self, now: Instant) -> bool {
        self.retained_at
            .is_some_and(|t| now.saturating_duration_since(t) < self.retention)
    }

    /// Drop the previous keys.
    pub fn clear(&mut self) {
        self.keys = None;
        self.retained_at = None;
    }

    /// Drop the previous keys if retention has expired.
    pub fn clear_if_expired(&mut self, now: Instant) {
        if self.retained_at.is_some() && !self.within_retention_window(now) {
            self.clear();
        }
    }
}

impl Default for OldKeyRetention {
    fn default() -> Self {
        Self::new()
    }
}
