//! Diagnostic log sink.
//!
//! The manager reports dropped and invalid packets as free-text lines through
//! an injected [`LogSink`]. The sink never influences control flow.

use std::sync::Arc;

/// Receiver of human-readable diagnostic lines.
pub trait LogSink: Send + Sync {
    /// Record one diagnostic line.
    fn log(&self, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Default sink forwarding every line to `tracing` at WARN level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::warn!(target: "shroud_transport", "{message}");
    }
}

/// Shared handle to a sink.
pub type SharedLogSink = Arc<dyn LogSink>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&lines);
        let sink: SharedLogSink = Arc::new(move |msg: &str| {
            captured.lock().unwrap().push(msg.to_string());
        });

        sink.log("dropped packet");
        sink.log("replay");

        assert_eq!(*lines.lock().unwrap(), vec!["dropped packet", "replay"]);
    }
}
