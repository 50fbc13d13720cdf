//! Client configuration.

use std::time::Duration;

use quietline_core::ROTATION_INTERVAL;

/// Interval between heartbeats on the live stream.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Tunables for the client engine and transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Heartbeat period on the live stream
    pub heartbeat_interval: Duration,
    /// Buffered events per subscriber before new events are dropped
    pub subscriber_capacity: usize,
    /// Buffered outgoing frames before senders wait
    pub outbound_capacity: usize,
    /// Events between rotations by the same party
    pub rotation_interval: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            subscriber_capacity: 64,
            outbound_capacity: 32,
            rotation_interval: ROTATION_INTERVAL,
        }
    }
}
