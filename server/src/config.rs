//! Tunables for hubs and the connections they own

use shared::DEFAULT_MAX_PAYLOAD_SIZE;
use std::time::Duration;

pub const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 8;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-hub configuration, fixed when the hub is created.
///
/// `capacity` of 0 means unlimited. The heartbeat period is derived from
/// `read_timeout` so an idle but live peer is probed before its read
/// deadline fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Maximum concurrent members (0 = unlimited)
    pub capacity: usize,
    /// Envelopes buffered per member before it is evicted as unresponsive
    pub outbound_queue_depth: usize,
    /// Longest silence tolerated from a peer, data or probe response
    pub read_timeout: Duration,
    /// Longest a single frame write may take
    pub write_timeout: Duration,
    /// Largest envelope payload accepted from a peer
    pub max_payload_size: usize,
    /// Deliver a member's own broadcasts back to it
    pub echo_to_sender: bool,
    /// Broadcast presence notices when members join or leave
    pub announce_presence: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            echo_to_sender: false,
            announce_presence: true,
        }
    }
}

impl HubConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_outbound_queue_depth(mut self, depth: usize) -> Self {
        self.outbound_queue_depth = depth;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn with_echo_to_sender(mut self, echo: bool) -> Self {
        self.echo_to_sender = echo;
        self
    }

    pub fn with_presence(mut self, announce: bool) -> Self {
        self.announce_presence = announce;
        self
    }

    /// Interval between liveness probes: 90% of the read timeout.
    pub fn heartbeat_period(&self) -> Duration {
        (self.read_timeout * 9 / 10).max(Duration::from_millis(1))
    }

    /// Channel capacity backing a member's outbound queue.
    ///
    /// A depth of 0 maps to a single slot, the smallest bounded queue tokio
    /// offers.
    pub fn outbound_channel_capacity(&self) -> usize {
        self.outbound_queue_depth.max(1)
    }
}
