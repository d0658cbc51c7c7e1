//! Room configuration.

use serde::{Deserialize, Serialize};

/// Settings shared by every room a registry creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Capacity of each room's inbound message queue. Senders wait
    /// when the broadcast loop falls this far behind.
    pub inbound_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 64,
        }
    }
}

impl RoomConfig {
    /// Returns a copy with zero capacities raised to 1, which is the
    /// smallest queue `tokio::sync::mpsc` accepts.
    pub fn validated(mut self) -> Self {
        if self.inbound_capacity == 0 {
            tracing::warn!("inbound_capacity of 0 is not allowed, using 1");
            self.inbound_capacity = 1;
        }
        self
    }
}
