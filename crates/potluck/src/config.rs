//! Server configuration.

use std::time::Duration;

use potluck_room::RoomConfig;
use serde::{Deserialize, Serialize};

/// Port the chat service listens on by default.
pub const DEFAULT_PORT: u16 = 50051;

/// Settings for a [`PotluckServer`](crate::PotluckServer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// How often a queue watcher receives a status report.
    pub watch_interval: Duration,

    /// A connection that sends nothing for this long is dropped.
    /// Clients keep idle connections alive with heartbeats.
    pub idle_timeout: Duration,

    /// How long a new connection has to complete the WebSocket upgrade,
    /// and then again the protocol handshake.
    pub handshake_timeout: Duration,

    /// Settings applied to every room.
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            watch_interval: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(5),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Replaces zero durations with their defaults. A zero watch interval
    /// would make `tokio::time::interval` panic.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        for (name, value, default) in [
            ("watch_interval", &mut self.watch_interval, defaults.watch_interval),
            ("idle_timeout", &mut self.idle_timeout, defaults.idle_timeout),
            ("handshake_timeout", &mut self.handshake_timeout, defaults.handshake_timeout),
        ] {
            if value.is_zero() {
                tracing::warn!(setting = name, ?default, "zero duration not allowed, using default");
                *value = default;
            }
        }
        self.room = self.room.validated();
        self
    }
}
