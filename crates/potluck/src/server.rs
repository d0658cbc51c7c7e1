//! `PotluckServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → rooms.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use potluck_protocol::{Codec, JsonCodec};
use potluck_room::{ChatHistory, NoHistory, OwnershipResolver, RoomConfig, RoomRegistry};
use potluck_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{PotluckError, ServerConfig};

/// Shared state handed to every connection task.
pub(crate) struct ServerState<O, H, C> {
    pub(crate) rooms: RoomRegistry,
    pub(crate) owners: O,
    pub(crate) history: H,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Potluck server.
///
/// # Example
///
/// ```rust,no_run
/// use potluck::prelude::*;
///
/// # async fn start() -> Result<(), PotluckError> {
/// let owners = ListingOwners::new();
/// let server = PotluckServer::builder()
///     .bind("127.0.0.1:50051")
///     .history(MemoryHistory::new())
///     .build(owners)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct PotluckServerBuilder<H = NoHistory> {
    config: ServerConfig,
    history: H,
}

impl PotluckServerBuilder {
    /// Creates a builder with default settings and no message history.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            history: NoHistory,
        }
    }
}

impl Default for PotluckServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ChatHistory> PotluckServerBuilder<H> {
    /// Sets the address to bind to.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how often queue watchers get a status report.
    pub fn watch_interval(mut self, interval: Duration) -> Self {
        self.config.watch_interval = interval;
        self
    }

    /// Sets how long a silent connection is kept open.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn room_config(mut self, room: RoomConfig) -> Self {
        self.config.room = room;
        self
    }

    /// Persists accepted messages in `history` and replays them to
    /// participants as they join.
    pub fn history<H2: ChatHistory>(self, history: H2) -> PotluckServerBuilder<H2> {
        PotluckServerBuilder {
            config: self.config,
            history,
        }
    }

    /// Binds the listener and returns a server ready to [`run`](PotluckServer::run).
    ///
    /// Uses `JsonCodec` over `WebSocketTransport`.
    pub async fn build<O: OwnershipResolver>(
        self,
        owners: O,
    ) -> Result<PotluckServer<O, H, JsonCodec>, PotluckError> {
        let config = self.config.validated();
        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let state = Arc::new(ServerState {
            rooms: RoomRegistry::new(config.room.clone()),
            owners,
            history: self.history,
            codec: JsonCodec,
            config,
        });

        Ok(PotluckServer { transport, state })
    }
}

/// A bound Potluck chat server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct PotluckServer<O, H, C> {
    transport: WebSocketTransport,
    state: Arc<ServerState<O, H, C>>,
}

impl PotluckServer<(), NoHistory, JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> PotluckServerBuilder {
        PotluckServerBuilder::new()
    }
}

impl<O, H, C> PotluckServer<O, H, C>
where
    O: OwnershipResolver,
    H: ChatHistory,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The live room table. Handy for inspection.
    pub fn rooms(&self) -> &RoomRegistry {
        &self.state.rooms
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), PotluckError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes.
    ///
    /// Each accepted stream is upgraded and served in a task of its own.
    /// Connections already accepted keep being served after shutdown.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), PotluckError> {
        let addr = self.local_addr().ok();
        tracing::info!(?addr, "Potluck server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(pending, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }
    }
}
