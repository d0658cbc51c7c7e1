//! # Potluck
//!
//! Chat server for listings. Each listing gets a room that seats its
//! owner and one guest at a time; further guests wait in a FIFO queue and
//! are promoted as the seat frees up. When the owner ends the chat the
//! room closes and everyone still waiting is told so.
//!
//! Clients speak JSON envelopes over WebSocket. See
//! [`potluck_protocol`] for the wire types and [`potluck_room`] for the
//! seat and queue rules.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use potluck::prelude::*;
//!
//! # async fn start() -> Result<(), PotluckError> {
//! let owners: ListingOwners = [(
//!     RoomId::parse("listing-1")?,
//!     ParticipantId::parse("alice")?,
//! )]
//! .into_iter()
//! .collect();
//!
//! let server = PotluckServer::builder()
//!     .bind("0.0.0.0:50051")
//!     .build(owners)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;
pub mod telemetry;

pub use config::{DEFAULT_PORT, ServerConfig};
pub use error::PotluckError;
pub use server::{PotluckServer, PotluckServerBuilder};

pub use potluck_protocol as protocol;
pub use potluck_room as room;
pub use potluck_transport as transport;

/// Everything needed to configure and run a server.
pub mod prelude {
    pub use crate::{PotluckError, PotluckServer, PotluckServerBuilder, ServerConfig};
    pub use potluck_protocol::{
        ChatEnd, ChatMessage, ClientMessage, Envelope, PROTOCOL_VERSION, ParticipantId,
        Payload, QueueStatus, Role, RoomId, ServerMessage, StatusCode,
    };
    pub use potluck_room::{
        ChatHistory, CollaboratorError, ListingOwners, MemoryHistory, NoHistory,
        OwnershipResolver, RoomConfig, RoomError, RoomRegistry,
    };
}
