//! Wire protocol for Potluck chat.
//!
//! - **Identifiers** ([`RoomId`], [`ParticipantId`]) — validated newtypes.
//! - **Types** ([`Envelope`], [`ClientMessage`], [`ServerMessage`],
//!   [`ChatMessage`], [`QueueStatus`]) — what travels on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how frames become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer sits between transport (raw bytes) and the room
//! layer. It knows nothing about seats or queues.

mod codec;
mod error;
mod id;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use id::{MAX_ID_LEN, ParticipantId, RoomId};
pub use types::{
    ChatEnd, ChatMessage, ClientMessage, Envelope, Payload, QueueStatus, Role,
    ServerMessage, StatusCode, unix_millis,
};

/// The protocol version clients must announce in their handshake.
pub const PROTOCOL_VERSION: u32 = 1;
