//! Core protocol types for Potluck's wire format.
//!
//! Every frame on the wire is an [`Envelope`]. Its [`Payload`] is either
//! a [`ClientMessage`] (requests from a participant) or a
//! [`ServerMessage`] (responses and pushed events).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{ParticipantId, RoomId};

// ---------------------------------------------------------------------------
// Chat data
// ---------------------------------------------------------------------------

/// A chat message as broadcast to the participants of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    pub text: String,
    /// Optional image reference (URL or storage key) attached to the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Unix time in milliseconds when the server accepted the message.
    pub created_at: u64,
}

impl ChatMessage {
    /// Builds a message stamped with the current wall-clock time.
    pub fn now(
        room_id: RoomId,
        participant_id: ParticipantId,
        text: String,
        image: Option<String>,
    ) -> Self {
        Self {
            room_id,
            participant_id,
            text,
            image,
            created_at: unix_millis(),
        }
    }
}

/// Milliseconds since the Unix epoch. A clock before 1970 reads as 0.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_millis)
        .unwrap_or_default()
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Which seat a participant holds in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Role {
    /// The listing owner. Never queued; leaving closes the room.
    Owner,
    /// The single visitor seat.
    Guest,
}

/// Snapshot of a room's wait queue from one participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Number of claimants currently waiting for the guest seat.
    pub queued_count: u32,
    /// `0` when seated, `1..` when queued (1 = next in line),
    /// `-1` when neither seated nor queued, or the room is not open.
    pub position: i32,
}

impl QueueStatus {
    /// Position reported for a participant that is seated.
    pub const SEATED: i32 = 0;
    /// Position reported for a participant that is neither seated nor queued.
    pub const ABSENT: i32 = -1;

    /// The status reported when no room is open under the requested id.
    pub fn absent() -> Self {
        Self {
            queued_count: 0,
            position: Self::ABSENT,
        }
    }
}

/// Terminal condition attached to an error or an ended stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StatusCode {
    /// Malformed request or identifier.
    InvalidArgument,
    /// The referenced listing does not exist.
    NotFound,
    /// The chat session is closed (the owner left).
    Cancelled,
    /// The request is well formed but not valid in the current
    /// connection state (e.g. joining the same room twice).
    FailedPrecondition,
    /// A backing service could not complete the request.
    Internal,
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Messages a participant sends to the server.
///
/// Internally tagged: `{ "type": "JoinChat", "room_id": "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Must be the first frame on a connection. Declares who is talking;
    /// identity is not authenticated here.
    Handshake {
        version: u32,
        participant_id: ParticipantId,
    },

    /// Keep-alive; answered with [`ServerMessage::HeartbeatAck`].
    Heartbeat { client_time: u64 },

    /// Take a seat in the room (or queue for the guest seat) and stream
    /// its messages until the room closes or the participant leaves.
    JoinChat { room_id: RoomId },

    /// Leave a room joined on this connection.
    LeaveChat { room_id: RoomId },

    /// Start periodic [`ServerMessage::QueueStatus`] reports for a room.
    WatchChatQueue { room_id: RoomId },

    /// Stop queue reports for a room.
    UnwatchChatQueue { room_id: RoomId },

    /// Broadcast a message to everyone seated in the room.
    SendMessage {
        room_id: RoomId,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
    },

    /// End the chat: the owner closes the room, a guest just leaves.
    EndChatSession { room_id: RoomId },

    /// Close this connection.
    Disconnect { reason: String },
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Messages the server sends to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake accepted.
    HandshakeAck {
        participant_id: ParticipantId,
        server_time: u64,
    },

    /// Reply to [`ClientMessage::Heartbeat`].
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// The guest seat is taken; the join is waiting at `position`.
    ChatQueued { room_id: RoomId, position: u32 },

    /// The participant now holds a seat and will receive `Chat` frames.
    ChatJoined { room_id: RoomId, role: Role },

    /// A stored message replayed after joining, oldest first.
    History { message: ChatMessage },

    /// A live message broadcast in a joined room.
    Chat { message: ChatMessage },

    /// Periodic report for a watched queue.
    QueueStatus {
        room_id: RoomId,
        #[serde(flatten)]
        status: QueueStatus,
    },

    /// A join or queue watch for `room_id` has ended.
    ChatEnded { room_id: RoomId, status: ChatEnd },

    /// The request with envelope sequence number `seq` succeeded.
    Ack { seq: u64 },

    /// The request with envelope sequence number `seq` failed.
    Error {
        seq: u64,
        status: StatusCode,
        message: String,
    },
}

/// Why a join or queue watch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChatEnd {
    /// The participant left (or was replaced by a newer join of the same id).
    Left,
    /// The room was closed by its owner.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The content of a frame.
///
/// Adjacently tagged:
/// `{ "type": "Client", "data": { "type": "Heartbeat", "client_time": 1 } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    Client(ClientMessage),
    Server(ServerMessage),
}

/// The top-level wire frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-direction sequence number. Acks and errors refer back to the
    /// client's `seq`.
    pub seq: u64,

    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,

    pub payload: Payload,
}
