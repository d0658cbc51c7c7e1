//! Error types for the room layer.

use potluck_protocol::{ParticipantId, RoomId, StatusCode};

/// Failures reported by an external collaborator (ownership lookup,
/// message history).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// No listing exists under this id.
    #[error("listing {0} not found")]
    UnknownRoom(RoomId),

    /// The backing store could not complete the request.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur during room operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// The owner has left; the room accepts no further admissions.
    #[error("chat session {0} is closed")]
    SessionClosed(RoomId),

    /// A different participant already holds the owner seat.
    #[error("owner seat of room {room_id} is held by another participant")]
    OwnerSeatTaken { room_id: RoomId },

    /// The participant is already waiting for the guest seat.
    #[error("participant {participant_id} is already queued in room {room_id}")]
    AlreadyQueued {
        room_id: RoomId,
        participant_id: ParticipantId,
    },

    /// A queued claimant was released before it reached the guest seat.
    #[error("participant {participant_id} left the queue of room {room_id}")]
    Withdrawn {
        room_id: RoomId,
        participant_id: ParticipantId,
    },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl RoomError {
    /// The wire status a client sees for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SessionClosed(_) | Self::Withdrawn { .. } => StatusCode::Cancelled,
            Self::OwnerSeatTaken { .. } | Self::AlreadyQueued { .. } => {
                StatusCode::FailedPrecondition
            }
            Self::Collaborator(CollaboratorError::UnknownRoom(_)) => StatusCode::NotFound,
            Self::Collaborator(CollaboratorError::Unavailable(_)) => StatusCode::Internal,
        }
    }
}
