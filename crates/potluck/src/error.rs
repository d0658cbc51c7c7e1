//! Unified error type for the Potluck server.

use potluck_protocol::ProtocolError;
use potluck_room::{CollaboratorError, RoomError};
use potluck_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attributes let `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum PotluckError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, handshake rules).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A room-level error (closed session, seat conflicts).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Startup configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<CollaboratorError> for PotluckError {
    fn from(err: CollaboratorError) -> Self {
        Self::Room(err.into())
    }
}

#[cfg(test)]
mod tests {
    use potluck_protocol::RoomId;

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: PotluckError = TransportError::ConnectionClosed.into();
        assert!(matches!(err, PotluckError::Transport(_)));
        assert_eq!(err.to_string(), "connection closed");
    }

    #[test]
    fn test_from_protocol_error() {
        let err: PotluckError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, PotluckError::Protocol(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err: PotluckError = RoomError::SessionClosed(RoomId::parse("listing-1").unwrap()).into();
        assert!(matches!(err, PotluckError::Room(_)));
    }

    #[test]
    fn test_collaborator_error_goes_through_room_error() {
        let err: PotluckError = CollaboratorError::Unavailable("db down".into()).into();
        assert!(matches!(
            err,
            PotluckError::Room(RoomError::Collaborator(CollaboratorError::Unavailable(_)))
        ));
    }
}
