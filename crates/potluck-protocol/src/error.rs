//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, unknown
    /// message type, or an identifier that failed validation.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A room or participant identifier is malformed.
    #[error("invalid {kind}: {reason}")]
    InvalidIdentity {
        kind: &'static str,
        reason: &'static str,
    },

    /// The frame decoded but breaks protocol rules (e.g. a server
    /// message sent by a client, or a missing handshake).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
