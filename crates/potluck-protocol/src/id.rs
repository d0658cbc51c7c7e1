//! Identifier newtypes for rooms and participants.
//!
//! Both wrap a `String` and are validated on construction and on
//! deserialization, so anything holding a `RoomId` or `ParticipantId`
//! can assume it is well formed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Longest identifier accepted, in bytes.
pub const MAX_ID_LEN: usize = 128;

fn validate(kind: &'static str, raw: &str) -> Result<(), ProtocolError> {
    let reason = if raw.is_empty() {
        "must not be empty"
    } else if raw.len() > MAX_ID_LEN {
        "must be at most 128 bytes"
    } else if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "must not contain whitespace or control characters"
    } else {
        return Ok(());
    };
    Err(ProtocolError::InvalidIdentity { kind, reason })
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and wraps `raw`.
            pub fn parse(raw: impl Into<String>) -> Result<Self, ProtocolError> {
                let raw = raw.into();
                validate($kind, &raw)?;
                Ok(Self(raw))
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ProtocolError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl FromStr for $name {
            type Err = ProtocolError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifies a chat room. Rooms are keyed by the listing they
    /// discuss, so this is the listing id.
    RoomId,
    "room id"
);

string_id!(
    /// Identifies a participant (a user) in a chat.
    ParticipantId,
    "participant id"
);
