//! Listing ownership lookup.
//!
//! The room layer never decides who owns a listing. It asks an
//! [`OwnershipResolver`], which in production fronts whatever store
//! holds listings. [`ListingOwners`] is the in-memory implementation
//! used by the bundled server and by tests.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use potluck_protocol::{ParticipantId, RoomId};

use crate::CollaboratorError;

/// Answers "does this participant own this listing?".
///
/// # Example
///
/// ```rust
/// use potluck_protocol::{ParticipantId, RoomId};
/// use potluck_room::{CollaboratorError, OwnershipResolver};
///
/// /// Every listing is owned by "admin".
/// struct AdminOwnsEverything;
///
/// impl OwnershipResolver for AdminOwnsEverything {
///     async fn is_owner(
///         &self,
///         _room_id: &RoomId,
///         participant: &ParticipantId,
///     ) -> Result<bool, CollaboratorError> {
///         Ok(participant.as_str() == "admin")
///     }
/// }
/// ```
pub trait OwnershipResolver: Send + Sync + 'static {
    /// Returns whether `participant` owns the listing `room_id`.
    ///
    /// # Errors
    /// - [`CollaboratorError::UnknownRoom`] if no such listing exists
    /// - [`CollaboratorError::Unavailable`] if the lookup itself failed
    fn is_owner(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
    ) -> impl std::future::Future<Output = Result<bool, CollaboratorError>> + Send;
}

/// In-memory listing table: room id → owning participant.
#[derive(Debug, Default)]
pub struct ListingOwners {
    owners: RwLock<HashMap<RoomId, ParticipantId>>,
}

impl ListingOwners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-assigns) a listing.
    pub fn insert(&self, room_id: RoomId, owner: ParticipantId) {
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room_id, owner);
    }

    /// Removes a listing. Returns its previous owner.
    pub fn remove(&self, room_id: &RoomId) -> Option<ParticipantId> {
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room_id)
    }

    pub fn len(&self) -> usize {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(RoomId, ParticipantId)> for ListingOwners {
    fn from_iter<I: IntoIterator<Item = (RoomId, ParticipantId)>>(iter: I) -> Self {
        Self {
            owners: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl OwnershipResolver for ListingOwners {
    async fn is_owner(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
    ) -> Result<bool, CollaboratorError> {
        let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
        owners
            .get(room_id)
            .map(|owner| owner == participant)
            .ok_or_else(|| CollaboratorError::UnknownRoom(room_id.clone()))
    }
}
