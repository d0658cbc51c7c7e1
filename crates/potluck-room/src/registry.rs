//! Process-wide table of open rooms.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use potluck_protocol::RoomId;

use crate::{Room, RoomConfig, RoomError};

#[derive(Default)]
struct Rooms {
    open: HashMap<RoomId, Arc<Room>>,
    /// Ids whose owner has left. A closed conversation is never reopened.
    closed: HashSet<RoomId>,
}

pub(crate) struct RegistryShared {
    config: RoomConfig,
    rooms: RwLock<Rooms>,
}

impl RegistryShared {
    fn read(&self) -> RwLockReadGuard<'_, Rooms> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Rooms> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `id` from the open table to the tombstones. Called by the
    /// room itself once its closure has been applied.
    pub(crate) fn remove(&self, id: &RoomId) {
        let mut rooms = self.write();
        rooms.open.remove(id);
        rooms.closed.insert(id.clone());
        tracing::debug!(room_id = %id, open = rooms.open.len(), "room unregistered");
    }
}

/// Maps room ids to live rooms.
///
/// Cheap to clone; all clones share one table. Rooms are created on
/// first use and unregistered when their owner leaves.
#[derive(Clone)]
pub struct RoomRegistry {
    shared: Arc<RegistryShared>,
}

impl RoomRegistry {
    /// Creates an empty registry. Every room it creates uses `config`.
    pub fn new(config: RoomConfig) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                config: config.validated(),
                rooms: RwLock::new(Rooms::default()),
            }),
        }
    }

    /// Returns the open room for `id`, creating it (and starting its
    /// broadcast loop) if none exists.
    ///
    /// # Errors
    /// [`RoomError::SessionClosed`] if a room under `id` was closed.
    pub fn get_or_create(&self, id: &RoomId) -> Result<Arc<Room>, RoomError> {
        {
            let rooms = self.shared.read();
            if let Some(room) = rooms.open.get(id) {
                return Ok(Arc::clone(room));
            }
            if rooms.closed.contains(id) {
                return Err(RoomError::SessionClosed(id.clone()));
            }
        }

        let mut rooms = self.shared.write();
        // Another caller may have won the race between the two locks.
        if let Some(room) = rooms.open.get(id) {
            return Ok(Arc::clone(room));
        }
        if rooms.closed.contains(id) {
            return Err(RoomError::SessionClosed(id.clone()));
        }
        let room = Room::spawn(id.clone(), &self.shared.config, Arc::downgrade(&self.shared));
        rooms.open.insert(id.clone(), Arc::clone(&room));
        Ok(room)
    }

    /// Returns the open room for `id`, if any.
    pub fn get(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.shared.read().open.get(id).cloned()
    }

    /// Returns `true` if a room under `id` existed and was closed.
    pub fn is_closed(&self, id: &RoomId) -> bool {
        self.shared.read().closed.contains(id)
    }

    /// Number of open rooms.
    pub fn room_count(&self) -> usize {
        self.shared.read().open.len()
    }

    /// Ids of all open rooms, in no particular order.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.shared.read().open.keys().cloned().collect()
    }

    pub fn config(&self) -> &RoomConfig {
        &self.shared.config
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}
