//! Message history store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use potluck_protocol::{ChatMessage, RoomId};

use crate::CollaboratorError;

/// Persists accepted messages and lists them back per room.
pub trait ChatHistory: Send + Sync + 'static {
    /// Stores one message.
    fn append(
        &self,
        message: &ChatMessage,
    ) -> impl std::future::Future<Output = Result<(), CollaboratorError>> + Send;

    /// Returns every stored message of `room_id`, oldest first.
    fn list(
        &self,
        room_id: &RoomId,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, CollaboratorError>> + Send;
}

/// History that stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

impl ChatHistory for NoHistory {
    async fn append(&self, _message: &ChatMessage) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn list(&self, _room_id: &RoomId) -> Result<Vec<ChatMessage>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// History kept in process memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    rooms: Mutex<HashMap<RoomId, Vec<ChatMessage>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatHistory for MemoryHistory {
    async fn append(&self, message: &ChatMessage) -> Result<(), CollaboratorError> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(message.room_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, CollaboratorError> {
        let mut messages = self
            .rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned()
            .unwrap_or_default();
        // Appends from concurrent senders can land slightly out of order.
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}
