//! Per-room broadcast loop.

use std::sync::Arc;

use potluck_protocol::ChatMessage;
use tokio::sync::mpsc;

use crate::Room;

/// Delivers every message from `inbound` to every occupant of `room`, in
/// arrival order. Runs until the inbound queue is closed and drained.
///
/// Recipients are snapshotted under the room lock and sent to outside
/// it. A recipient whose channel is closed is evicted from delivery; its
/// seat stays until the owning connection releases it.
pub(crate) async fn run(room: Arc<Room>, mut inbound: mpsc::Receiver<ChatMessage>) {
    let mut delivered: u64 = 0;

    while let Some(message) = inbound.recv().await {
        for (participant, ticket, sender) in room.recipients() {
            if sender.send(message.clone()).is_err() && room.evict(&participant, ticket) {
                tracing::debug!(
                    room_id = %room.id(),
                    participant_id = %participant,
                    "recipient channel closed, evicted"
                );
            }
        }
        delivered += 1;
    }

    let dropped = room.drain_occupants();
    tracing::info!(
        room_id = %room.id(),
        delivered,
        dropped,
        "broadcast loop finished"
    );
}
