//! Per-connection handler: handshake and request dispatch.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version, take the declared participant id
//!   2. Send HandshakeAck
//!   3. Loop: receive envelopes → dispatch requests
//!
//! Joins and queue watches are streams that outlive the request that
//! started them, so each runs in a task of its own. Every task pushes
//! frames into the connection's [`Outbox`]; one writer task drains it
//! onto the socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use potluck_protocol::{
    ChatEnd, ChatMessage, ClientMessage, Codec, Envelope, PROTOCOL_VERSION, ParticipantId,
    Payload, ProtocolError, QueueStatus, RoomId, ServerMessage, StatusCode, unix_millis,
};
use potluck_room::{ChatHistory, Entry, OwnershipResolver, Room, RoomError, Ticket};
use potluck_transport::{
    Connection, Pending, PendingWebSocket, TransportError, WebSocketConnection,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::PotluckError;
use crate::server::ServerState;

/// How long a closing connection waits for queued frames to be written.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type Shared<O, H, C> = Arc<ServerState<O, H, C>>;

/// Frames waiting to be written to one connection.
#[derive(Clone)]
struct Outbox(mpsc::UnboundedSender<ServerMessage>);

impl Outbox {
    /// Queues a frame. Returns `false` once the writer has stopped.
    fn push(&self, msg: ServerMessage) -> bool {
        self.0.send(msg).is_ok()
    }

    fn ack(&self, seq: u64) {
        self.push(ServerMessage::Ack { seq });
    }

    fn reject(&self, seq: u64, status: StatusCode, message: impl Into<String>) {
        self.push(ServerMessage::Error {
            seq,
            status,
            message: message.into(),
        });
    }

    fn fail(&self, seq: u64, err: &RoomError) {
        self.reject(seq, err.status(), err.to_string());
    }
}

/// Releases a seat when the join that holds it ends, however it ends.
struct SeatGuard {
    room: Arc<Room>,
    participant: ParticipantId,
    ticket: Ticket,
}

impl Drop for SeatGuard {
    fn drop(&mut self) {
        let departure = self.room.release_ticket(&self.participant, self.ticket);
        tracing::debug!(
            room_id = %self.room.id(),
            participant_id = %self.participant,
            ?departure,
            "join ended, seat released"
        );
    }
}

/// Per-connection request state. Dropping it aborts every join and
/// watch the connection started.
struct Session<O, H, C> {
    participant: ParticipantId,
    state: Shared<O, H, C>,
    outbox: Outbox,
    joins: HashMap<RoomId, JoinHandle<()>>,
    watches: HashMap<RoomId, JoinHandle<()>>,
}

impl<O, H, C> Drop for Session<O, H, C> {
    fn drop(&mut self) {
        for (_, task) in self.joins.drain().chain(self.watches.drain()) {
            task.abort();
        }
    }
}

/// Handles a single connection from accept to close.
///
/// The WebSocket upgrade runs here, inside the connection's own task, and
/// shares the handshake deadline.
pub(crate) async fn handle_connection<O, H, C>(
    pending: PendingWebSocket,
    state: Shared<O, H, C>,
) -> Result<(), PotluckError>
where
    O: OwnershipResolver,
    H: ChatHistory,
    C: Codec,
{
    let peer = pending.peer_addr();
    let start = Instant::now();
    let upgrade = tokio::time::timeout(state.config.handshake_timeout, pending.upgrade());
    let conn = match upgrade.await {
        Ok(result) => result?,
        Err(_) => {
            tracing::debug!(%peer, "WebSocket upgrade timed out");
            return Err(TransportError::UpgradeFailed(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "WebSocket upgrade timed out",
            ))
            .into());
        }
    };
    let conn_id = conn.id();
    tracing::debug!(%conn_id, %peer, "handling new connection");

    // --- Step 1: Handshake ---
    let participant = perform_handshake(&conn, &state, &start).await?;
    tracing::info!(%conn_id, participant_id = %participant, "participant connected");

    let conn = Arc::new(conn);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(
        Arc::clone(&conn),
        Arc::clone(&state),
        rx,
        start,
    ));
    let mut session = Session {
        participant,
        state: Arc::clone(&state),
        outbox: Outbox(tx),
        joins: HashMap::new(),
        watches: HashMap::new(),
    };

    // --- Step 2: Request loop ---
    loop {
        let data = match tokio::time::timeout(state.config.idle_timeout, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%conn_id, "connection closed cleanly");
                break;
            }
            Ok(Err(e)) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
            Err(_) => {
                tracing::info!(%conn_id, "connection idle too long, closing");
                break;
            }
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                let seq = salvage_seq(&state.codec, &data);
                session
                    .outbox
                    .reject(seq, StatusCode::InvalidArgument, e.to_string());
                continue;
            }
        };

        let Payload::Client(request) = envelope.payload else {
            session.outbox.reject(
                envelope.seq,
                StatusCode::InvalidArgument,
                "expected a client message",
            );
            continue;
        };

        if session.dispatch(envelope.seq, request).await {
            break;
        }
    }

    // Aborts joins (releasing their seats) and drops the last outbox.
    drop(session);
    if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
        tracing::debug!(%conn_id, "writer did not finish flushing");
    }
    let _ = conn.close().await;
    Ok(())
}

/// Performs the handshake: receive Handshake, check the version, send Ack.
async fn perform_handshake<O, H, C>(
    conn: &WebSocketConnection,
    state: &ServerState<O, H, C>,
    start: &Instant,
) -> Result<ParticipantId, PotluckError>
where
    C: Codec,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let envelope: Envelope = match state.codec.decode(&data) {
        Ok(env) => env,
        Err(e) => {
            let seq = salvage_seq(&state.codec, &data);
            send_error(conn, &state.codec, seq, &e.to_string(), start).await?;
            return Err(e.into());
        }
    };

    let (version, participant_id) = match envelope.payload {
        Payload::Client(ClientMessage::Handshake {
            version,
            participant_id,
        }) => (version, participant_id),
        _ => {
            send_error(conn, &state.codec, envelope.seq, "expected Handshake", start).await?;
            return Err(ProtocolError::InvalidMessage(
                "first message must be Handshake".into(),
            )
            .into());
        }
    };

    if version != PROTOCOL_VERSION {
        send_error(
            conn,
            &state.codec,
            envelope.seq,
            &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
            start,
        )
        .await?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let ack = Envelope {
        seq: 0,
        timestamp: elapsed_millis(start),
        payload: Payload::Server(ServerMessage::HandshakeAck {
            participant_id: participant_id.clone(),
            server_time: unix_millis(),
        }),
    };
    conn.send(&state.codec.encode(&ack)?).await?;

    Ok(participant_id)
}

impl<O, H, C> Session<O, H, C>
where
    O: OwnershipResolver,
    H: ChatHistory,
    C: Codec,
{
    /// Handles one request. Returns `true` if the connection should close.
    async fn dispatch(&mut self, seq: u64, request: ClientMessage) -> bool {
        match request {
            ClientMessage::Handshake { .. } => {
                self.outbox.reject(
                    seq,
                    StatusCode::FailedPrecondition,
                    "handshake already completed",
                );
            }
            ClientMessage::Heartbeat { client_time } => {
                self.outbox.push(ServerMessage::HeartbeatAck {
                    client_time,
                    server_time: unix_millis(),
                });
            }
            ClientMessage::JoinChat { room_id } => self.join(seq, room_id),
            ClientMessage::LeaveChat { room_id } => self.leave(seq, room_id),
            ClientMessage::WatchChatQueue { room_id } => self.watch(seq, room_id),
            ClientMessage::UnwatchChatQueue { room_id } => self.unwatch(seq, room_id),
            ClientMessage::SendMessage {
                room_id,
                text,
                image,
            } => self.send_message(seq, room_id, text, image).await,
            ClientMessage::EndChatSession { room_id } => {
                self.end_chat_session(seq, room_id).await;
            }
            ClientMessage::Disconnect { reason } => {
                tracing::info!(participant_id = %self.participant, %reason, "client disconnected");
                return true;
            }
        }
        false
    }

    fn join(&mut self, seq: u64, room_id: RoomId) {
        if self.joins.get(&room_id).is_some_and(|task| !task.is_finished()) {
            self.outbox.reject(
                seq,
                StatusCode::FailedPrecondition,
                format!("already joined room {room_id} on this connection"),
            );
            return;
        }
        let task = tokio::spawn(run_join(
            Arc::clone(&self.state),
            self.participant.clone(),
            room_id.clone(),
            self.outbox.clone(),
            seq,
        ));
        self.joins.insert(room_id, task);
    }

    fn leave(&mut self, seq: u64, room_id: RoomId) {
        if let Some(task) = self.joins.remove(&room_id) {
            if !task.is_finished() {
                task.abort();
                self.outbox.push(ServerMessage::ChatEnded {
                    room_id,
                    status: ChatEnd::Left,
                });
            }
        }
        self.outbox.ack(seq);
    }

    fn watch(&mut self, seq: u64, room_id: RoomId) {
        if self.watches.get(&room_id).is_some_and(|task| !task.is_finished()) {
            self.outbox.reject(
                seq,
                StatusCode::FailedPrecondition,
                format!("already watching room {room_id}"),
            );
            return;
        }
        self.outbox.ack(seq);
        let task = tokio::spawn(run_watch(
            Arc::clone(&self.state),
            self.participant.clone(),
            room_id.clone(),
            self.outbox.clone(),
        ));
        self.watches.insert(room_id, task);
    }

    fn unwatch(&mut self, seq: u64, room_id: RoomId) {
        if let Some(task) = self.watches.remove(&room_id) {
            task.abort();
        }
        self.outbox.ack(seq);
    }

    /// Stores the message, then queues it for broadcast. See [`ReplayOverlap`].
    async fn send_message(&self, seq: u64, room_id: RoomId, text: String, image: Option<String>) {
        let Some(room) = self.state.rooms.get(&room_id) else {
            tracing::debug!(%room_id, participant_id = %self.participant, "no open room, message dropped");
            self.outbox.ack(seq);
            return;
        };

        let message = ChatMessage::now(room_id, self.participant.clone(), text, image);
        if let Err(e) = self.state.history.append(&message).await {
            tracing::warn!(room_id = %message.room_id, error = %e, "failed to store message");
            self.outbox.fail(seq, &e.into());
            return;
        }
        if !room.submit(message).await {
            tracing::debug!(room_id = %room.id(), "room closed before the message was queued");
        }
        self.outbox.ack(seq);
    }

    async fn end_chat_session(&self, seq: u64, room_id: RoomId) {
        let is_owner = match self.state.owners.is_owner(&room_id, &self.participant).await {
            Ok(is_owner) => is_owner,
            Err(e) => {
                self.outbox.fail(seq, &e.into());
                return;
            }
        };

        if let Some(room) = self.state.rooms.get(&room_id) {
            if is_owner {
                tracing::info!(%room_id, participant_id = %self.participant, "owner ended chat session");
                room.close();
            } else {
                let departure = room.release(&self.participant);
                tracing::info!(%room_id, participant_id = %self.participant, ?departure, "participant ended chat session");
            }
        }
        self.outbox.ack(seq);
    }
}

/// Task body for one `JoinChat`: admission, history replay, then live
/// delivery until the participant leaves or the room closes.
async fn run_join<O, H, C>(
    state: Shared<O, H, C>,
    participant: ParticipantId,
    room_id: RoomId,
    outbox: Outbox,
    seq: u64,
) where
    O: OwnershipResolver,
    H: ChatHistory,
    C: Codec,
{
    match join_chat(&state, &participant, &room_id, &outbox).await {
        Ok(status) => {
            outbox.push(ServerMessage::ChatEnded { room_id, status });
        }
        Err(e) => {
            tracing::debug!(%room_id, participant_id = %participant, error = %e, "join failed");
            outbox.fail(seq, &e);
        }
    }
}

async fn join_chat<O, H, C>(
    state: &ServerState<O, H, C>,
    participant: &ParticipantId,
    room_id: &RoomId,
    outbox: &Outbox,
) -> Result<ChatEnd, RoomError>
where
    O: OwnershipResolver,
    H: ChatHistory,
{
    let is_owner = state.owners.is_owner(room_id, participant).await?;
    let room = state.rooms.get_or_create(room_id)?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let admission = match room.enter(participant.clone(), is_owner, tx)? {
        Entry::Seated(admission) => admission,
        Entry::Queued(queued) => {
            outbox.push(ServerMessage::ChatQueued {
                room_id: room_id.clone(),
                position: u32::try_from(queued.position()).unwrap_or(u32::MAX),
            });
            queued.wait().await?
        }
    };
    let _seat = SeatGuard {
        room: Arc::clone(&room),
        participant: participant.clone(),
        ticket: admission.ticket,
    };
    outbox.push(ServerMessage::ChatJoined {
        room_id: room_id.clone(),
        role: admission.role,
    });

    let mut overlap = ReplayOverlap::default();
    match state.history.list(room_id).await {
        Ok(messages) => {
            overlap = ReplayOverlap::new(&messages, state.config.room.inbound_capacity);
            for message in messages {
                outbox.push(ServerMessage::History { message });
            }
        }
        Err(e) => {
            tracing::warn!(%room_id, error = %e, "could not load history, streaming live messages only");
        }
    }

    while let Some(message) = rx.recv().await {
        if overlap.already_replayed(&message) {
            continue;
        }
        if !outbox.push(ServerMessage::Chat { message }) {
            return Ok(ChatEnd::Left);
        }
    }

    // The delivery channel ends when the room closes, or when a newer
    // join of the same participant replaces this one.
    Ok(if room.is_closed() {
        ChatEnd::Cancelled
    } else {
        ChatEnd::Left
    })
}

/// Replayed messages that may also arrive on the live stream.
///
/// `SendMessage` stores a message before queueing it for broadcast, so a
/// participant admitted between the two steps gets it once from history
/// and once live. The live copy is skipped while it matches one of the
/// newest replayed messages. With several senders racing the join, a
/// message can still show up twice.
#[derive(Debug, Default)]
struct ReplayOverlap {
    recent: Vec<ChatMessage>,
    newest: u64,
}

impl ReplayOverlap {
    /// Remembers the last `window` replayed messages.
    fn new(replayed: &[ChatMessage], window: usize) -> Self {
        let start = replayed.len().saturating_sub(window);
        let recent = replayed[start..].to_vec();
        let newest = recent.iter().map(|m| m.created_at).max().unwrap_or(0);
        Self { recent, newest }
    }

    /// Returns `true` for a live message that was already replayed.
    fn already_replayed(&mut self, live: &ChatMessage) -> bool {
        if self.recent.is_empty() {
            return false;
        }
        if live.created_at > self.newest {
            self.recent.clear();
            return false;
        }
        match self.recent.iter().position(|m| m == live) {
            Some(i) => {
                self.recent.remove(i);
                true
            }
            None => false,
        }
    }
}

/// Task body for one `WatchChatQueue`: a status report every tick.
async fn run_watch<O, H, C>(
    state: Shared<O, H, C>,
    participant: ParticipantId,
    room_id: RoomId,
    outbox: Outbox,
) {
    let mut ticker = tokio::time::interval(state.config.watch_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let status = match state.rooms.get(&room_id) {
            Some(room) => match room.queue_status(&participant) {
                Ok(status) => status,
                Err(_) => break,
            },
            None if state.rooms.is_closed(&room_id) => break,
            None => QueueStatus::absent(),
        };
        let report = ServerMessage::QueueStatus {
            room_id: room_id.clone(),
            status,
        };
        if !outbox.push(report) {
            return;
        }
    }

    tracing::debug!(%room_id, participant_id = %participant, "watched room closed");
    outbox.push(ServerMessage::ChatEnded {
        room_id,
        status: ChatEnd::Cancelled,
    });
}

/// Writer task: drains the outbox onto the socket, numbering frames.
async fn write_frames<O, H, C>(
    conn: Arc<WebSocketConnection>,
    state: Shared<O, H, C>,
    mut outbox: mpsc::UnboundedReceiver<ServerMessage>,
    start: Instant,
) where
    C: Codec,
{
    // seq 0 was the HandshakeAck.
    let mut seq: u64 = 1;

    while let Some(msg) = outbox.recv().await {
        let envelope = Envelope {
            seq: next_seq(&mut seq),
            timestamp: elapsed_millis(&start),
            payload: Payload::Server(msg),
        };
        let bytes = match state.codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(conn_id = %conn.id(), error = %e, "failed to encode frame");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "send failed, writer stopping");
            break;
        }
    }
}

/// Sends an `Error` envelope directly, before the writer task exists.
async fn send_error(
    conn: &WebSocketConnection,
    codec: &impl Codec,
    seq: u64,
    message: &str,
    start: &Instant,
) -> Result<(), PotluckError> {
    let envelope = Envelope {
        seq,
        timestamp: elapsed_millis(start),
        payload: Payload::Server(ServerMessage::Error {
            seq,
            status: StatusCode::InvalidArgument,
            message: message.to_string(),
        }),
    };
    let bytes = codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

/// Recovers the `seq` of a frame that failed to decode as an envelope,
/// so the error can still be correlated. Falls back to 0.
fn salvage_seq(codec: &impl Codec, data: &[u8]) -> u64 {
    #[derive(Deserialize)]
    struct SeqOnly {
        seq: u64,
    }
    codec.decode::<SeqOnly>(data).map(|s| s.seq).unwrap_or(0)
}

fn elapsed_millis(start: &Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}

#[cfg(test)]
mod tests {
    use potluck_protocol::JsonCodec;

    use super::*;

    #[test]
    fn test_salvage_seq_reads_seq_from_bad_payload() {
        let data = br#"{"seq": 9, "timestamp": 1, "payload": {"type": "Client", "data": {"type": "JoinChat", "room_id": "has space"}}}"#;
        assert_eq!(salvage_seq(&JsonCodec, data), 9);
    }

    #[test]
    fn test_salvage_seq_defaults_to_zero() {
        assert_eq!(salvage_seq(&JsonCodec, b"not json"), 0);
    }

    #[test]
    fn test_next_seq_increments() {
        let mut seq = 5;
        assert_eq!(next_seq(&mut seq), 5);
        assert_eq!(next_seq(&mut seq), 6);
        assert_eq!(seq, 7);
    }

    fn chat(text: &str, created_at: u64) -> ChatMessage {
        ChatMessage {
            room_id: RoomId::parse("listing-1").unwrap(),
            participant_id: ParticipantId::parse("bob").unwrap(),
            text: text.into(),
            image: None,
            created_at,
        }
    }

    #[test]
    fn test_replay_overlap_skips_message_already_replayed() {
        let replayed = [chat("first", 10), chat("second", 20)];
        let mut overlap = ReplayOverlap::new(&replayed, 64);

        assert!(overlap.already_replayed(&chat("second", 20)));
        // Only skipped once.
        assert!(!overlap.already_replayed(&chat("second", 20)));
        assert!(!overlap.already_replayed(&chat("third", 30)));
        // Newer traffic ends the overlap window.
        assert!(!overlap.already_replayed(&chat("first", 10)));
    }

    #[test]
    fn test_replay_overlap_only_remembers_the_window() {
        let replayed = [chat("old", 10), chat("new", 20)];
        let mut overlap = ReplayOverlap::new(&replayed, 1);
        assert!(!overlap.already_replayed(&chat("old", 10)));
        assert!(overlap.already_replayed(&chat("new", 20)));
    }

    #[test]
    fn test_replay_overlap_without_history_passes_everything() {
        let mut overlap = ReplayOverlap::default();
        assert!(!overlap.already_replayed(&chat("hello", 0)));
    }

    #[tokio::test]
    async fn test_outbox_push_fails_after_writer_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Outbox(tx);
        assert!(outbox.push(ServerMessage::Ack { seq: 1 }));
        drop(rx);
        assert!(!outbox.push(ServerMessage::Ack { seq: 2 }));
    }
}
