//! Integration tests for the Potluck server: handshake, joins, the guest
//! queue, and session closure over real WebSocket connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use potluck::prelude::*;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const LISTING: &str = "listing-1";
const OWNER: &str = "alice";

fn rid(id: &str) -> RoomId {
    RoomId::parse(id).unwrap()
}

fn owners() -> ListingOwners {
    [(rid(LISTING), ParticipantId::parse(OWNER).unwrap())]
        .into_iter()
        .collect()
}

/// Starts a server on a random port. Returns its address and room table.
async fn start_server() -> (String, RoomRegistry) {
    let server = PotluckServer::builder()
        .bind("127.0.0.1:0")
        .watch_interval(Duration::from_millis(20))
        .build(owners())
        .await
        .expect("server should build");
    spawn(server)
}

async fn start_server_with_history() -> (String, RoomRegistry) {
    let server = PotluckServer::builder()
        .bind("127.0.0.1:0")
        .history(MemoryHistory::new())
        .build(owners())
        .await
        .expect("server should build");
    spawn(server)
}

/// Listing lookup that fails with `Unavailable` while `down` is set.
struct FlakyOwners {
    listings: ListingOwners,
    down: Arc<AtomicBool>,
}

impl OwnershipResolver for FlakyOwners {
    async fn is_owner(
        &self,
        room_id: &RoomId,
        participant: &ParticipantId,
    ) -> Result<bool, CollaboratorError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("listing store offline".into()));
        }
        self.listings.is_owner(room_id, participant).await
    }
}

async fn start_server_with_flaky_owners() -> (String, RoomRegistry, Arc<AtomicBool>) {
    let down = Arc::new(AtomicBool::new(false));
    let owners = FlakyOwners {
        listings: owners(),
        down: Arc::clone(&down),
    };
    let server = PotluckServer::builder()
        .bind("127.0.0.1:0")
        .build(owners)
        .await
        .expect("server should build");
    let (addr, rooms) = spawn(server);
    (addr, rooms, down)
}

fn spawn<O: OwnershipResolver, H: ChatHistory>(
    server: PotluckServer<O, H, potluck::protocol::JsonCodec>,
) -> (String, RoomRegistry) {
    let addr = server.local_addr().expect("local addr").to_string();
    let rooms = server.rooms().clone();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, rooms)
}

async fn connect_raw(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

fn encode(envelope: &Envelope) -> Message {
    Message::Binary(serde_json::to_vec(envelope).expect("encode").into())
}

async fn recv_envelope(ws: &mut ClientWs) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("recv failed");
        if msg.is_binary() || msg.is_text() {
            return serde_json::from_slice(&msg.into_data()).expect("decode");
        }
    }
}

/// A handshaken test client.
struct Client {
    ws: ClientWs,
    seq: u64,
}

impl Client {
    async fn connect(addr: &str, participant: &str) -> Self {
        let mut ws = connect_raw(addr).await;
        let hs = Envelope {
            seq: 0,
            timestamp: 0,
            payload: Payload::Client(ClientMessage::Handshake {
                version: PROTOCOL_VERSION,
                participant_id: ParticipantId::parse(participant).unwrap(),
            }),
        };
        ws.send(encode(&hs)).await.expect("send handshake");
        match recv_envelope(&mut ws).await.payload {
            Payload::Server(ServerMessage::HandshakeAck { participant_id, .. }) => {
                assert_eq!(participant_id.as_str(), participant);
            }
            other => panic!("expected HandshakeAck, got {other:?}"),
        }
        Self { ws, seq: 0 }
    }

    /// Sends a request and returns its sequence number.
    async fn send(&mut self, msg: ClientMessage) -> u64 {
        self.seq += 1;
        let envelope = Envelope {
            seq: self.seq,
            timestamp: 0,
            payload: Payload::Client(msg),
        };
        self.ws.send(encode(&envelope)).await.expect("send");
        self.seq
    }

    async fn recv(&mut self) -> ServerMessage {
        match recv_envelope(&mut self.ws).await.payload {
            Payload::Server(msg) => msg,
            other => panic!("expected a server message, got {other:?}"),
        }
    }

    /// Skips frames until one matches.
    async fn recv_until(&mut self, pred: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            let msg = self.recv().await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    async fn join(&mut self, room: &str) -> u64 {
        self.send(ClientMessage::JoinChat { room_id: rid(room) })
            .await
    }

    async fn say(&mut self, room: &str, text: &str) -> u64 {
        self.send(ClientMessage::SendMessage {
            room_id: rid(room),
            text: text.into(),
            image: None,
        })
        .await
    }

    async fn expect_ack(&mut self, seq: u64) {
        self.recv_until(|m| matches!(m, ServerMessage::Ack { seq: s } if *s == seq))
            .await;
    }

    async fn expect_joined(&mut self, role: Role) {
        match self
            .recv_until(|m| matches!(m, ServerMessage::ChatJoined { .. }))
            .await
        {
            ServerMessage::ChatJoined { role: got, .. } => assert_eq!(got, role),
            _ => unreachable!(),
        }
    }

    async fn expect_chat(&mut self) -> ChatMessage {
        match self
            .recv_until(|m| matches!(m, ServerMessage::Chat { .. }))
            .await
        {
            ServerMessage::Chat { message } => message,
            _ => unreachable!(),
        }
    }

    async fn expect_ended(&mut self) -> ChatEnd {
        match self
            .recv_until(|m| matches!(m, ServerMessage::ChatEnded { .. }))
            .await
        {
            ServerMessage::ChatEnded { status, .. } => status,
            _ => unreachable!(),
        }
    }

    async fn expect_error(&mut self, seq: u64) -> StatusCode {
        match self
            .recv_until(|m| matches!(m, ServerMessage::Error { seq: s, .. } if *s == seq))
            .await
        {
            ServerMessage::Error { status, .. } => status,
            _ => unreachable!(),
        }
    }
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_success() {
    let (addr, _) = start_server().await;
    let _client = Client::connect(&addr, "bob").await;
}

#[tokio::test]
async fn test_handshake_version_mismatch() {
    let (addr, _) = start_server().await;
    let mut ws = connect_raw(&addr).await;

    let hs = Envelope {
        seq: 0,
        timestamp: 0,
        payload: Payload::Client(ClientMessage::Handshake {
            version: 999,
            participant_id: ParticipantId::parse("bob").unwrap(),
        }),
    };
    ws.send(encode(&hs)).await.expect("send");

    match recv_envelope(&mut ws).await.payload {
        Payload::Server(ServerMessage::Error { status, .. }) => {
            assert_eq!(status, StatusCode::InvalidArgument);
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_rejects_invalid_participant_id() {
    let (addr, _) = start_server().await;
    let mut ws = connect_raw(&addr).await;

    let raw = r#"{"seq":3,"timestamp":0,"payload":{"type":"Client","data":{"type":"Handshake","version":1,"participant_id":"not valid"}}}"#;
    ws.send(Message::Text(raw.into())).await.expect("send");

    match recv_envelope(&mut ws).await.payload {
        Payload::Server(ServerMessage::Error { seq, status, .. }) => {
            assert_eq!(seq, 3);
            assert_eq!(status, StatusCode::InvalidArgument);
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_frame_must_be_handshake() {
    let (addr, _) = start_server().await;
    let mut ws = connect_raw(&addr).await;

    let env = Envelope {
        seq: 1,
        timestamp: 0,
        payload: Payload::Client(ClientMessage::JoinChat {
            room_id: rid(LISTING),
        }),
    };
    ws.send(encode(&env)).await.expect("send");

    match recv_envelope(&mut ws).await.payload {
        Payload::Server(ServerMessage::Error { status, .. }) => {
            assert_eq!(status, StatusCode::InvalidArgument);
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_silent_tcp_peer_does_not_block_other_clients() {
    let (addr, _) = start_server().await;

    // Connects but never sends the upgrade request.
    let _silent = tokio::net::TcpStream::connect(&addr)
        .await
        .expect("tcp connect");
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(3), Client::connect(&addr, "bob"))
        .await
        .expect("client should connect while another peer stalls");
}

#[tokio::test]
async fn test_silent_tcp_peer_is_dropped_after_handshake_timeout() {
    use tokio::io::AsyncReadExt;

    let config = ServerConfig {
        handshake_timeout: Duration::from_millis(100),
        ..ServerConfig::default()
    };
    let server = PotluckServer::builder()
        .config(config)
        .bind("127.0.0.1:0")
        .build(owners())
        .await
        .expect("server should build");
    let (addr, _) = spawn(server);

    let mut silent = tokio::net::TcpStream::connect(&addr)
        .await
        .expect("tcp connect");
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), silent.read(&mut buf))
        .await
        .expect("server should hang up on a peer that never upgrades");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_heartbeat() {
    let (addr, _) = start_server().await;
    let mut client = Client::connect(&addr, "bob").await;

    client
        .send(ClientMessage::Heartbeat { client_time: 1234 })
        .await;
    match client.recv().await {
        ServerMessage::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 1234),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

// =========================================================================
// Joining, queueing, closure
// =========================================================================

#[tokio::test]
async fn test_owner_guest_queue_and_closure() {
    let (addr, rooms) = start_server().await;
    let mut alice = Client::connect(&addr, OWNER).await;
    let mut bob = Client::connect(&addr, "bob").await;
    let mut carol = Client::connect(&addr, "carol").await;

    alice.join(LISTING).await;
    alice.expect_joined(Role::Owner).await;
    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;

    carol.join(LISTING).await;
    match carol.recv().await {
        ServerMessage::ChatQueued { position, .. } => assert_eq!(position, 1),
        other => panic!("expected ChatQueued, got {other:?}"),
    }

    // Owner and guest both see the message; the queued party does not.
    alice.say(LISTING, "still available?").await;
    assert_eq!(bob.expect_chat().await.text, "still available?");
    let echoed = alice.expect_chat().await;
    assert_eq!(echoed.participant_id.as_str(), OWNER);

    // Bob leaves; Carol is promoted.
    let seq = bob
        .send(ClientMessage::LeaveChat {
            room_id: rid(LISTING),
        })
        .await;
    assert_eq!(bob.expect_ended().await, ChatEnd::Left);
    bob.expect_ack(seq).await;
    carol.expect_joined(Role::Guest).await;

    let seq = carol.say(LISTING, "I'll take it").await;
    carol.expect_ack(seq).await;
    assert_eq!(alice.expect_chat().await.text, "I'll take it");

    // The owner ends the chat; everyone's stream ends as cancelled.
    alice
        .send(ClientMessage::EndChatSession {
            room_id: rid(LISTING),
        })
        .await;
    assert_eq!(carol.expect_ended().await, ChatEnd::Cancelled);
    assert_eq!(alice.expect_ended().await, ChatEnd::Cancelled);
    assert!(rooms.is_closed(&rid(LISTING)));

    // Late joiners are turned away.
    let mut dave = Client::connect(&addr, "dave").await;
    let seq = dave.join(LISTING).await;
    assert_eq!(dave.expect_error(seq).await, StatusCode::Cancelled);
}

#[tokio::test]
async fn test_queued_guest_is_told_when_owner_leaves() {
    let (addr, _) = start_server().await;
    let mut alice = Client::connect(&addr, OWNER).await;
    let mut bob = Client::connect(&addr, "bob").await;
    let mut carol = Client::connect(&addr, "carol").await;

    alice.join(LISTING).await;
    alice.expect_joined(Role::Owner).await;
    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;
    let join_seq = carol.join(LISTING).await;
    carol
        .recv_until(|m| matches!(m, ServerMessage::ChatQueued { .. }))
        .await;

    drop(alice);

    assert_eq!(carol.expect_error(join_seq).await, StatusCode::Cancelled);
    assert_eq!(bob.expect_ended().await, ChatEnd::Cancelled);
}

#[tokio::test]
async fn test_join_unknown_listing_is_not_found() {
    let (addr, _) = start_server().await;
    let mut bob = Client::connect(&addr, "bob").await;

    let seq = bob.join("listing-404").await;
    assert_eq!(bob.expect_error(seq).await, StatusCode::NotFound);
}

#[tokio::test]
async fn test_double_join_on_one_connection_is_rejected() {
    let (addr, _) = start_server().await;
    let mut bob = Client::connect(&addr, "bob").await;

    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;
    let seq = bob.join(LISTING).await;
    assert_eq!(bob.expect_error(seq).await, StatusCode::FailedPrecondition);
}

#[tokio::test]
async fn test_join_with_ownership_lookup_down_is_internal() {
    let (addr, rooms, down) = start_server_with_flaky_owners().await;
    let mut bob = Client::connect(&addr, "bob").await;

    down.store(true, Ordering::SeqCst);
    let seq = bob.join(LISTING).await;
    assert_eq!(bob.expect_error(seq).await, StatusCode::Internal);
    assert_eq!(rooms.room_count(), 0);
    assert!(!rooms.is_closed(&rid(LISTING)));
}

#[tokio::test]
async fn test_end_chat_session_with_ownership_lookup_down_changes_nothing() {
    let (addr, rooms, down) = start_server_with_flaky_owners().await;
    let mut alice = Client::connect(&addr, OWNER).await;
    let mut bob = Client::connect(&addr, "bob").await;
    let mut carol = Client::connect(&addr, "carol").await;

    alice.join(LISTING).await;
    alice.expect_joined(Role::Owner).await;
    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;
    carol.join(LISTING).await;
    carol
        .recv_until(|m| matches!(m, ServerMessage::ChatQueued { .. }))
        .await;

    down.store(true, Ordering::SeqCst);
    for client in [&mut alice, &mut bob] {
        let seq = client
            .send(ClientMessage::EndChatSession {
                room_id: rid(LISTING),
            })
            .await;
        assert_eq!(client.expect_error(seq).await, StatusCode::Internal);
    }

    let room = rooms.get(&rid(LISTING)).expect("room is still open");
    assert!(!room.is_closed());
    assert_eq!(
        room.seat_holder(Role::Owner).map(|p| p.as_str().to_owned()),
        Some(OWNER.to_owned())
    );
    assert_eq!(
        room.seat_holder(Role::Guest).map(|p| p.as_str().to_owned()),
        Some("bob".to_owned())
    );
    assert_eq!(room.queue_len(), 1);
    assert_eq!(rooms.room_count(), 1);
}

#[tokio::test]
async fn test_send_to_absent_room_is_acknowledged() {
    let (addr, rooms) = start_server().await;
    let mut bob = Client::connect(&addr, "bob").await;

    let seq = bob.say("listing-404", "hello?").await;
    bob.expect_ack(seq).await;
    assert_eq!(rooms.room_count(), 0);
}

#[tokio::test]
async fn test_guest_end_chat_session_promotes_next() {
    let (addr, _) = start_server().await;
    let mut bob = Client::connect(&addr, "bob").await;
    let mut carol = Client::connect(&addr, "carol").await;

    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;
    carol.join(LISTING).await;
    carol
        .recv_until(|m| matches!(m, ServerMessage::ChatQueued { .. }))
        .await;

    let seq = bob
        .send(ClientMessage::EndChatSession {
            room_id: rid(LISTING),
        })
        .await;
    let frames = [bob.recv().await, bob.recv().await];
    assert!(frames.contains(&ServerMessage::Ack { seq }));
    assert!(frames.contains(&ServerMessage::ChatEnded {
        room_id: rid(LISTING),
        status: ChatEnd::Left,
    }));
    carol.expect_joined(Role::Guest).await;
}

#[tokio::test]
async fn test_disconnected_waiter_leaves_queue() {
    let (addr, rooms) = start_server().await;
    let mut bob = Client::connect(&addr, "bob").await;
    let mut carol = Client::connect(&addr, "carol").await;

    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;
    carol.join(LISTING).await;
    carol
        .recv_until(|m| matches!(m, ServerMessage::ChatQueued { .. }))
        .await;

    let room = rooms.get(&rid(LISTING)).expect("room is open");
    assert_eq!(room.queue_len(), 1);
    drop(carol);
    eventually(|| room.queue_len() == 0).await;
}

// =========================================================================
// Queue watching and history
// =========================================================================

#[tokio::test]
async fn test_watch_reports_position_until_closure() {
    let (addr, _) = start_server().await;
    let mut alice = Client::connect(&addr, OWNER).await;
    let mut bob = Client::connect(&addr, "bob").await;
    let mut carol = Client::connect(&addr, "carol").await;

    alice.join(LISTING).await;
    alice.expect_joined(Role::Owner).await;
    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;
    carol.join(LISTING).await;
    carol
        .recv_until(|m| matches!(m, ServerMessage::ChatQueued { .. }))
        .await;

    carol
        .send(ClientMessage::WatchChatQueue {
            room_id: rid(LISTING),
        })
        .await;
    match carol
        .recv_until(|m| matches!(m, ServerMessage::QueueStatus { .. }))
        .await
    {
        ServerMessage::QueueStatus { status, .. } => {
            assert_eq!(status.queued_count, 1);
            assert_eq!(status.position, 1);
        }
        _ => unreachable!(),
    }

    alice
        .send(ClientMessage::EndChatSession {
            room_id: rid(LISTING),
        })
        .await;
    assert_eq!(carol.expect_ended().await, ChatEnd::Cancelled);
}

#[tokio::test]
async fn test_watch_of_unopened_room_reports_absent() {
    let (addr, _) = start_server().await;
    let mut bob = Client::connect(&addr, "bob").await;

    let seq = bob
        .send(ClientMessage::WatchChatQueue {
            room_id: rid(LISTING),
        })
        .await;
    bob.expect_ack(seq).await;
    match bob.recv().await {
        ServerMessage::QueueStatus { status, .. } => assert_eq!(status, QueueStatus::absent()),
        other => panic!("expected QueueStatus, got {other:?}"),
    }

    let seq = bob
        .send(ClientMessage::UnwatchChatQueue {
            room_id: rid(LISTING),
        })
        .await;
    bob.expect_ack(seq).await;
}

#[tokio::test]
async fn test_history_is_replayed_on_join() {
    let (addr, _) = start_server_with_history().await;
    let mut alice = Client::connect(&addr, OWNER).await;
    let mut bob = Client::connect(&addr, "bob").await;

    alice.join(LISTING).await;
    alice.expect_joined(Role::Owner).await;
    let seq = alice.say(LISTING, "first").await;
    alice.expect_ack(seq).await;
    let seq = alice.say(LISTING, "second").await;
    alice.expect_ack(seq).await;

    bob.join(LISTING).await;
    bob.expect_joined(Role::Guest).await;
    let mut replayed = Vec::new();
    for _ in 0..2 {
        match bob.recv().await {
            ServerMessage::History { message } => replayed.push(message.text),
            other => panic!("expected History, got {other:?}"),
        }
    }
    assert_eq!(replayed, ["first", "second"]);
}
