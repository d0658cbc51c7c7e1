//! A room: one conversation's seats, guest queue, and inbound messages.
//!
//! A room has exactly two seats. The owner seat belongs to the listing
//! owner and is never contested. The guest seat holds one visitor at a
//! time; anyone else who wants it waits in a FIFO queue and is promoted
//! when the seat frees up. When the owner leaves, the room closes for
//! good: every waiter is told so, the inbound queue is shut, and the
//! room is unregistered.
//!
//! All seat and queue state lives behind one `std::sync::Mutex` that is
//! never held across an `.await`. Queued callers park on a oneshot
//! channel outside the lock; the promoter or the closer fires it while
//! holding the lock, so a waiter never sees a half-applied transition.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use potluck_protocol::{ChatMessage, ParticipantId, QueueStatus, Role, RoomId};
use tokio::sync::{mpsc, oneshot};

use crate::registry::RegistryShared;
use crate::{RoomConfig, RoomError};

/// Channel on which a seated participant receives broadcast messages.
pub type ParticipantSender = mpsc::UnboundedSender<ChatMessage>;

/// Identifies one admission attempt.
///
/// A participant that joins twice (say, from two tabs) gets two tickets.
/// Releasing by ticket only takes effect while that ticket still holds
/// the seat, so a stale connection cannot evict its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// A successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub role: Role,
    pub ticket: Ticket,
    /// `true` if the participant waited in the queue first.
    pub promoted: bool,
}

/// What a release did to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// The owner left and the room is now closed.
    Closed,
    /// The guest seat was vacated; `promoted` is the queued participant
    /// that took it, if any.
    Vacated { promoted: Option<ParticipantId> },
    /// A queued participant was taken out of the queue.
    Withdrawn,
    /// Nothing to do: not seated, not queued, stale ticket, or the room
    /// was already closed.
    NotPresent,
}

/// Result of [`Room::enter`].
pub enum Entry<'a> {
    /// A seat was free (or already ours).
    Seated(Admission),
    /// The guest seat is taken; wait on the returned handle.
    Queued(QueuedAdmission<'a>),
}

/// How a queued waiter's wait ended. Sent exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Promoted,
    Closed,
    Withdrawn,
}

struct Seat {
    participant: ParticipantId,
    ticket: Ticket,
}

struct Occupant {
    ticket: Ticket,
    sender: ParticipantSender,
}

struct Waiter {
    participant: ParticipantId,
    ticket: Ticket,
    sender: ParticipantSender,
    ready: oneshot::Sender<Outcome>,
}

struct RoomState {
    owner: Option<Seat>,
    guest: Option<Seat>,
    /// Everyone who receives broadcasts. At most the two seat holders.
    occupants: HashMap<ParticipantId, Occupant>,
    queue: VecDeque<Waiter>,
    closed: bool,
    /// Dropped on close so the broadcast loop ends once drained.
    inbound: Option<mpsc::Sender<ChatMessage>>,
    next_ticket: u64,
}

impl RoomState {
    fn issue_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    fn is_seated(&self, participant: &ParticipantId) -> bool {
        [&self.owner, &self.guest]
            .into_iter()
            .flatten()
            .any(|seat| seat.participant == *participant)
    }
}

fn seat_matches(seat: &Option<Seat>, participant: &ParticipantId, ticket: Option<Ticket>) -> bool {
    seat.as_ref().is_some_and(|s| {
        s.participant == *participant && ticket.is_none_or(|t| t == s.ticket)
    })
}

/// One conversation, keyed by the listing it is about.
pub struct Room {
    id: RoomId,
    state: Mutex<RoomState>,
    registry: Weak<RegistryShared>,
}

impl Room {
    /// Creates a room and starts its broadcast loop.
    pub(crate) fn spawn(
        id: RoomId,
        config: &RoomConfig,
        registry: Weak<RegistryShared>,
    ) -> Arc<Self> {
        let (inbound, rx) = mpsc::channel(config.inbound_capacity);
        let room = Arc::new(Self {
            id,
            state: Mutex::new(RoomState {
                owner: None,
                guest: None,
                occupants: HashMap::new(),
                queue: VecDeque::new(),
                closed: false,
                inbound: Some(inbound),
                next_ticket: 0,
            }),
            registry,
        });
        tokio::spawn(crate::broadcast::run(Arc::clone(&room), rx));
        tracing::info!(room_id = %room.id, "room created");
        room
    }

    /// Returns the room's id.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------

    /// Admits `participant`, waiting in the guest queue if necessary.
    ///
    /// Dropping the returned future while it waits removes the
    /// participant from the queue.
    pub async fn admit(
        &self,
        participant: ParticipantId,
        is_owner: bool,
        sender: ParticipantSender,
    ) -> Result<Admission, RoomError> {
        match self.enter(participant, is_owner, sender)? {
            Entry::Seated(admission) => Ok(admission),
            Entry::Queued(queued) => queued.wait().await,
        }
    }

    /// Non-blocking first half of [`admit`](Self::admit): seats the
    /// participant if it can, otherwise appends a waiter to the queue and
    /// hands back a [`QueuedAdmission`] to wait on.
    pub fn enter(
        &self,
        participant: ParticipantId,
        is_owner: bool,
        sender: ParticipantSender,
    ) -> Result<Entry<'_>, RoomError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RoomError::SessionClosed(self.id.clone()));
        }

        if is_owner {
            if state
                .owner
                .as_ref()
                .is_some_and(|seat| seat.participant != participant)
            {
                return Err(RoomError::OwnerSeatTaken {
                    room_id: self.id.clone(),
                });
            }
            let ticket = state.issue_ticket();
            state.owner = Some(Seat {
                participant: participant.clone(),
                ticket,
            });
            state
                .occupants
                .insert(participant.clone(), Occupant { ticket, sender });
            tracing::info!(room_id = %self.id, participant_id = %participant, "owner seated");
            return Ok(Entry::Seated(Admission {
                role: Role::Owner,
                ticket,
                promoted: false,
            }));
        }

        let seat_free = state
            .guest
            .as_ref()
            .is_none_or(|seat| seat.participant == participant);
        if seat_free {
            let ticket = state.issue_ticket();
            state.guest = Some(Seat {
                participant: participant.clone(),
                ticket,
            });
            state
                .occupants
                .insert(participant.clone(), Occupant { ticket, sender });
            tracing::info!(room_id = %self.id, participant_id = %participant, "guest seated");
            return Ok(Entry::Seated(Admission {
                role: Role::Guest,
                ticket,
                promoted: false,
            }));
        }

        if state.queue.iter().any(|w| w.participant == participant) {
            return Err(RoomError::AlreadyQueued {
                room_id: self.id.clone(),
                participant_id: participant,
            });
        }

        let ticket = state.issue_ticket();
        let (ready, rx) = oneshot::channel();
        state.queue.push_back(Waiter {
            participant: participant.clone(),
            ticket,
            sender,
            ready,
        });
        let position = state.queue.len();
        tracing::info!(
            room_id = %self.id,
            participant_id = %participant,
            position,
            "guest seat taken, participant queued"
        );

        Ok(Entry::Queued(QueuedAdmission {
            room: self,
            participant,
            ticket,
            position,
            ready: rx,
            settled: false,
        }))
    }

    // -----------------------------------------------------------------
    // Departure
    // -----------------------------------------------------------------

    /// Releases whatever `participant` holds: the owner seat (closing the
    /// room), the guest seat (promoting the next waiter), or its place
    /// in the queue.
    pub fn release(&self, participant: &ParticipantId) -> Departure {
        self.depart(participant, None)
    }

    /// Like [`release`](Self::release), but only if `ticket` is still the
    /// one holding the seat or queue slot.
    pub fn release_ticket(&self, participant: &ParticipantId, ticket: Ticket) -> Departure {
        self.depart(participant, Some(ticket))
    }

    /// Closes the room on behalf of its owner, whether or not the owner
    /// is currently seated. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let closed_now = {
            let mut state = self.lock();
            if state.closed {
                false
            } else {
                self.close_locked(&mut state);
                true
            }
        };
        if closed_now {
            self.unregister();
        }
        closed_now
    }

    fn depart(&self, participant: &ParticipantId, ticket: Option<Ticket>) -> Departure {
        let departure = {
            let mut state = self.lock();
            self.depart_locked(&mut state, participant, ticket)
        };
        // Unregister only after the closure is fully applied, and without
        // holding the room lock.
        if departure == Departure::Closed {
            self.unregister();
        }
        departure
    }

    fn depart_locked(
        &self,
        state: &mut RoomState,
        participant: &ParticipantId,
        ticket: Option<Ticket>,
    ) -> Departure {
        if state.closed {
            let current = state
                .occupants
                .get(participant)
                .is_some_and(|o| ticket.is_none_or(|t| t == o.ticket));
            if current {
                state.occupants.remove(participant);
            }
            return Departure::NotPresent;
        }

        if seat_matches(&state.owner, participant, ticket) {
            state.occupants.remove(participant);
            tracing::info!(room_id = %self.id, participant_id = %participant, "owner left");
            self.close_locked(state);
            return Departure::Closed;
        }

        if seat_matches(&state.guest, participant, ticket) {
            if let Some(seat) = state.guest.take() {
                if state
                    .occupants
                    .get(participant)
                    .is_some_and(|o| o.ticket == seat.ticket)
                {
                    state.occupants.remove(participant);
                }
            }
            tracing::info!(room_id = %self.id, participant_id = %participant, "guest left");
            let promoted = self.promote_next_locked(state);
            return Departure::Vacated { promoted };
        }

        let queue = std::mem::take(&mut state.queue);
        let (leaving, staying): (VecDeque<Waiter>, VecDeque<Waiter>) =
            queue.into_iter().partition(|w| {
                w.participant == *participant && ticket.is_none_or(|t| t == w.ticket)
            });
        state.queue = staying;
        if leaving.is_empty() {
            return Departure::NotPresent;
        }
        for waiter in leaving {
            let _ = waiter.ready.send(Outcome::Withdrawn);
        }
        tracing::info!(room_id = %self.id, participant_id = %participant, "participant left the queue");
        Departure::Withdrawn
    }

    /// Moves the head of the queue into the vacant guest seat.
    ///
    /// Waiters whose caller has already gone are skipped, so exactly one
    /// live waiter is promoted when there is one.
    fn promote_next_locked(&self, state: &mut RoomState) -> Option<ParticipantId> {
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.ready.is_closed() {
                tracing::debug!(
                    room_id = %self.id,
                    participant_id = %waiter.participant,
                    "skipping queued participant that went away"
                );
                continue;
            }
            let Waiter {
                participant,
                ticket,
                sender,
                ready,
            } = waiter;
            state.guest = Some(Seat {
                participant: participant.clone(),
                ticket,
            });
            state
                .occupants
                .insert(participant.clone(), Occupant { ticket, sender });
            if ready.send(Outcome::Promoted).is_err() {
                state.guest = None;
                state.occupants.remove(&participant);
                continue;
            }
            tracing::info!(
                room_id = %self.id,
                participant_id = %participant,
                still_queued = state.queue.len(),
                "queued participant promoted to guest seat"
            );
            return Some(participant);
        }
        None
    }

    fn close_locked(&self, state: &mut RoomState) {
        state.closed = true;
        let waiting = state.queue.len();
        for waiter in state.queue.drain(..) {
            let _ = waiter.ready.send(Outcome::Closed);
        }
        state.inbound = None;
        tracing::info!(room_id = %self.id, waiting, "room closed");
    }

    fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }

    /// Called when a [`QueuedAdmission`] is dropped before it observed
    /// its outcome.
    fn abandon(
        &self,
        participant: &ParticipantId,
        ticket: Ticket,
        ready: &mut oneshot::Receiver<Outcome>,
    ) {
        let mut state = self.lock();
        if let Some(idx) = state.queue.iter().position(|w| w.ticket == ticket) {
            state.queue.remove(idx);
            tracing::info!(
                room_id = %self.id,
                participant_id = %participant,
                "queued participant went away, removed from queue"
            );
            return;
        }
        // Outcomes are only sent under this lock, so it is visible now.
        if let Ok(Outcome::Promoted) = ready.try_recv() {
            tracing::info!(
                room_id = %self.id,
                participant_id = %participant,
                "promoted participant went away before taking the seat"
            );
            let departure = self.depart_locked(&mut state, participant, Some(ticket));
            drop(state);
            if departure == Departure::Closed {
                self.unregister();
            }
        }
    }

    // -----------------------------------------------------------------
    // Messages and queries
    // -----------------------------------------------------------------

    /// Queues `message` for broadcast. Waits while the inbound queue is
    /// full. Returns `false` if the room is closed.
    pub async fn submit(&self, message: ChatMessage) -> bool {
        let inbound = self.lock().inbound.clone();
        match inbound {
            Some(inbound) => inbound.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Reports the queue length and `participant`'s place in it.
    ///
    /// # Errors
    /// [`RoomError::SessionClosed`] once the owner has left.
    pub fn queue_status(&self, participant: &ParticipantId) -> Result<QueueStatus, RoomError> {
        let state = self.lock();
        if state.closed {
            return Err(RoomError::SessionClosed(self.id.clone()));
        }
        let queued_count = u32::try_from(state.queue.len()).unwrap_or(u32::MAX);
        let position = match state.queue.iter().position(|w| w.participant == *participant) {
            Some(idx) => i32::try_from(idx + 1).unwrap_or(i32::MAX),
            None if state.is_seated(participant) => QueueStatus::SEATED,
            None => QueueStatus::ABSENT,
        };
        Ok(QueueStatus {
            queued_count,
            position,
        })
    }

    /// Returns `true` once the owner has left.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// The participant holding the given seat, if any.
    pub fn seat_holder(&self, role: Role) -> Option<ParticipantId> {
        let state = self.lock();
        let seat = match role {
            Role::Owner => &state.owner,
            Role::Guest => &state.guest,
        };
        seat.as_ref().map(|s| s.participant.clone())
    }

    /// Number of participants currently receiving broadcasts.
    pub fn occupant_count(&self) -> usize {
        self.lock().occupants.len()
    }

    /// Number of participants waiting for the guest seat.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    // -----------------------------------------------------------------
    // Broadcast loop support
    // -----------------------------------------------------------------

    /// Snapshot of everyone to deliver to, taken under the lock.
    pub(crate) fn recipients(&self) -> Vec<(ParticipantId, Ticket, ParticipantSender)> {
        self.lock()
            .occupants
            .iter()
            .map(|(id, o)| (id.clone(), o.ticket, o.sender.clone()))
            .collect()
    }

    /// Stops delivering to `participant` if `ticket` is still its current
    /// channel. Seats are left alone; the connection's own teardown
    /// releases them.
    pub(crate) fn evict(&self, participant: &ParticipantId, ticket: Ticket) -> bool {
        let mut state = self.lock();
        if state
            .occupants
            .get(participant)
            .is_some_and(|o| o.ticket == ticket)
        {
            state.occupants.remove(participant);
            true
        } else {
            false
        }
    }

    /// Drops every remaining delivery channel so their streams end.
    pub(crate) fn drain_occupants(&self) -> usize {
        let mut state = self.lock();
        let count = state.occupants.len();
        state.occupants.clear();
        count
    }
}

/// A guest-seat claim waiting in the queue.
///
/// Dropping this before [`wait`](Self::wait) completes withdraws the
/// claim. If a promotion had already been fired, the seat it granted is
/// released again, which promotes the next waiter.
pub struct QueuedAdmission<'a> {
    room: &'a Room,
    participant: ParticipantId,
    ticket: Ticket,
    position: usize,
    ready: oneshot::Receiver<Outcome>,
    settled: bool,
}

impl QueuedAdmission<'_> {
    /// 1-based position in the queue at the time of queuing.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The ticket the seat will be held under once promoted.
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Waits until promoted to the guest seat or until the room closes.
    pub async fn wait(mut self) -> Result<Admission, RoomError> {
        let outcome = (&mut self.ready).await;
        self.settled = true;
        match outcome {
            Ok(Outcome::Promoted) => Ok(Admission {
                role: Role::Guest,
                ticket: self.ticket,
                promoted: true,
            }),
            Ok(Outcome::Withdrawn) => Err(RoomError::Withdrawn {
                room_id: self.room.id.clone(),
                participant_id: self.participant.clone(),
            }),
            Ok(Outcome::Closed) | Err(_) => Err(RoomError::SessionClosed(self.room.id.clone())),
        }
    }
}

impl Drop for QueuedAdmission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.room
                .abandon(&self.participant, self.ticket, &mut self.ready);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::parse(id).unwrap()
    }

    fn standalone_room() -> Arc<Room> {
        Room::spawn(
            RoomId::parse("listing-1").unwrap(),
            &RoomConfig::default(),
            Weak::new(),
        )
    }

    fn sender() -> ParticipantSender {
        mpsc::unbounded_channel().0
    }

    fn queued<'a>(room: &'a Room, id: &str) -> QueuedAdmission<'a> {
        match room.enter(pid(id), false, sender()).unwrap() {
            Entry::Queued(q) => q,
            Entry::Seated(_) => panic!("{id} should have been queued"),
        }
    }

    #[tokio::test]
    async fn test_owner_and_first_guest_are_seated() {
        let room = standalone_room();
        let owner = room.admit(pid("owner"), true, sender()).await.unwrap();
        let guest = room.admit(pid("g1"), false, sender()).await.unwrap();

        assert_eq!(owner.role, Role::Owner);
        assert_eq!(guest.role, Role::Guest);
        assert!(!guest.promoted);
        assert_eq!(room.occupant_count(), 2);
        assert_eq!(room.seat_holder(Role::Guest), Some(pid("g1")));
    }

    #[tokio::test]
    async fn test_guest_rejoin_is_idempotent() {
        let room = standalone_room();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        room.admit(pid("g1"), false, sender()).await.unwrap();

        assert_eq!(room.queue_len(), 0);
        assert_eq!(room.occupant_count(), 1);
        assert_eq!(room.seat_holder(Role::Guest), Some(pid("g1")));
    }

    #[tokio::test]
    async fn test_second_owner_id_is_rejected() {
        let room = standalone_room();
        room.admit(pid("owner"), true, sender()).await.unwrap();
        let err = room.admit(pid("impostor"), true, sender()).await.unwrap_err();
        assert!(matches!(err, RoomError::OwnerSeatTaken { .. }));
        assert_eq!(room.seat_holder(Role::Owner), Some(pid("owner")));
    }

    #[tokio::test]
    async fn test_guest_departure_promotes_queue_head() {
        let room = standalone_room();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        let g2 = queued(&room, "g2");
        assert_eq!(g2.position(), 1);

        let departure = room.release(&pid("g1"));
        assert_eq!(departure, Departure::Vacated { promoted: Some(pid("g2")) });

        let admission = g2.wait().await.unwrap();
        assert!(admission.promoted);
        assert_eq!(room.seat_holder(Role::Guest), Some(pid("g2")));
        assert_eq!(room.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_already_queued_participant_is_rejected() {
        let room = standalone_room();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        let _g2 = queued(&room, "g2");
        let err = room.enter(pid("g2"), false, sender()).err().unwrap();
        assert!(matches!(err, RoomError::AlreadyQueued { .. }));
        assert_eq!(room.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_owner_departure_closes_and_signals_waiters() {
        let room = standalone_room();
        room.admit(pid("owner"), true, sender()).await.unwrap();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        let g2 = queued(&room, "g2");
        let g3 = queued(&room, "g3");

        assert_eq!(room.release(&pid("owner")), Departure::Closed);
        assert!(room.is_closed());

        assert!(matches!(g2.wait().await, Err(RoomError::SessionClosed(_))));
        assert!(matches!(g3.wait().await, Err(RoomError::SessionClosed(_))));
        assert_eq!(room.queue_len(), 0);

        let late = room.admit(pid("g4"), false, sender()).await;
        assert!(matches!(late, Err(RoomError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_dropped_waiter_leaves_queue() {
        let room = standalone_room();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        let g2 = queued(&room, "g2");
        let g3 = queued(&room, "g3");
        drop(g2);

        assert_eq!(room.queue_len(), 1);
        assert_eq!(room.queue_status(&pid("g3")).unwrap().position, 1);

        room.release(&pid("g1"));
        assert!(g3.wait().await.unwrap().promoted);
    }

    #[tokio::test]
    async fn test_waiter_dropped_after_promotion_gives_seat_back() {
        let room = standalone_room();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        let g2 = queued(&room, "g2");
        let g3 = queued(&room, "g3");

        // g2 is promoted but its caller goes away before observing it.
        room.release(&pid("g1"));
        assert_eq!(room.seat_holder(Role::Guest), Some(pid("g2")));
        drop(g2);

        assert_eq!(room.seat_holder(Role::Guest), Some(pid("g3")));
        assert!(g3.wait().await.unwrap().promoted);
    }

    #[tokio::test]
    async fn test_release_of_queued_participant_withdraws_it() {
        let room = standalone_room();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        let g2 = queued(&room, "g2");

        assert_eq!(room.release(&pid("g2")), Departure::Withdrawn);
        assert!(matches!(g2.wait().await, Err(RoomError::Withdrawn { .. })));
        assert_eq!(room.seat_holder(Role::Guest), Some(pid("g1")));
    }

    #[tokio::test]
    async fn test_stale_ticket_does_not_evict_replacement() {
        let room = standalone_room();
        let first = room.admit(pid("g1"), false, sender()).await.unwrap();
        let second = room.admit(pid("g1"), false, sender()).await.unwrap();

        assert_eq!(room.release_ticket(&pid("g1"), first.ticket), Departure::NotPresent);
        assert_eq!(room.seat_holder(Role::Guest), Some(pid("g1")));

        assert_eq!(
            room.release_ticket(&pid("g1"), second.ticket),
            Departure::Vacated { promoted: None }
        );
        assert_eq!(room.seat_holder(Role::Guest), None);
    }

    #[tokio::test]
    async fn test_queue_status_positions() {
        let room = standalone_room();
        room.admit(pid("owner"), true, sender()).await.unwrap();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        let _g2 = queued(&room, "g2");
        let _g3 = queued(&room, "g3");

        let seated = room.queue_status(&pid("g1")).unwrap();
        assert_eq!((seated.queued_count, seated.position), (2, 0));
        assert_eq!(room.queue_status(&pid("owner")).unwrap().position, 0);
        assert_eq!(room.queue_status(&pid("g3")).unwrap().position, 2);
        assert_eq!(room.queue_status(&pid("stranger")).unwrap().position, -1);

        room.close();
        assert!(matches!(
            room.queue_status(&pid("g1")),
            Err(RoomError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_release_after_close_is_not_present() {
        let room = standalone_room();
        room.admit(pid("owner"), true, sender()).await.unwrap();
        room.admit(pid("g1"), false, sender()).await.unwrap();
        assert!(room.close());
        assert!(!room.close());

        assert_eq!(room.release(&pid("g1")), Departure::NotPresent);
        assert_eq!(room.release(&pid("owner")), Departure::NotPresent);
    }

    #[tokio::test]
    async fn test_submit_after_close_is_rejected() {
        let room = standalone_room();
        room.admit(pid("owner"), true, sender()).await.unwrap();
        room.close();
        let msg = ChatMessage::now(room.id().clone(), pid("owner"), "bye".into(), None);
        assert!(!room.submit(msg).await);
    }
}
