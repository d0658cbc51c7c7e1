//! Chat rooms for Potluck.
//!
//! A room is the conversation about one listing. It seats the listing's
//! owner and one guest; further guests wait in a FIFO queue and are
//! promoted as the seat frees up. Messages submitted to a room are fanned
//! out, in order, to everyone seated by a per-room broadcast task. When
//! the owner leaves the room closes permanently.
//!
//! # Key types
//!
//! - [`RoomRegistry`] — finds or creates the room for a listing
//! - [`Room`] — seats, queue, and message submission
//! - [`OwnershipResolver`] — decides who owns a listing
//! - [`ChatHistory`] — optional message persistence
//! - [`RoomConfig`] — queue sizes

mod broadcast;
mod config;
mod error;
mod history;
mod ownership;
mod registry;
mod room;

pub use config::RoomConfig;
pub use error::{CollaboratorError, RoomError};
pub use history::{ChatHistory, MemoryHistory, NoHistory};
pub use ownership::{ListingOwners, OwnershipResolver};
pub use registry::RoomRegistry;
pub use room::{Admission, Departure, Entry, ParticipantSender, QueuedAdmission, Room, Ticket};
