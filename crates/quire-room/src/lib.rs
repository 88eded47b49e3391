//! Room lifecycle management for Quire.
//!
//! A room is the server-side meeting point for everyone editing one
//! document (or sharing one piece of ephemeral state). It owns the CRDT
//! document, relays updates between clients, and for documents keeps the
//! file on disk and the update log in step with the live state.
//!
//! # Key types
//!
//! - [`RoomManager`]: creates, loads and evicts rooms, one per id
//! - [`RoomHandle`]: a live room of either kind
//! - [`DocumentRoom`]: a room mirrored to a file (debounced saves,
//!   out-of-band change reconciliation)
//! - [`TransientRoom`]: a room with nothing behind it
//! - [`RoomState`]: lifecycle state machine
//! - [`RoomConfig`]: save and cleanup timing, conflict policy

mod config;
mod document;
mod error;
mod manager;
mod room;
mod shared;
mod transient;

pub use config::{OutOfBandPolicy, RoomConfig, RoomState};
pub use document::DocumentRoom;
pub use error::RoomError;
pub use manager::RoomManager;
pub use room::RoomHandle;
pub use shared::{ClientSender, DIRTY, RoomCore, SOURCE, STATE};
pub use transient::TransientRoom;
