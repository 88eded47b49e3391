//! Wire protocol for Quire.
//!
//! This crate defines the "language" that collaboration clients and the
//! server speak:
//!
//! - **Types** ([`Frame`], [`SyncMessage`], [`RoomMessage`],
//!   [`ChatMessage`], [`RoomKind`]): the frames that travel on the wire
//!   and how room ids are classified.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how structured payloads
//!   are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Frame) → Room (CRDT document, clients)
//! ```
//!
//! The protocol layer doesn't know about connections or rooms; it only
//! knows how to turn bytes into frames and back.

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ChatMessage, DocumentPath, Frame, MessageType, RoomKind, RoomMessage, SyncMessage,
    close_code,
};
