//! Error types for the protocol layer.
//!
//! Everything that can go wrong while turning bytes into a [`Frame`]
//! (or a room id into a [`RoomKind`]) ends up here. A `ProtocolError`
//! always means the *peer* sent something malformed; it never indicates
//! a server-side fault.
//!
//! [`Frame`]: crate::Frame
//! [`RoomKind`]: crate::RoomKind

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A zero-length frame was received.
    #[error("empty frame")]
    EmptyFrame,

    /// Byte 0 of the frame is not a known message type.
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),

    /// A sync frame carried an unknown sync step.
    #[error("unknown sync message type {0}")]
    UnknownSyncType(u64),

    /// Byte 1 of a room-control frame is not a known sub-type.
    #[error("unknown room message type {0}")]
    UnknownRoomMessage(u8),

    /// The frame is truncated or a lib0 field inside it is invalid.
    #[error("malformed frame: {0}")]
    Malformed(#[from] yrs::encoding::read::Error),

    /// Serializing a JSON payload failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Parsing a JSON payload failed.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The room id has the document shape but a missing component.
    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),
}
