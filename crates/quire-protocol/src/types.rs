//! Core protocol types: the frames that travel on the wire.
//!
//! Every frame is a binary WebSocket message whose first byte selects the
//! message type:
//!
//! ```text
//! ┌──────┬──────────────────────────────────────────────────────┐
//! │ 0    │ SYNC       var-uint step, var-bytes payload          │
//! │ 1    │ AWARENESS  var-bytes awareness update                │
//! │ 124  │ ROOM       u8 sub-type, var-string payload           │
//! │ 125  │ CHAT       var-bytes JSON                            │
//! └──────┴──────────────────────────────────────────────────────┘
//! ```
//!
//! SYNC, AWARENESS and CHAT go through [`yrs::sync::Message`], so stock
//! Yjs providers can talk to the server unchanged. CHAT is a custom
//! message. ROOM puts its sub-type byte before the length prefix, which
//! `Message::Custom` cannot express, so it is framed by hand with the
//! same lib0 primitives.

use std::fmt;

use serde::{Deserialize, Serialize};
use yrs::StateVector;
use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;
use yrs::sync::{Message, SyncMessage as YSyncMessage};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// WebSocket close codes the server uses to tell clients why it hung up.
pub mod close_code {
    /// The client's session token no longer matches the room: it must
    /// fully reload instead of resuming.
    pub const SESSION_EXPIRED: u16 = 1003;
    /// The document's backing file does not exist.
    pub const FILE_NOT_FOUND: u16 = 1004;
    /// The room id could not be parsed or the client was not authorized.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Loading the document failed on the server side.
    pub const INITIALIZATION_FAILED: u16 = 1011;
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The one-byte tag at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// CRDT document synchronization.
    Sync = 0,
    /// Ephemeral presence (cursors, user names). Never persisted.
    Awareness = 1,
    /// Room control: conflict resolution and session tokens.
    Room = 124,
    /// Chat between the clients of a room.
    Chat = 125,
}

impl TryFrom<u64> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sync),
            1 => Ok(Self::Awareness),
            124 => Ok(Self::Room),
            125 => Ok(Self::Chat),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncMessage
// ---------------------------------------------------------------------------

/// The three steps of the Yjs sync protocol.
///
/// A peer opens with `Step1` (its state vector); the other side answers
/// with `Step2` (everything the first peer is missing). After that, both
/// sides push incremental `Update`s.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// State vector of the sender.
    Step1(StateVector),
    /// Encoded update answering a `Step1`.
    Step2(Vec<u8>),
    /// Encoded incremental update.
    Update(Vec<u8>),
}

impl SyncMessage {
    // Highest step number y-protocols defines.
    const LAST_STEP: u64 = 2;
}

impl From<YSyncMessage> for SyncMessage {
    fn from(msg: YSyncMessage) -> Self {
        match msg {
            YSyncMessage::SyncStep1(sv) => Self::Step1(sv),
            YSyncMessage::SyncStep2(update) => Self::Step2(update),
            YSyncMessage::Update(update) => Self::Update(update),
        }
    }
}

impl From<SyncMessage> for YSyncMessage {
    fn from(msg: SyncMessage) -> Self {
        match msg {
            SyncMessage::Step1(sv) => Self::SyncStep1(sv),
            SyncMessage::Step2(update) => Self::SyncStep2(update),
            SyncMessage::Update(update) => Self::Update(update),
        }
    }
}

// ---------------------------------------------------------------------------
// RoomMessage
// ---------------------------------------------------------------------------

/// Sub-type byte of a [`MessageType::Room`] frame.
///
/// Conflict resolution is a small request/response dance keyed by a
/// conflict id:
///
/// ```text
/// server ── FILE_CHANGED(id) ──→ clients
/// client ── RELOAD(id) | OVERWRITE(id) ──→ server   (first answer wins)
/// server ── DOC_OVERWRITTEN(id) | FILE_OVERWRITTEN(id) ──→ clients
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoomMessage {
    /// Client → Server: replace the document with the file on disk.
    Reload = 0,
    /// Client → Server: write the document over the file on disk.
    Overwrite = 1,
    /// Server → Client: the file changed outside the room.
    FileChanged = 2,
    /// Server → Client: the conflict was resolved by writing the file.
    FileOverwritten = 3,
    /// Server → Client: the conflict was resolved by reloading the file.
    DocOverwritten = 4,
    /// Server → Client: the room's current session token.
    SessionToken = 5,
}

impl TryFrom<u8> for RoomMessage {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Reload),
            1 => Ok(Self::Overwrite),
            2 => Ok(Self::FileChanged),
            3 => Ok(Self::FileOverwritten),
            4 => Ok(Self::DocOverwritten),
            5 => Ok(Self::SessionToken),
            other => Err(ProtocolError::UnknownRoomMessage(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Document synchronization.
    Sync(SyncMessage),
    /// A v1-encoded awareness update. Validated on decode, otherwise
    /// relayed as is.
    Awareness(Vec<u8>),
    /// A room-control message. `payload` is the conflict id or the
    /// session token, depending on `kind`.
    Room {
        /// Which control message this is.
        kind: RoomMessage,
        /// Conflict id or session token.
        payload: String,
    },
    /// Raw JSON chat payload.
    Chat(Vec<u8>),
}

impl Frame {
    /// Returns the message type of this frame.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Sync(_) => MessageType::Sync,
            Self::Awareness(_) => MessageType::Awareness,
            Self::Room { .. } => MessageType::Room,
            Self::Chat(_) => MessageType::Chat,
        }
    }

    /// Shorthand for a room-control frame.
    pub fn room(kind: RoomMessage, payload: impl Into<String>) -> Self {
        Self::Room {
            kind,
            payload: payload.into(),
        }
    }

    /// Decodes one frame.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] if the frame is empty, truncated, or
    /// carries an unknown type.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let Some(&tag) = data.first() else {
            return Err(ProtocolError::EmptyFrame);
        };
        match MessageType::try_from(u64::from(tag))? {
            MessageType::Room => Self::decode_room(data),
            MessageType::Sync => {
                let mut cursor = Cursor::new(&data[1..]);
                let step: u64 = cursor.read_var()?;
                if step > SyncMessage::LAST_STEP {
                    return Err(ProtocolError::UnknownSyncType(step));
                }
                Self::from_message(tag, Message::decode_v1(data)?)
            }
            MessageType::Awareness | MessageType::Chat => {
                Self::from_message(tag, Message::decode_v1(data)?)
            }
        }
    }

    fn decode_room(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut cursor = Cursor::new(data);
        cursor.read_u8()?;
        let kind = RoomMessage::try_from(cursor.read_u8()?)?;
        let payload = cursor.read_string()?.to_owned();
        Ok(Self::Room { kind, payload })
    }

    fn from_message(tag: u8, msg: Message) -> Result<Self, ProtocolError> {
        match msg {
            Message::Sync(sync) => Ok(Self::Sync(sync.into())),
            Message::Awareness(update) => Ok(Self::Awareness(update.encode_v1())),
            Message::Custom(custom, json) if custom == MessageType::Chat as u8 => {
                Ok(Self::Chat(json))
            }
            _ => Err(ProtocolError::UnknownMessageType(u64::from(tag))),
        }
    }

    /// Encodes this frame into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Sync(msg) => Message::Sync(msg.clone().into()).encode_v1(),
            Self::Awareness(update) => {
                let mut buf = Vec::with_capacity(update.len() + 4);
                buf.write_u8(MessageType::Awareness as u8);
                buf.write_buf(update);
                buf
            }
            Self::Room { kind, payload } => {
                let mut buf = Vec::with_capacity(payload.len() + 4);
                buf.write_u8(MessageType::Room as u8);
                buf.write_u8(*kind as u8);
                buf.write_string(payload);
                buf
            }
            Self::Chat(json) => Message::Custom(MessageType::Chat as u8, json.clone()).encode_v1(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// A chat message as fanned out by the server.
///
/// Clients send only `content`; the server stamps `sender` and
/// `timestamp` (seconds since the Unix epoch) before relaying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the sending user.
    pub sender: String,
    /// Seconds since the Unix epoch, with sub-second precision.
    pub timestamp: f64,
    /// Whatever JSON the client sent.
    pub content: serde_json::Value,
}

impl ChatMessage {
    /// Creates a stamped chat message.
    pub fn new(sender: impl Into<String>, timestamp: f64, content: serde_json::Value) -> Self {
        Self {
            sender: sender.into(),
            timestamp,
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// Room ids
// ---------------------------------------------------------------------------

/// The file a document room is bound to, parsed from a room id of the
/// form `{format}:{contentType}:{fileId}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
    /// How the file content is encoded (`text`, `json`).
    pub format: String,
    /// What kind of document this is (`file`, `notebook`).
    pub content_type: String,
    /// Stable id of the file, resolved to a path by the file index.
    pub file_id: String,
}

impl DocumentPath {
    /// Creates a document path from its parts.
    pub fn new(
        format: impl Into<String>,
        content_type: impl Into<String>,
        file_id: impl Into<String>,
    ) -> Self {
        Self {
            format: format.into(),
            content_type: content_type.into(),
            file_id: file_id.into(),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.format, self.content_type, self.file_id)
    }
}

/// What kind of room a room id denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomKind {
    /// A room mirrored to a file on disk.
    Document(DocumentPath),
    /// Ephemeral shared state (e.g. global awareness).
    Transient,
}

impl RoomKind {
    /// Classifies a room id. Ids with at least two `:` separators are
    /// document rooms; the file id keeps any further colons.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidRoomId`] for a document-shaped id
    /// with an empty component.
    pub fn parse(room_id: &str) -> Result<Self, ProtocolError> {
        let mut parts = room_id.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(format), Some(content_type), Some(file_id)) => {
                if format.is_empty() || content_type.is_empty() || file_id.is_empty() {
                    return Err(ProtocolError::InvalidRoomId(room_id.to_string()));
                }
                Ok(Self::Document(DocumentPath::new(format, content_type, file_id)))
            }
            _ => Ok(Self::Transient),
        }
    }

    /// Returns `true` for document rooms.
    pub fn is_document(&self) -> bool {
        matches!(self, Self::Document(_))
    }
}

// =========================================================================
// Tests
// =========================================================================
