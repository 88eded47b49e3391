//! [`RoomHandle`]: one type for both kinds of room.

use std::sync::Arc;
use std::time::Duration;

use quire_file::ContentsManager;
use quire_protocol::{Frame, RoomMessage};
use quire_store::UpdateStore;
use quire_transport::ConnectionId;

use crate::{ClientSender, DocumentRoom, RoomConfig, RoomCore, RoomError, RoomState, TransientRoom};

/// A live room. Cheap to clone: both variants are `Arc`s.
pub enum RoomHandle<S, C> {
    /// Mirrored to a file.
    Document(Arc<DocumentRoom<S, C>>),
    /// Ephemeral.
    Transient(Arc<TransientRoom>),
}

impl<S, C> Clone for RoomHandle<S, C> {
    fn clone(&self) -> Self {
        match self {
            Self::Document(room) => Self::Document(Arc::clone(room)),
            Self::Transient(room) => Self::Transient(Arc::clone(room)),
        }
    }
}

impl<S, C> std::fmt::Debug for RoomHandle<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Document(room) => std::fmt::Debug::fmt(room, f),
            Self::Transient(room) => std::fmt::Debug::fmt(room, f),
        }
    }
}

impl<S: UpdateStore, C: ContentsManager> RoomHandle<S, C> {
    /// Shared room state.
    pub fn core(&self) -> &RoomCore {
        match self {
            Self::Document(room) => room.core(),
            Self::Transient(room) => room.core(),
        }
    }

    /// The room id.
    pub fn room_id(&self) -> &str {
        self.core().room_id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoomState {
        self.core().state()
    }

    /// Returns `true` once the room is loaded.
    pub fn is_ready(&self) -> bool {
        self.core().is_ready()
    }

    /// The session token clients must present to resume. Transient rooms
    /// have none.
    pub fn session_id(&self) -> Option<String> {
        match self {
            Self::Document(room) => room.session_id(),
            Self::Transient(_) => None,
        }
    }

    /// Id of the out-of-band conflict awaiting an answer, if any.
    pub fn pending_conflict(&self) -> Option<String> {
        match self {
            Self::Document(room) => room.pending_conflict(),
            Self::Transient(_) => None,
        }
    }

    /// Returns `true` if both handles point at the same room object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Document(a), Self::Document(b)) => Arc::ptr_eq(a, b),
            (Self::Transient(a), Self::Transient(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// How long the room may sit empty before eviction.
    pub fn cleanup_delay(&self, config: &RoomConfig) -> Duration {
        match self {
            Self::Document(_) => config.cleanup_delay,
            Self::Transient(_) => Duration::ZERO,
        }
    }

    /// Loads the room if it is not loaded yet.
    pub async fn initialize(&self) -> Result<(), RoomError> {
        match self {
            Self::Document(room) => room.initialize().await,
            Self::Transient(room) => room.initialize(),
        }
    }

    /// Adds a client to the broadcast set.
    pub fn attach(&self, conn: ConnectionId, tx: ClientSender) {
        self.core().attach(conn, tx);
    }

    /// Removes a client; returns how many remain.
    pub fn detach(&self, conn: ConnectionId) -> usize {
        self.core().detach(conn)
    }

    /// Sends `frame` to every client except `exclude`.
    pub fn broadcast(&self, frame: &Frame, exclude: Option<ConnectionId>) {
        self.core().broadcast(frame, exclude);
    }

    /// Stops the room. Synchronous so it can run under the manager lock.
    pub fn stop(&self) {
        match self {
            Self::Document(room) => room.stop(),
            Self::Transient(room) => room.stop(),
        }
    }

    /// Spawns the room's background task.
    pub(crate) fn spawn_task(&self) -> tokio::task::JoinHandle<()> {
        match self {
            Self::Document(room) => tokio::spawn(Arc::clone(room).run()),
            Self::Transient(room) => tokio::spawn(Arc::clone(room).run()),
        }
    }

    /// Dispatches one inbound frame from `conn`, sent by the user called
    /// `sender`.
    pub async fn handle_frame(
        &self,
        conn: ConnectionId,
        sender: &str,
        frame: Frame,
    ) -> Result<(), RoomError> {
        match frame {
            Frame::Sync(msg) => match self {
                Self::Document(room) => room.handle_sync(conn, msg).await,
                Self::Transient(room) => room.core().handle_sync(conn, msg).map(|_| ()),
            },
            Frame::Awareness(update) => {
                self.core().handle_awareness(conn, update);
                Ok(())
            }
            Frame::Chat(payload) => self.core().handle_chat(conn, sender, &payload),
            Frame::Room { kind, payload } => match (self, kind) {
                (Self::Document(room), RoomMessage::Reload | RoomMessage::Overwrite) => {
                    let applied = room.answer_conflict(kind, &payload).await?;
                    if !applied {
                        tracing::debug!(room_id = %self.room_id(), %conn, conflict = %payload, "stale conflict answer ignored");
                    }
                    Ok(())
                }
                _ => {
                    tracing::debug!(room_id = %self.room_id(), %conn, ?kind, "ignoring room message");
                    Ok(())
                }
            },
        }
    }
}
