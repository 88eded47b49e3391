//! Error types for the room layer.

use quire_file::FileError;
use quire_protocol::ProtocolError;
use quire_store::StoreError;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room was stopped (evicted) and cannot be used any more.
    #[error("room {0} is stopped")]
    Stopped(String),

    /// A client sent a CRDT update the engine could not decode or apply.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// Malformed frame, payload or room id.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Loading or saving the backing file failed.
    #[error(transparent)]
    File(#[from] FileError),

    /// Reading or writing the update log failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RoomError {
    /// Returns `true` if the room's backing file does not exist.
    pub fn is_file_not_found(&self) -> bool {
        matches!(
            self,
            Self::File(FileError::NotFound(_) | FileError::UnknownFileId(_))
        )
    }
}
