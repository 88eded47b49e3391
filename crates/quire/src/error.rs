//! Unified error type for the Quire server.

use quire_file::FileError;
use quire_protocol::ProtocolError;
use quire_room::RoomError;
use quire_session::SessionError;
use quire_store::StoreError;
use quire_transport::TransportError;

/// Top-level error that wraps every crate-specific error, so `?` works
/// across layer boundaries.
#[derive(Debug, thiserror::Error)]
pub enum QuireError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Room(#[from] RoomError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let quire_err: QuireError = err.into();
        assert!(matches!(quire_err, QuireError::Transport(_)));
        assert!(quire_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::AuthFailed("nope".into());
        let quire_err: QuireError = err.into();
        assert!(matches!(quire_err, QuireError::Session(_)));
    }

    #[test]
    fn test_from_room_error_keeps_message() {
        let err = RoomError::Stopped("text:file:f1".into());
        let quire_err: QuireError = err.into();
        assert!(matches!(quire_err, QuireError::Room(_)));
        assert!(quire_err.to_string().contains("text:file:f1"));
    }

    #[test]
    fn test_from_store_and_file_errors() {
        let store: QuireError = StoreError::DocumentNotFound("d".into()).into();
        assert!(matches!(store, QuireError::Store(_)));
        let file: QuireError = FileError::UnknownFileId("f9".into()).into();
        assert!(matches!(file, QuireError::File(_)));
    }
}
