//! Error types for the session layer.

/// Errors that can occur while identifying a client or checking its
/// session token.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the request.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The client presented a session token from an earlier incarnation
    /// of the room. Its local document cannot be merged safely.
    #[error("session {presented} expired, current session is {current}")]
    SessionExpired {
        /// The token the client sent.
        presented: String,
        /// The token the room currently holds.
        current: String,
    },
}
