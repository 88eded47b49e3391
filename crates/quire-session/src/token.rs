//! Session tokens.
//!
//! A document room's session token changes whenever the server throws away
//! the room's update history (for example when the file was edited on disk
//! while nobody had it open). Clients remember the token they were handed
//! and present it when they reconnect; a mismatch means their local copy
//! descends from history the server no longer has.

use rand::Rng;

use crate::SessionError;

/// Generates a random 128-bit token as 32 lowercase hex characters.
///
/// Used for session ids, conflict ids and file ids.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Checks a client-presented session token against the room's current one.
///
/// A client that presents nothing is connecting fresh and is always
/// accepted, as is any client when the room has no session (transient
/// rooms).
///
/// # Errors
/// Returns [`SessionError::SessionExpired`] on mismatch.
pub fn validate_session(current: Option<&str>, presented: Option<&str>) -> Result<(), SessionError> {
    match (current, presented) {
        (Some(current), Some(presented)) if current != presented => {
            tracing::debug!(current, presented, "stale session token");
            Err(SessionError::SessionExpired {
                presented: presented.to_string(),
                current: current.to_string(),
            })
        }
        _ => Ok(()),
    }
}
