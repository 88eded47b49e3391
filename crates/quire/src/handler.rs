//! Per-connection handler: auth, room join, session check and message
//! pumps.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Resolve the room id from the last URL path segment
//!   2. Authenticate the upgrade request → get a `User`
//!   3. Join the room (loading it on first use) or close with a code
//!   4. Check the client's `sessionId` against the room's session
//!   5. Send SESSION_TOKEN and the server's SYNC step 1
//!   6. Pump: socket → room and room channel → socket, until either ends

use std::sync::Arc;

use quire_file::ContentsManager;
use quire_protocol::{Frame, RoomKind, RoomMessage, close_code};
use quire_room::{RoomError, RoomHandle};
use quire_session::{Authenticator, User, validate_session};
use quire_store::UpdateStore;
use quire_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::QuireError;
use crate::server::ServerState;

/// Close reasons travel in a control frame, which caps them at 123 bytes.
const MAX_CLOSE_REASON: usize = 123;

/// Drop guard that unregisters the user's connection when the handler
/// exits, panics included.
struct PresenceGuard<A, S: UpdateStore, C: ContentsManager> {
    user: User,
    state: Arc<ServerState<A, S, C>>,
}

impl<A, S: UpdateStore, C: ContentsManager> Drop for PresenceGuard<A, S, C> {
    fn drop(&mut self) {
        if self.state.users.disconnect(&self.user) {
            tracing::info!(user = %self.user, "user left");
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, S, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, S, C>>,
) -> Result<(), QuireError>
where
    A: Authenticator,
    S: UpdateStore,
    C: ContentsManager,
{
    let conn_id = conn.id();

    // --- Step 1: Room id ---
    let Some(room_id) = conn.request().last_segment().map(str::to_string) else {
        close(&conn, close_code::POLICY_VIOLATION, "missing room id").await?;
        return Ok(());
    };
    tracing::debug!(%conn_id, %room_id, "handling new connection");

    // --- Step 2: Authentication ---
    let user = match state.auth.authenticate(conn.request()).await {
        Ok(user) => user,
        Err(e) => {
            close(&conn, close_code::POLICY_VIOLATION, &e.to_string()).await?;
            return Err(e.into());
        }
    };
    if state.users.connect(&user) {
        tracing::info!(user = %user, "user joined");
    }
    let guard = PresenceGuard {
        user,
        state: Arc::clone(&state),
    };

    // --- Step 3: Join ---
    let (tx, mut rx) = mpsc::unbounded_channel();
    let room = match state.rooms.join(&room_id, conn_id, tx.clone()).await {
        Ok(room) => room,
        Err(e) => {
            let (code, reason) = close_reason(&state, &room_id, &e);
            tracing::error!(%conn_id, %room_id, code, error = %e, "closing connection");
            close(&conn, code, &reason).await?;
            return Err(e.into());
        }
    };

    // --- Step 4: Session check ---
    let session = room.session_id();
    let presented = conn.request().query_param("sessionId");
    if validate_session(session.as_deref(), presented).is_err() {
        tracing::info!(%conn_id, %room_id, ?presented, "stale document session");
        state.rooms.leave(&room, conn_id).await;
        let reason = format!(
            "Document session {} expired. You need to reload this browser tab.",
            presented.unwrap_or_default()
        );
        close(&conn, close_code::SESSION_EXPIRED, &reason).await?;
        return Ok(());
    }

    // --- Step 5: Greeting ---
    // Queued behind anything already broadcast to this client.
    if let Some(session) = session {
        let _ = tx.send(Frame::room(RoomMessage::SessionToken, session).encode());
    }
    let _ = tx.send(room.core().sync_step1().encode());
    if let Some(conflict) = room.pending_conflict() {
        let _ = tx.send(Frame::room(RoomMessage::FileChanged, conflict).encode());
    }
    drop(tx);
    tracing::info!(%conn_id, %room_id, user = %guard.user, "client attached");

    // --- Step 6: Pumps ---
    let outbound = async {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = conn.send(&bytes).await {
                tracing::debug!(%conn_id, error = %e, "send failed");
                break;
            }
        }
    };
    let inbound = receive_loop(&conn, &room, &guard.user);

    tokio::select! {
        _ = outbound => {}
        _ = inbound => {}
    }

    state.rooms.leave(&room, conn_id).await;
    tracing::info!(%conn_id, %room_id, "client detached");
    Ok(())
}

/// Reads frames until the socket closes and hands each to the room.
async fn receive_loop<S, C>(conn: &WebSocketConnection, room: &RoomHandle<S, C>, user: &User)
where
    S: UpdateStore,
    C: ContentsManager,
{
    let conn_id = conn.id();
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        };

        let frame = match Frame::decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "dropping undecodable frame");
                continue;
            }
        };

        if let Err(e) = room.handle_frame(conn_id, &user.display_name, frame).await {
            tracing::warn!(%conn_id, room_id = %room.room_id(), error = %e, "frame rejected");
        }
    }
}

/// Maps a failed join onto a close code and a reason for the client.
fn close_reason<A, S, C>(
    state: &ServerState<A, S, C>,
    room_id: &str,
    err: &RoomError,
) -> (u16, String)
where
    S: UpdateStore,
    C: ContentsManager,
{
    let path = match RoomKind::parse(room_id) {
        Ok(RoomKind::Document(path)) => state
            .rooms
            .loaders()
            .index()
            .get_path(&path.file_id)
            .unwrap_or(path.file_id),
        _ => room_id.to_string(),
    };
    if err.is_file_not_found() {
        return (close_code::FILE_NOT_FOUND, format!("File {path} not found."));
    }
    match err {
        RoomError::Protocol(e) => (close_code::POLICY_VIOLATION, e.to_string()),
        _ => (
            close_code::INITIALIZATION_FAILED,
            format!("Error initializing: {path}. You need to close the document."),
        ),
    }
}

async fn close(conn: &WebSocketConnection, code: u16, reason: &str) -> Result<(), QuireError> {
    conn.close(code, truncate(reason, MAX_CLOSE_REASON)).await?;
    Ok(())
}

/// Cuts `text` to at most `max` bytes on a char boundary.
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
