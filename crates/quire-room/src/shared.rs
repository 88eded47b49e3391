//! State shared by both kinds of room: the CRDT document, the attached
//! clients and the lifecycle state.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use quire_protocol::{ChatMessage, Codec, Frame, JsonCodec, SyncMessage};
use quire_store::now_timestamp;
use quire_transport::ConnectionId;
use tokio::sync::{Notify, mpsc};
use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, GetString, Map, Out, ReadTxn, StateVector, Text, Transact, Update};

use crate::{RoomError, RoomState};

/// Channel carrying encoded frames to one client's outbound pump.
pub type ClientSender = mpsc::UnboundedSender<Vec<u8>>;

/// Name of the shared text holding the file content.
pub const SOURCE: &str = "source";
/// Name of the shared map holding document metadata.
pub const STATE: &str = "state";
/// Key in [`STATE`] flagging edits not yet written to disk.
pub const DIRTY: &str = "dirty";

// v1 encoding of an update with no structs and no deletions.
const EMPTY_UPDATE: [u8; 2] = [0, 0];

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The document and the people looking at it.
pub struct RoomCore {
    room_id: String,
    doc: Doc,
    state: Mutex<RoomState>,
    clients: Mutex<HashMap<ConnectionId, ClientSender>>,
    // Last awareness update of every client, replayed to late joiners.
    awareness: Mutex<HashMap<ConnectionId, Vec<u8>>>,
    stop: Notify,
}

impl std::fmt::Debug for RoomCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomCore")
            .field("room_id", &self.room_id)
            .field("state", &self.state())
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

impl RoomCore {
    pub(crate) fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            doc: Doc::new(),
            state: Mutex::new(RoomState::Created),
            clients: Mutex::new(HashMap::new()),
            awareness: Mutex::new(HashMap::new()),
            stop: Notify::new(),
        }
    }

    /// The room id.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The CRDT document.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    // -- lifecycle ----------------------------------------------------------

    /// Current lifecycle state.
    pub fn state(&self) -> RoomState {
        *lock(&self.state)
    }

    /// Returns `true` once the document is loaded.
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Returns `true` after [`stop`](Self::stop).
    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }

    pub(crate) fn transition(&self, target: RoomState) -> Result<(), RoomError> {
        let mut state = lock(&self.state);
        if state.is_stopped() {
            return Err(RoomError::Stopped(self.room_id.clone()));
        }
        if !state.can_transition_to(target) {
            tracing::warn!(room_id = %self.room_id, from = %*state, to = %target, "illegal room transition");
            return Ok(());
        }
        *state = target;
        Ok(())
    }

    /// Marks the room stopped and wakes its background task. Idempotent.
    pub(crate) fn stop(&self) -> bool {
        let mut state = lock(&self.state);
        if state.is_stopped() {
            return false;
        }
        *state = RoomState::Stopped;
        drop(state);
        self.stop.notify_one();
        true
    }

    /// Resolves once the room is stopped.
    pub(crate) async fn stopped(&self) {
        while !self.is_stopped() {
            self.stop.notified().await;
        }
    }

    // -- clients ------------------------------------------------------------

    /// Adds a client to the broadcast set and sends it the presence of
    /// everyone already in the room.
    pub fn attach(&self, conn: ConnectionId, tx: ClientSender) {
        for (other, update) in lock(&self.awareness).iter() {
            if *other != conn {
                let _ = tx.send(Frame::Awareness(update.clone()).encode());
            }
        }
        let count = {
            let mut clients = lock(&self.clients);
            clients.insert(conn, tx);
            clients.len()
        };
        tracing::info!(room_id = %self.room_id, %conn, clients = count, "client attached");
    }

    /// Removes a client. Returns how many clients remain.
    pub fn detach(&self, conn: ConnectionId) -> usize {
        lock(&self.awareness).remove(&conn);
        let remaining = {
            let mut clients = lock(&self.clients);
            clients.remove(&conn);
            clients.len()
        };
        tracing::info!(room_id = %self.room_id, %conn, clients = remaining, "client detached");
        remaining
    }

    /// Number of attached clients.
    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Sends `frame` to every attached client except `exclude`. A client
    /// whose channel is gone is logged and skipped.
    pub fn broadcast(&self, frame: &Frame, exclude: Option<ConnectionId>) {
        let bytes = frame.encode();
        let clients = lock(&self.clients);
        for (conn, tx) in clients.iter() {
            if Some(*conn) == exclude {
                continue;
            }
            if tx.send(bytes.clone()).is_err() {
                tracing::warn!(room_id = %self.room_id, %conn, "client channel closed, frame dropped");
            }
        }
    }

    /// Sends `frame` to a single client.
    pub fn send_to(&self, conn: ConnectionId, frame: &Frame) {
        if let Some(tx) = lock(&self.clients).get(&conn) {
            if tx.send(frame.encode()).is_err() {
                tracing::warn!(room_id = %self.room_id, %conn, "client channel closed, frame dropped");
            }
        }
    }

    // -- document -----------------------------------------------------------

    /// The server's `SYNC_STEP1`: its state vector.
    pub fn sync_step1(&self) -> Frame {
        Frame::Sync(SyncMessage::Step1(self.doc.transact().state_vector()))
    }

    /// The full document state as one update.
    pub fn encode_state(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Handles a sync message from `conn`.
    ///
    /// `STEP1` is answered with the diff the client is missing. `STEP2`
    /// and `UPDATE` are merged and relayed to the other clients; the
    /// update is returned if it carried anything.
    pub fn handle_sync(
        &self,
        conn: ConnectionId,
        msg: SyncMessage,
    ) -> Result<Option<Vec<u8>>, RoomError> {
        match msg {
            SyncMessage::Step1(sv) => {
                let diff = self.doc.transact().encode_diff_v1(&sv);
                self.send_to(conn, &Frame::Sync(SyncMessage::Step2(diff)));
                Ok(None)
            }
            SyncMessage::Step2(update) | SyncMessage::Update(update) => {
                if update == EMPTY_UPDATE {
                    return Ok(None);
                }
                self.apply_update(&update)?;
                self.broadcast(
                    &Frame::Sync(SyncMessage::Update(update.clone())),
                    Some(conn),
                );
                Ok(Some(update))
            }
        }
    }

    /// Merges an encoded update into the document.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), RoomError> {
        let update =
            Update::decode_v1(update).map_err(|e| RoomError::InvalidUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| RoomError::InvalidUpdate(e.to_string()))
    }

    /// The document's text content.
    pub fn text(&self) -> String {
        let source = self.doc.get_or_insert_text(SOURCE);
        let txn = self.doc.transact();
        source.get_string(&txn)
    }

    /// Replaces the whole text. Returns the resulting update, or `None`
    /// if the content was already equal.
    pub(crate) fn replace_text(&self, content: &str) -> Option<Vec<u8>> {
        let source = self.doc.get_or_insert_text(SOURCE);
        let mut txn = self.doc.transact_mut();
        if source.get_string(&txn) == content {
            return None;
        }
        let len = source.len(&txn);
        source.remove_range(&mut txn, 0, len);
        source.insert(&mut txn, 0, content);
        Some(txn.encode_update_v1())
    }

    /// Whether the document carries edits not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        let state = self.doc.get_or_insert_map(STATE);
        let txn = self.doc.transact();
        matches!(state.get(&txn, DIRTY), Some(Out::Any(Any::Bool(true))))
    }

    /// Sets the dirty flag. Returns the resulting update, or `None` if it
    /// already had that value.
    pub(crate) fn set_dirty(&self, dirty: bool) -> Option<Vec<u8>> {
        let state = self.doc.get_or_insert_map(STATE);
        let mut txn = self.doc.transact_mut();
        let current = matches!(state.get(&txn, DIRTY), Some(Out::Any(Any::Bool(true))));
        if current == dirty {
            return None;
        }
        state.insert(&mut txn, DIRTY, dirty);
        Some(txn.encode_update_v1())
    }

    // -- awareness & chat ---------------------------------------------------

    /// Caches and relays an awareness update. Never persisted.
    pub fn handle_awareness(&self, conn: ConnectionId, update: Vec<u8>) {
        lock(&self.awareness).insert(conn, update.clone());
        self.broadcast(&Frame::Awareness(update), Some(conn));
    }

    /// Stamps a chat payload with its sender and the current time and
    /// relays it to everyone but the sender.
    pub fn handle_chat(
        &self,
        conn: ConnectionId,
        sender: &str,
        payload: &[u8],
    ) -> Result<(), RoomError> {
        let codec = JsonCodec;
        let content: serde_json::Value = codec.decode(payload)?;
        let message = ChatMessage::new(sender, now_timestamp(), content);
        self.broadcast(&Frame::Chat(codec.encode(&message)?), Some(conn));
        Ok(())
    }
}
