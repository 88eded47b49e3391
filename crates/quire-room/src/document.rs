//! Rooms backed by a file on disk and an optional update log.
//!
//! A `DocumentRoom` keeps three copies of the same document in step:
//!
//! ```text
//!   clients ⇄ CRDT document ─→ update log  (every update, immediately)
//!                     │
//!                     └──────→ file on disk (debounced, mtime-checked)
//! ```
//!
//! Writes the room makes itself (reloading from disk, clearing the dirty
//! flag) are broadcast and logged like any other update but never
//! schedule a save.

use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use quire_file::{ContentsManager, FileError, FileEvent, FileLoader, FileModel};
use quire_protocol::{DocumentPath, Frame, RoomMessage, SyncMessage};
use quire_session::generate_token;
use quire_store::UpdateStore;
use quire_transport::ConnectionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::shared::lock;
use crate::{OutOfBandPolicy, RoomConfig, RoomCore, RoomError, RoomState};

/// A room mirrored to a file.
pub struct DocumentRoom<S, C> {
    core: RoomCore,
    path: DocumentPath,
    loader: Arc<FileLoader<C>>,
    store: Option<Arc<S>>,
    config: RoomConfig,
    this: Weak<Self>,
    // Collapses concurrent first openers into one load.
    init_lock: tokio::sync::Mutex<()>,
    // Serializes saves, reloads and conflict answers.
    update_lock: tokio::sync::Mutex<()>,
    session_id: Mutex<Option<String>>,
    last_modified: Mutex<Option<SystemTime>>,
    save_task: Mutex<Option<JoinHandle<()>>>,
    pending_conflict: Mutex<Option<String>>,
    file_events: Mutex<Option<mpsc::UnboundedReceiver<FileEvent>>>,
}

impl<S, C> std::fmt::Debug for DocumentRoom<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRoom")
            .field("core", &self.core)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<S: UpdateStore, C: ContentsManager> DocumentRoom<S, C> {
    /// Creates a room for `path` and subscribes it to the loader's change
    /// notifications.
    pub fn new(
        room_id: impl Into<String>,
        path: DocumentPath,
        loader: Arc<FileLoader<C>>,
        store: Option<Arc<S>>,
        config: RoomConfig,
    ) -> Arc<Self> {
        let room_id = room_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        loader.observe(&room_id, tx);
        Arc::new_cyclic(|this| Self {
            core: RoomCore::new(room_id),
            path,
            loader,
            store,
            config,
            this: this.clone(),
            init_lock: tokio::sync::Mutex::new(()),
            update_lock: tokio::sync::Mutex::new(()),
            session_id: Mutex::new(None),
            last_modified: Mutex::new(None),
            save_task: Mutex::new(None),
            pending_conflict: Mutex::new(None),
            file_events: Mutex::new(Some(rx)),
        })
    }

    /// Shared room state.
    pub fn core(&self) -> &RoomCore {
        &self.core
    }

    /// The file this room is bound to.
    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    /// The id of the file this room is bound to.
    pub fn file_id(&self) -> &str {
        &self.path.file_id
    }

    /// The current session token. `None` until initialized.
    pub fn session_id(&self) -> Option<String> {
        lock(&self.session_id).clone()
    }

    /// Modification time of the file as last read or written by this room.
    pub fn last_modified(&self) -> Option<SystemTime> {
        *lock(&self.last_modified)
    }

    /// The id of the out-of-band conflict awaiting a client answer.
    pub fn pending_conflict(&self) -> Option<String> {
        lock(&self.pending_conflict).clone()
    }

    // -- initialization -----------------------------------------------------

    /// Loads the document. Idempotent; concurrent callers wait for the
    /// first one and then return without loading again.
    ///
    /// # Errors
    /// [`RoomError::Stopped`] on a stopped room, or whatever the file or
    /// store reported. The room is left un-initialized on error.
    pub async fn initialize(&self) -> Result<(), RoomError> {
        let _init = self.init_lock.lock().await;
        if self.core.is_ready() {
            return Ok(());
        }
        self.core.transition(RoomState::Initializing)?;
        match self.load().await {
            Ok(()) => {
                self.core.transition(RoomState::Ready)?;
                tracing::info!(room_id = %self.core.room_id(), "room ready");
                Ok(())
            }
            Err(e) => {
                let _ = self.core.transition(RoomState::Created);
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<(), RoomError> {
        let model = self
            .loader
            .load_content(&self.path.format, &self.path.content_type)
            .await?;
        let content = model.content.unwrap_or_default();

        let _guard = self.update_lock.lock().await;
        let session = match &self.store {
            Some(store) => self.reconcile_with_store(store, &content).await?,
            None => {
                self.core.replace_text(&content);
                self.core.set_dirty(false);
                generate_token()
            }
        };
        *lock(&self.session_id) = Some(session);
        *lock(&self.last_modified) = Some(model.last_modified);
        Ok(())
    }

    /// Decides between the update log and the file. Returns the session
    /// id the room continues under.
    async fn reconcile_with_store(&self, store: &S, content: &str) -> Result<String, RoomError> {
        let id = self.core.room_id();
        let doc = self.core.doc();

        if !store.exists(id).await? {
            self.core.replace_text(content);
            self.core.set_dirty(false);
            let session = generate_token();
            store.create(id, &session).await?;
            store.encode_state_as_update(id, doc).await?;
            tracing::info!(room_id = %id, "document seeded from disk");
            return Ok(session);
        }

        store.apply_updates(id, doc).await?;
        if self.core.text() == content {
            if let Some(update) = self.core.set_dirty(false) {
                store.write(id, &update, &[]).await?;
            }
            let session = match store.session_id(id).await? {
                Some(session) => session,
                None => generate_token(),
            };
            tracing::info!(room_id = %id, "document restored from update log");
            return Ok(session);
        }

        // The file was edited while no room had it open.
        tracing::warn!(room_id = %id, "file differs from update log, resetting history from disk");
        self.core.replace_text(content);
        self.core.set_dirty(false);
        let session = generate_token();
        store.create(id, &session).await?;
        store.encode_state_as_update(id, doc).await?;
        Ok(session)
    }

    // -- client edits -------------------------------------------------------

    /// Handles a sync message from `conn`; updates are logged and schedule
    /// a save.
    pub async fn handle_sync(&self, conn: ConnectionId, msg: SyncMessage) -> Result<(), RoomError> {
        let Some(update) = self.core.handle_sync(conn, msg)? else {
            return Ok(());
        };
        self.log_update(&update).await;
        let dirty = self.core.set_dirty(true);
        self.internal_change(dirty).await;
        self.schedule_save();
        Ok(())
    }

    async fn log_update(&self, update: &[u8]) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.write(self.core.room_id(), update, &[]).await {
            tracing::error!(room_id = %self.core.room_id(), error = %e, "failed to log update");
        }
    }

    /// Publishes a change the room made itself.
    async fn internal_change(&self, update: Option<Vec<u8>>) {
        let Some(update) = update else {
            return;
        };
        self.core
            .broadcast(&Frame::Sync(SyncMessage::Update(update.clone())), None);
        self.log_update(&update).await;
    }

    // -- saving -------------------------------------------------------------

    /// Restarts the debounce timer. When it fires, the save runs in its own
    /// task so that a later restart cannot cut a write short.
    pub fn schedule_save(&self) {
        let Some(delay) = self.config.save_delay else {
            return;
        };
        if self.core.is_stopped() {
            return;
        }
        let this = self.this.clone();
        let mut slot = lock(&self.save_task);
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(room) = this.upgrade() else {
                return;
            };
            let save = tokio::spawn(async move { room.save().await });
            if let Err(e) = save.await {
                tracing::error!(error = %e, "save task failed");
            }
        }));
    }

    fn cancel_save(&self) {
        if let Some(task) = lock(&self.save_task).take() {
            task.abort();
        }
    }

    /// Writes the document to disk unless the file changed underneath, in
    /// which case the change is reconciled instead.
    pub async fn save(&self) {
        let room_id = self.core.room_id();
        if self.pending_conflict().is_some() {
            tracing::debug!(room_id, "save suspended while a conflict is pending");
            return;
        }
        let _guard = self.update_lock.lock().await;
        if self.core.is_stopped() {
            return;
        }
        let Some(last_modified) = self.last_modified() else {
            return;
        };
        let model = FileModel::with_content(
            &self.path.format,
            &self.path.content_type,
            self.core.text(),
            last_modified,
        );
        match self.loader.save_content(&model).await {
            Ok(saved) => {
                *lock(&self.last_modified) = Some(saved.last_modified);
                let clean = self.core.set_dirty(false);
                self.internal_change(clean).await;
                tracing::info!(room_id, "document saved");
            }
            Err(FileError::OutOfBandChanges) => {
                tracing::warn!(room_id, "file changed on disk during save");
                if let Err(e) = self.resolve_out_of_band().await {
                    tracing::error!(room_id, error = %e, "failed to reconcile out-of-band change");
                }
            }
            Err(e) => tracing::error!(room_id, error = %e, "failed to save document"),
        }
    }

    // -- out-of-band changes ------------------------------------------------

    /// Must be called with the update lock held.
    async fn resolve_out_of_band(&self) -> Result<(), RoomError> {
        let ask = self.config.out_of_band == OutOfBandPolicy::AskClients
            && self.core.is_dirty()
            && self.core.client_count() > 0;
        if !ask {
            return self.reload_locked().await;
        }
        let conflict = {
            let mut pending = lock(&self.pending_conflict);
            if pending.is_some() {
                return Ok(());
            }
            let id = generate_token();
            *pending = Some(id.clone());
            id
        };
        tracing::info!(room_id = %self.core.room_id(), conflict = %conflict, "asking clients to resolve conflict");
        self.core
            .broadcast(&Frame::room(RoomMessage::FileChanged, conflict), None);
        Ok(())
    }

    /// Must be called with the update lock held.
    async fn reload_locked(&self) -> Result<(), RoomError> {
        self.cancel_save();
        let model = self
            .loader
            .load_content(&self.path.format, &self.path.content_type)
            .await?;
        *lock(&self.last_modified) = Some(model.last_modified);
        let replaced = self
            .core
            .replace_text(model.content.as_deref().unwrap_or_default());
        self.internal_change(replaced).await;
        let clean = self.core.set_dirty(false);
        self.internal_change(clean).await;
        tracing::info!(room_id = %self.core.room_id(), "document reloaded from disk");
        Ok(())
    }

    async fn overwrite_locked(&self) -> Result<(), RoomError> {
        self.cancel_save();
        let model = FileModel::with_content(
            &self.path.format,
            &self.path.content_type,
            self.core.text(),
            self.last_modified().unwrap_or(SystemTime::UNIX_EPOCH),
        );
        let saved = self.loader.overwrite_content(&model).await?;
        *lock(&self.last_modified) = Some(saved.last_modified);
        let clean = self.core.set_dirty(false);
        self.internal_change(clean).await;
        tracing::info!(room_id = %self.core.room_id(), "file overwritten with document");
        Ok(())
    }

    /// Applies a client's answer to a pending conflict. Only the first
    /// answer carrying the current conflict id has an effect; returns
    /// whether this one did.
    pub async fn answer_conflict(&self, answer: RoomMessage, conflict: &str) -> Result<bool, RoomError> {
        let reply = match answer {
            RoomMessage::Reload => RoomMessage::DocOverwritten,
            RoomMessage::Overwrite => RoomMessage::FileOverwritten,
            _ => return Ok(false),
        };
        let _guard = self.update_lock.lock().await;
        {
            let mut pending = lock(&self.pending_conflict);
            if pending.as_deref() != Some(conflict) {
                return Ok(false);
            }
            pending.take();
        }
        match answer {
            RoomMessage::Reload => self.reload_locked().await?,
            _ => self.overwrite_locked().await?,
        }
        self.core.broadcast(&Frame::room(reply, conflict), None);
        Ok(true)
    }

    /// Settles a conflict nobody is left to answer by reloading the file,
    /// as if a client had answered `RELOAD`. Returns whether a conflict
    /// was pending.
    pub async fn abandon_conflict(&self) -> Result<bool, RoomError> {
        let Some(conflict) = self.pending_conflict() else {
            return Ok(false);
        };
        tracing::info!(room_id = %self.core.room_id(), %conflict, "conflict abandoned, reloading from disk");
        self.answer_conflict(RoomMessage::Reload, &conflict).await
    }

    async fn on_file_event(&self, event: FileEvent) {
        let FileEvent::Modified { last_modified } = event;
        if !self.core.is_ready() {
            return;
        }
        let _guard = self.update_lock.lock().await;
        if self.last_modified().is_some_and(|known| known >= last_modified) {
            return;
        }
        tracing::info!(room_id = %self.core.room_id(), "out-of-band change detected");
        if let Err(e) = self.resolve_out_of_band().await {
            tracing::error!(room_id = %self.core.room_id(), error = %e, "failed to reconcile out-of-band change");
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// Background task: reacts to file change notifications until the room
    /// stops.
    pub async fn run(self: Arc<Self>) {
        let Some(mut events) = lock(&self.file_events).take() else {
            return;
        };
        loop {
            tokio::select! {
                _ = self.core.stopped() => break,
                event = events.recv() => match event {
                    Some(event) => self.on_file_event(event).await,
                    None => break,
                },
            }
        }
        tracing::debug!(room_id = %self.core.room_id(), "document room task ended");
    }

    /// Cancels the pending save, drops the file subscription and ends the
    /// background task.
    pub fn stop(&self) {
        if !self.core.stop() {
            return;
        }
        self.cancel_save();
        self.loader.unobserve(self.core.room_id());
        tracing::info!(room_id = %self.core.room_id(), "document room stopped");
    }
}
