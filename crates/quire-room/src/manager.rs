//! Room manager: the registry of live rooms.
//!
//! One lock guards three maps that must change together:
//!
//! ```text
//! rooms    room id → RoomHandle
//! tasks    room id → background task
//! cleanups room id → pending eviction
//! ```
//!
//! The lock is only ever held for map updates and synchronous room calls.
//! Loading a document, which waits on room-local locks and disk I/O,
//! always happens after it is released.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use quire_file::{ContentsManager, FileLoaderMapping};
use quire_protocol::RoomKind;
use quire_store::UpdateStore;
use quire_transport::ConnectionId;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::{ClientSender, DocumentRoom, RoomConfig, RoomError, RoomHandle, TransientRoom};

// A room evicted between loading and attaching is retried this often.
const JOIN_ATTEMPTS: usize = 3;

struct Registry<S, C> {
    rooms: HashMap<String, RoomHandle<S, C>>,
    tasks: HashMap<String, JoinHandle<()>>,
    cleanups: HashMap<String, JoinHandle<()>>,
}

struct Inner<S, C> {
    registry: Mutex<Registry<S, C>>,
    loaders: Arc<FileLoaderMapping<C>>,
    store: Option<Arc<S>>,
    config: RoomConfig,
}

/// Creates, hands out and evicts rooms.
///
/// Cheap to clone: every clone shares the same registry.
pub struct RoomManager<S, C> {
    inner: Arc<Inner<S, C>>,
}

impl<S, C> Clone for RoomManager<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, C> std::fmt::Debug for RoomManager<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<S: UpdateStore, C: ContentsManager> RoomManager<S, C> {
    /// Creates a manager. Document rooms share `loaders` and log to
    /// `store`, if given.
    pub fn new(
        loaders: Arc<FileLoaderMapping<C>>,
        store: Option<Arc<S>>,
        config: RoomConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    rooms: HashMap::new(),
                    tasks: HashMap::new(),
                    cleanups: HashMap::new(),
                }),
                loaders,
                store,
                config,
            }),
        }
    }

    /// The room configuration.
    pub fn config(&self) -> &RoomConfig {
        &self.inner.config
    }

    /// The file loaders shared by document rooms.
    pub fn loaders(&self) -> &Arc<FileLoaderMapping<C>> {
        &self.inner.loaders
    }

    /// Returns the room for `room_id`, creating and loading it if needed.
    ///
    /// Concurrent callers for the same id get the same room, and it is
    /// loaded once. A pending eviction of the room is cancelled.
    ///
    /// # Errors
    /// A malformed document room id, or a failed load. A room that fails
    /// to load is evicted before the error is returned.
    pub async fn get_room(&self, room_id: &str) -> Result<RoomHandle<S, C>, RoomError> {
        let room = {
            let mut registry = self.inner.registry.lock().await;
            if let Some(cleanup) = registry.cleanups.remove(room_id) {
                cleanup.abort();
                tracing::debug!(room_id, "pending eviction cancelled");
            }
            match registry.rooms.get(room_id) {
                Some(room) => room.clone(),
                None => {
                    let room = self.create_room(room_id)?;
                    let task = room.spawn_task();
                    registry.rooms.insert(room_id.to_string(), room.clone());
                    registry.tasks.insert(room_id.to_string(), task);
                    tracing::info!(room_id, "room created");
                    room
                }
            }
        };

        if let Err(e) = room.initialize().await {
            tracing::error!(room_id, error = %e, "room initialization failed");
            self.evict_if_current(&room).await;
            return Err(e);
        }
        Ok(room)
    }

    fn create_room(&self, room_id: &str) -> Result<RoomHandle<S, C>, RoomError> {
        let room = match RoomKind::parse(room_id)? {
            RoomKind::Document(path) => {
                let loader = self.inner.loaders.get_or_create(&path.file_id);
                RoomHandle::Document(DocumentRoom::new(
                    room_id,
                    path,
                    loader,
                    self.inner.store.clone(),
                    self.inner.config.clone(),
                ))
            }
            RoomKind::Transient => RoomHandle::Transient(TransientRoom::new(room_id)),
        };
        Ok(room)
    }

    /// [`get_room`](Self::get_room), then attaches `conn` to it. The attach
    /// happens under the manager lock, so the room cannot be evicted
    /// between loading and attaching.
    pub async fn join(
        &self,
        room_id: &str,
        conn: ConnectionId,
        tx: ClientSender,
    ) -> Result<RoomHandle<S, C>, RoomError> {
        for _ in 0..JOIN_ATTEMPTS {
            let room = self.get_room(room_id).await?;
            let mut registry = self.inner.registry.lock().await;
            let current = registry
                .rooms
                .get(room_id)
                .is_some_and(|r| r.ptr_eq(&room));
            if current {
                if let Some(cleanup) = registry.cleanups.remove(room_id) {
                    cleanup.abort();
                }
                room.attach(conn, tx);
                return Ok(room);
            }
            tracing::debug!(room_id, %conn, "room evicted before attach, retrying");
        }
        Err(RoomError::Stopped(room_id.to_string()))
    }

    /// Detaches `conn`; when the room becomes empty its eviction is
    /// scheduled (immediately for transient rooms) and any unanswered
    /// conflict is settled by reloading the file.
    pub async fn leave(&self, room: &RoomHandle<S, C>, conn: ConnectionId) {
        if room.detach(conn) == 0 {
            if let RoomHandle::Document(doc) = room {
                if let Err(e) = doc.abandon_conflict().await {
                    tracing::error!(room_id = %room.room_id(), error = %e, "failed to settle abandoned conflict");
                }
            }
            let delay = room.cleanup_delay(&self.inner.config);
            self.remove_room(room.room_id(), delay).await;
        }
    }

    /// Schedules eviction of `room_id` after `delay`. Scheduling a room
    /// that is already scheduled, or unknown, does nothing.
    pub async fn remove_room(&self, room_id: &str, delay: Duration) {
        let mut registry = self.inner.registry.lock().await;
        if !registry.rooms.contains_key(room_id) || registry.cleanups.contains_key(room_id) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let id = room_id.to_string();
        let cleanup = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            evict_scheduled(weak, &id).await;
        });
        registry.cleanups.insert(room_id.to_string(), cleanup);
        tracing::debug!(room_id, ?delay, "room eviction scheduled");
    }

    async fn evict_if_current(&self, room: &RoomHandle<S, C>) {
        let task = {
            let mut registry = self.inner.registry.lock().await;
            let current = registry
                .rooms
                .get(room.room_id())
                .is_some_and(|r| r.ptr_eq(room));
            if !current {
                return;
            }
            if let Some(cleanup) = registry.cleanups.remove(room.room_id()) {
                cleanup.abort();
            }
            evict_locked(&self.inner, &mut registry, room.room_id())
        };
        join_task(task).await;
    }

    /// Stops and evicts every room, then drops every file loader.
    pub async fn clear(&self) {
        let tasks: Vec<_> = {
            let mut registry = self.inner.registry.lock().await;
            for (_, cleanup) in registry.cleanups.drain() {
                cleanup.abort();
            }
            let ids: Vec<String> = registry.rooms.keys().cloned().collect();
            ids.iter()
                .filter_map(|id| evict_locked(&self.inner, &mut registry, id))
                .collect()
        };
        for task in tasks {
            join_task(Some(task)).await;
        }
        self.inner.loaders.clear();
        tracing::info!("all rooms cleared");
    }

    /// Returns `true` if a room is registered under `room_id`.
    pub async fn has_room(&self, room_id: &str) -> bool {
        self.inner.registry.lock().await.rooms.contains_key(room_id)
    }

    /// Returns the registered room without creating or loading it.
    pub async fn room(&self, room_id: &str) -> Option<RoomHandle<S, C>> {
        self.inner.registry.lock().await.rooms.get(room_id).cloned()
    }

    /// Number of registered rooms.
    pub async fn room_count(&self) -> usize {
        self.inner.registry.lock().await.rooms.len()
    }

    /// Ids of every registered room, sorted.
    pub async fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .registry
            .lock()
            .await
            .rooms
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Returns `true` if an eviction is pending for `room_id`.
    pub async fn is_eviction_pending(&self, room_id: &str) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .cleanups
            .contains_key(room_id)
    }
}

/// Body of a scheduled eviction, after its delay elapsed.
async fn evict_scheduled<S: UpdateStore, C: ContentsManager>(inner: Weak<Inner<S, C>>, room_id: &str) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let task = {
        let mut registry = inner.registry.lock().await;
        // Gone means a reattach cancelled us while we waited for the lock.
        if registry.cleanups.remove(room_id).is_none() {
            return;
        }
        let in_use = registry
            .rooms
            .get(room_id)
            .is_some_and(|room| room.core().client_count() > 0);
        if in_use {
            tracing::debug!(room_id, "room in use again, eviction skipped");
            return;
        }
        evict_locked(&inner, &mut registry, room_id)
    };
    join_task(task).await;
}

/// Drops a room from the registry and releases its file loader. Must be
/// called with the registry locked; returns the background task to await
/// once the lock is released.
fn evict_locked<S: UpdateStore, C: ContentsManager>(
    inner: &Inner<S, C>,
    registry: &mut Registry<S, C>,
    room_id: &str,
) -> Option<JoinHandle<()>> {
    let room = registry.rooms.remove(room_id)?;
    room.stop();
    if let RoomHandle::Document(doc) = &room {
        inner.loaders.release(doc.file_id());
    }
    tracing::info!(room_id, "room evicted");
    registry.tasks.remove(room_id)
}

async fn join_task(task: Option<JoinHandle<()>>) {
    let Some(task) = task else {
        return;
    };
    if let Err(e) = task.await {
        if !e.is_cancelled() {
            tracing::error!(error = %e, "room task panicked");
        }
    }
}
