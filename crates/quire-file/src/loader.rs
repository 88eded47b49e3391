//! The per-file loader shared by every room viewing a file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{ContentsManager, FileError, FileIndex, FileModel};

/// Notification sent to subscribed rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    /// The file's modification time advanced past what the loader last
    /// saw. Each room compares it with its own last-known time.
    Modified {
        /// The new modification time.
        last_modified: SystemTime,
    },
}

/// Serialized access to one file.
///
/// Every load, save and poll step runs under one async lock, so a save can
/// never interleave with a load of the same file. The loader remembers the
/// last modification time it observed; the poll task notifies subscribers
/// when the file moves past it.
pub struct FileLoader<C> {
    file_id: String,
    index: Arc<FileIndex>,
    contents: Arc<C>,
    // Last modification time observed by any operation.
    last_modified: tokio::sync::Mutex<Option<SystemTime>>,
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<FileEvent>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<C> std::fmt::Debug for FileLoader<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLoader")
            .field("file_id", &self.file_id)
            .field("subscriptions", &lock(&self.subscriptions).len())
            .finish_non_exhaustive()
    }
}

impl<C: ContentsManager> FileLoader<C> {
    /// Creates a loader for `file_id`. With a `poll_interval`, a watch task
    /// is spawned on the current runtime; it holds only a weak reference
    /// and ends on its own once the loader is dropped.
    pub fn new(
        file_id: impl Into<String>,
        index: Arc<FileIndex>,
        contents: Arc<C>,
        poll_interval: Option<Duration>,
    ) -> Arc<Self> {
        let loader = Arc::new(Self {
            file_id: file_id.into(),
            index,
            contents,
            last_modified: tokio::sync::Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            watcher: Mutex::new(None),
        });
        if let Some(interval) = poll_interval {
            let handle = tokio::spawn(watch(Arc::downgrade(&loader), interval));
            *lock(&loader.watcher) = Some(handle);
        }
        loader
    }

    /// The id of the file this loader wraps.
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Resolves the file's current path through the index.
    pub fn path(&self) -> Result<String, FileError> {
        self.index
            .get_path(&self.file_id)
            .ok_or_else(|| FileError::UnknownFileId(self.file_id.clone()))
    }

    /// Reads the file's content.
    pub async fn load_content(
        &self,
        format: &str,
        content_type: &str,
    ) -> Result<FileModel, FileError> {
        let mut last_modified = self.last_modified.lock().await;
        let path = self.path()?;
        let model = self.contents.get(&path, format, content_type, true).await?;
        *last_modified = Some(model.last_modified);
        tracing::debug!(file_id = %self.file_id, path, "file loaded");
        Ok(model)
    }

    /// Writes `model` unless the file changed on disk since
    /// `model.last_modified`.
    ///
    /// # Errors
    /// [`FileError::OutOfBandChanges`] if the modification time on disk
    /// differs; nothing is written in that case.
    pub async fn save_content(&self, model: &FileModel) -> Result<FileModel, FileError> {
        let mut last_modified = self.last_modified.lock().await;
        let path = self.path()?;
        let current = self
            .contents
            .get(&path, &model.format, &model.content_type, false)
            .await?;
        if current.last_modified != model.last_modified {
            *last_modified = Some(current.last_modified);
            tracing::warn!(file_id = %self.file_id, path, "out-of-band change, save refused");
            return Err(FileError::OutOfBandChanges);
        }
        let saved = self.contents.save(model, &path).await?;
        *last_modified = Some(saved.last_modified);
        tracing::info!(file_id = %self.file_id, path, "file saved");
        Ok(saved)
    }

    /// Writes `model` without checking for changes on disk.
    pub async fn overwrite_content(&self, model: &FileModel) -> Result<FileModel, FileError> {
        let mut last_modified = self.last_modified.lock().await;
        let path = self.path()?;
        let saved = self.contents.save(model, &path).await?;
        *last_modified = Some(saved.last_modified);
        tracing::info!(file_id = %self.file_id, path, "file overwritten");
        Ok(saved)
    }

    /// One poll step: reads the modification time and, if it advanced,
    /// notifies every subscriber. Returns whether subscribers were
    /// notified.
    pub async fn notify(&self) -> Result<bool, FileError> {
        let changed = {
            let mut last_modified = self.last_modified.lock().await;
            let path = self.path()?;
            // format and type do not matter for a metadata read
            let model = self.contents.get(&path, "text", "file", false).await?;
            let changed = matches!(*last_modified, Some(seen) if seen < model.last_modified);
            *last_modified = Some(model.last_modified);
            changed.then_some(model.last_modified)
        };

        let Some(last_modified) = changed else {
            return Ok(false);
        };
        tracing::info!(file_id = %self.file_id, "file changed on disk");
        // Subscribers reload through this loader, so the lock is released
        // before they hear about it.
        let mut subscriptions = lock(&self.subscriptions);
        subscriptions.retain(|room_id, tx| {
            let alive = tx.send(FileEvent::Modified { last_modified }).is_ok();
            if !alive {
                tracing::debug!(file_id = %self.file_id, room_id, "dropping closed subscription");
            }
            alive
        });
        Ok(true)
    }

    /// Subscribes a room to change notifications.
    pub fn observe(&self, room_id: &str, tx: mpsc::UnboundedSender<FileEvent>) {
        lock(&self.subscriptions).insert(room_id.to_string(), tx);
    }

    /// Removes a room's subscription.
    pub fn unobserve(&self, room_id: &str) {
        lock(&self.subscriptions).remove(room_id);
    }

    /// Number of subscribed rooms.
    pub fn subscription_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    /// Stops the poll task.
    pub fn clean(&self) {
        if let Some(handle) = lock(&self.watcher).take() {
            handle.abort();
            tracing::debug!(file_id = %self.file_id, "file watcher stopped");
        }
    }
}

impl<C> Drop for FileLoader<C> {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.watcher).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn watch<C: ContentsManager>(loader: Weak<FileLoader<C>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(loader) = loader.upgrade() else {
            break;
        };
        if let Err(e) = loader.notify().await {
            tracing::error!(file_id = %loader.file_id, error = %e, "error watching file");
        }
    }
}
