//! One loader per file id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ContentsManager, FileIndex, FileLoader};

/// Hands out [`FileLoader`]s, one per file id, and reclaims them once no
/// room subscribes to them any more.
pub struct FileLoaderMapping<C> {
    loaders: Mutex<HashMap<String, Arc<FileLoader<C>>>>,
    index: Arc<FileIndex>,
    contents: Arc<C>,
    poll_interval: Option<Duration>,
}

impl<C> std::fmt::Debug for FileLoaderMapping<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLoaderMapping")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<C: ContentsManager> FileLoaderMapping<C> {
    /// Creates an empty mapping. Loaders it creates poll every
    /// `poll_interval`, or never.
    pub fn new(index: Arc<FileIndex>, contents: Arc<C>, poll_interval: Option<Duration>) -> Self {
        Self {
            loaders: Mutex::new(HashMap::new()),
            index,
            contents,
            poll_interval,
        }
    }

    fn loaders(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<FileLoader<C>>>> {
        self.loaders.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The file index loaders resolve paths through.
    pub fn index(&self) -> &Arc<FileIndex> {
        &self.index
    }

    /// Returns the loader for `file_id`, creating it on first use.
    ///
    /// Must be called from within a Tokio runtime when polling is on.
    pub fn get_or_create(&self, file_id: &str) -> Arc<FileLoader<C>> {
        let mut loaders = self.loaders();
        if let Some(loader) = loaders.get(file_id) {
            if loader.subscription_count() > 0 {
                tracing::warn!(
                    file_id,
                    "another collaborative session is accessing the same file; \
                     changes are not synchronized between rooms and may be lost"
                );
            }
            return Arc::clone(loader);
        }
        tracing::info!(file_id, path = ?self.index.get_path(file_id), "creating file loader");
        let loader = FileLoader::new(
            file_id,
            Arc::clone(&self.index),
            Arc::clone(&self.contents),
            self.poll_interval,
        );
        loaders.insert(file_id.to_string(), Arc::clone(&loader));
        loader
    }

    /// Returns `true` if a loader exists for `file_id`.
    pub fn contains(&self, file_id: &str) -> bool {
        self.loaders().contains_key(file_id)
    }

    /// Drops the loader for `file_id` if nobody subscribes to it any more.
    /// Returns whether it was dropped.
    pub fn release(&self, file_id: &str) -> bool {
        let mut loaders = self.loaders();
        let idle = loaders
            .get(file_id)
            .is_some_and(|l| l.subscription_count() == 0);
        if !idle {
            return false;
        }
        if let Some(loader) = loaders.remove(file_id) {
            loader.clean();
            tracing::info!(file_id, "file loader released");
        }
        true
    }

    /// Drops the loader for `file_id` regardless of subscribers.
    pub fn remove(&self, file_id: &str) -> Option<Arc<FileLoader<C>>> {
        let loader = self.loaders().remove(file_id)?;
        loader.clean();
        Some(loader)
    }

    /// Number of live loaders.
    pub fn len(&self) -> usize {
        self.loaders().len()
    }

    /// Returns `true` if there are no loaders.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops and drops every loader.
    pub fn clear(&self) {
        let drained: Vec<_> = self.loaders().drain().collect();
        for (_, loader) in drained {
            loader.clean();
        }
    }
}
