//! Stable ids for files.
//!
//! Room ids carry a file id rather than a path so that a renamed file keeps
//! its room (and its update log). The index maps ids to content-root
//! relative paths, always `/`-separated.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use quire_session::generate_token;

use crate::FileError;

#[derive(Debug, Default)]
struct Maps {
    by_id: HashMap<String, String>,
    by_path: HashMap<String, String>,
}

/// Bidirectional file id ↔ path map.
#[derive(Debug, Default)]
pub struct FileIndex {
    maps: RwLock<Maps>,
}

impl FileIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `path`, assigning a fresh one if it has none.
    pub fn index(&self, path: &str) -> String {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = maps.by_path.get(path) {
            return id.clone();
        }
        let id = generate_token();
        maps.by_id.insert(id.clone(), path.to_string());
        maps.by_path.insert(path.to_string(), id.clone());
        tracing::debug!(path, file_id = %id, "file indexed");
        id
    }

    /// Binds `path` to a caller-chosen id, replacing earlier bindings of
    /// either.
    pub fn register(&self, file_id: &str, path: &str) {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        if let Some(old_path) = maps.by_id.insert(file_id.to_string(), path.to_string()) {
            maps.by_path.remove(&old_path);
        }
        if let Some(old_id) = maps.by_path.insert(path.to_string(), file_id.to_string()) {
            if old_id != file_id {
                maps.by_id.remove(&old_id);
            }
        }
    }

    /// Returns the path indexed under `file_id`.
    pub fn get_path(&self, file_id: &str) -> Option<String> {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.by_id.get(file_id).cloned()
    }

    /// Returns the id of `path`, if indexed.
    pub fn get_id(&self, path: &str) -> Option<String> {
        let maps = self.maps.read().unwrap_or_else(|e| e.into_inner());
        maps.by_path.get(path).cloned()
    }

    /// Records that `old_path` was renamed to `new_path`. The file keeps
    /// its id. Returns `None` if `old_path` was not indexed.
    pub fn move_file(&self, old_path: &str, new_path: &str) -> Option<String> {
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        let id = maps.by_path.remove(old_path)?;
        maps.by_id.insert(id.clone(), new_path.to_string());
        maps.by_path.insert(new_path.to_string(), id.clone());
        tracing::debug!(old_path, new_path, file_id = %id, "file moved");
        Some(id)
    }

    /// Number of indexed files.
    pub fn len(&self) -> usize {
        self.maps.read().unwrap_or_else(|e| e.into_inner()).by_id.len()
    }

    /// Returns `true` if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indexes every regular file below `root`, skipping hidden entries.
    /// Returns the number of files seen.
    pub async fn index_dir(&self, root: &Path) -> Result<usize, FileError> {
        let mut pending = vec![root.to_path_buf()];
        let mut count = 0;
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                let kind = entry.file_type().await?;
                if kind.is_dir() {
                    pending.push(path);
                } else if kind.is_file() {
                    let Ok(relative) = path.strip_prefix(root) else {
                        continue;
                    };
                    let relative: Vec<_> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    self.index(&relative.join("/"));
                    count += 1;
                }
            }
        }
        tracing::info!(root = %root.display(), files = count, "content root indexed");
        Ok(count)
    }
}
