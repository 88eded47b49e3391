//! Content managers: the lowest layer, turning paths into file models.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::FileError;

/// A file as seen by a room: its tags, optionally its content, and the
/// modification time the content corresponds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModel {
    /// Content encoding (`text`, `json`).
    pub format: String,
    /// Document kind (`file`, `notebook`).
    pub content_type: String,
    /// The file content, `None` for metadata-only models.
    pub content: Option<String>,
    /// Modification time on disk.
    pub last_modified: SystemTime,
}

impl FileModel {
    /// A model carrying `content`, to be saved over a file last seen at
    /// `last_modified`.
    pub fn with_content(
        format: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<String>,
        last_modified: SystemTime,
    ) -> Self {
        Self {
            format: format.into(),
            content_type: content_type.into(),
            content: Some(content.into()),
            last_modified,
        }
    }
}

fn check_format(format: &str) -> Result<(), FileError> {
    match format {
        "text" | "json" => Ok(()),
        other => Err(FileError::UnsupportedFormat(other.to_string())),
    }
}

/// Reads and writes files by path.
pub trait ContentsManager: Send + Sync + 'static {
    /// Returns the model of the file at `path`. With `content == false`
    /// only the metadata is read.
    ///
    /// # Errors
    /// [`FileError::NotFound`] if there is no such file.
    fn get(
        &self,
        path: &str,
        format: &str,
        content_type: &str,
        content: bool,
    ) -> impl Future<Output = Result<FileModel, FileError>> + Send;

    /// Writes `model.content` to `path`, returning the new metadata.
    fn save(
        &self,
        model: &FileModel,
        path: &str,
    ) -> impl Future<Output = Result<FileModel, FileError>> + Send;
}

// ---------------------------------------------------------------------------
// FsContentsManager
// ---------------------------------------------------------------------------

/// Serves files below a root directory.
///
/// Writes go to a hidden sibling file first and are then renamed over the
/// target, so readers never observe a half-written file.
#[derive(Debug, Clone)]
pub struct FsContentsManager {
    root: PathBuf,
}

impl FsContentsManager {
    /// Serves files below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, FileError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(FileError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ContentsManager for FsContentsManager {
    async fn get(
        &self,
        path: &str,
        format: &str,
        content_type: &str,
        content: bool,
    ) -> Result<FileModel, FileError> {
        check_format(format)?;
        let full = self.resolve(path)?;
        let meta = match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(FileError::NotFound(path.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileError::NotFound(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let content = if content {
            let bytes = tokio::fs::read(&full).await?;
            Some(String::from_utf8(bytes).map_err(|_| FileError::NotUtf8(path.to_string()))?)
        } else {
            None
        };
        Ok(FileModel {
            format: format.to_string(),
            content_type: content_type.to_string(),
            content,
            last_modified: meta.modified()?,
        })
    }

    async fn save(&self, model: &FileModel, path: &str) -> Result<FileModel, FileError> {
        check_format(&model.format)?;
        let full = self.resolve(path)?;
        let name = full
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileError::InvalidPath(path.to_string()))?;
        let tmp = full.with_file_name(format!(".{name}.quire-tmp"));

        tokio::fs::write(&tmp, model.content.as_deref().unwrap_or_default()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &full).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        let meta = tokio::fs::metadata(&full).await?;
        tracing::debug!(path, "file written");
        Ok(FileModel {
            format: model.format.clone(),
            content_type: model.content_type.clone(),
            content: None,
            last_modified: meta.modified()?,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryContentsManager
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemoryState {
    files: HashMap<String, (String, SystemTime)>,
    clock: SystemTime,
}

/// Keeps files in a map. Every write gets a strictly later modification
/// time than the one before, which makes out-of-band edits deterministic
/// in tests.
#[derive(Debug)]
pub struct MemoryContentsManager {
    state: Mutex<MemoryState>,
    loads: AtomicUsize,
    saves: AtomicUsize,
}

impl Default for MemoryContentsManager {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                files: HashMap::new(),
                clock: SystemTime::UNIX_EPOCH,
            }),
            loads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
        }
    }
}

impl MemoryContentsManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self, path: &str, content: &str) -> SystemTime {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = SystemTime::now().max(state.clock + Duration::from_millis(1));
        state.clock = now;
        state.files.insert(path.to_string(), (content.to_string(), now));
        now
    }

    /// Writes a file behind every loader's back, as an external editor
    /// would. Returns the new modification time.
    pub fn write_external(&self, path: &str, content: &str) -> SystemTime {
        self.write(path, content)
    }

    /// Returns the current content of a file.
    pub fn content(&self, path: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.files.get(path).map(|(c, _)| c.clone())
    }

    /// Number of `get` calls that read content.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ContentsManager for MemoryContentsManager {
    async fn get(
        &self,
        path: &str,
        format: &str,
        content_type: &str,
        content: bool,
    ) -> Result<FileModel, FileError> {
        check_format(format)?;
        let (text, last_modified) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| FileError::NotFound(path.to_string()))?
        };
        if content {
            self.loads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(FileModel {
            format: format.to_string(),
            content_type: content_type.to_string(),
            content: content.then_some(text),
            last_modified,
        })
    }

    async fn save(&self, model: &FileModel, path: &str) -> Result<FileModel, FileError> {
        check_format(&model.format)?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        let last_modified = self.write(path, model.content.as_deref().unwrap_or_default());
        Ok(FileModel {
            format: model.format.clone(),
            content_type: model.content_type.clone(),
            content: None,
            last_modified,
        })
    }
}
