//! File access for Quire document rooms.
//!
//! A document room never touches the filesystem directly. It goes through
//! a [`FileLoader`], which owns the one lock and the one poll task for a
//! given file, however many rooms are looking at it:
//!
//! ```text
//! DocumentRoom ─┐
//! DocumentRoom ─┼──→ FileLoader (lock, mtime, poll) ──→ ContentsManager ──→ disk
//!               │          ↑
//!               └── FileLoaderMapping (file id → loader, refcounted)
//! ```
//!
//! - [`ContentsManager`]: reads and writes file models; [`FsContentsManager`]
//!   for a real directory, [`MemoryContentsManager`] for tests.
//! - [`FileIndex`]: stable file ids, so a room keeps pointing at the same
//!   file across renames.
//! - [`FileLoader`]: serialized load/save with modification-time checks,
//!   plus change notifications for subscribed rooms.
//! - [`FileLoaderMapping`]: one loader per file id, reclaimed when its
//!   last subscriber leaves.

mod contents;
mod error;
mod index;
mod loader;
mod mapping;

pub use contents::{ContentsManager, FileModel, FsContentsManager, MemoryContentsManager};
pub use error::FileError;
pub use index::FileIndex;
pub use loader::{FileEvent, FileLoader};
pub use mapping::FileLoaderMapping;
