//! Update logs for Quire documents.
//!
//! Every change a client makes to a document is a small binary CRDT update.
//! An [`UpdateStore`] appends those updates to a per-document log so the
//! document, including its edit history, survives the room being closed.
//!
//! ```text
//! document id ──→ session id
//!             └─→ [ update | update | update | ... ]   (append-only)
//! ```
//!
//! The session id names one unbroken history. When the server decides the
//! log no longer describes the file on disk it starts a new history under
//! a fresh session id, and clients holding the old one must reload.
//!
//! Two backends ship with the crate:
//! - [`MemoryStore`]: a `HashMap`, for tests and ephemeral servers
//! - [`FileStore`]: one file per document under a directory

mod error;
mod file;
mod memory;
mod store;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{StoredUpdate, UpdateStore, now_timestamp};
