//! # Quire
//!
//! Collaborative document rooms over WebSocket.
//!
//! Every WebSocket URL names a room. Rooms whose id looks like
//! `{format}:{contentType}:{fileId}` hold a CRDT document bound to a file
//! on disk; anything else is a transient room that only relays awareness
//! and chat between its clients.
//!
//! ```text
//!   client ──ws──▶ handler ──▶ RoomManager ──▶ DocumentRoom ──▶ FileLoader ──▶ disk
//!                                                   │
//!                                                   └──▶ UpdateStore (update log)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quire::prelude::*;
//!
//! # async fn run() -> Result<(), QuireError> {
//! let server = QuireServerBuilder::new()
//!     .bind("0.0.0.0:1234")
//!     .root("./notes")
//!     .store_dir(Some("./.quire".into()))
//!     .build(QueryAuthenticator)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::QuireError;
pub use server::{QuireServer, QuireServerBuilder};

/// Re-exports of the types most servers and tests need.
pub mod prelude {
    pub use crate::{QuireError, QuireServer, QuireServerBuilder, ServerConfig};
    pub use quire_file::{
        ContentsManager, FileIndex, FileLoaderMapping, FsContentsManager, MemoryContentsManager,
    };
    pub use quire_protocol::{Frame, RoomKind, RoomMessage, SyncMessage, close_code};
    pub use quire_room::{OutOfBandPolicy, RoomConfig, RoomHandle, RoomManager, RoomState};
    pub use quire_session::{Authenticator, QueryAuthenticator, SessionError, User};
    pub use quire_store::{FileStore, MemoryStore, UpdateStore};
}
