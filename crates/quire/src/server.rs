//! `QuireServer` builder and server loop.
//!
//! This is the entry point for running a Quire server. It ties together
//! all the layers: transport → protocol → session → room → file/store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quire_file::{ContentsManager, FileIndex, FileLoaderMapping, FsContentsManager};
use quire_room::{RoomConfig, RoomManager};
use quire_session::{Authenticator, UserRegistry};
use quire_store::{FileStore, UpdateStore};
use quire_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{QuireError, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<A, S: UpdateStore, C: ContentsManager> {
    pub(crate) rooms: RoomManager<S, C>,
    pub(crate) users: UserRegistry,
    pub(crate) auth: A,
}

/// Builder for configuring and starting a Quire server.
///
/// # Example
///
/// ```rust,ignore
/// let server = QuireServerBuilder::new()
///     .bind("0.0.0.0:1234")
///     .root("./notes")
///     .build(QueryAuthenticator)
///     .await?;
/// server.run().await
/// ```
pub struct QuireServerBuilder {
    config: ServerConfig,
}

impl QuireServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Sets the directory whose files are served.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    /// Sets the update log directory, or disables the log with `None`.
    pub fn store_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.store_dir = dir;
        self
    }

    /// Sets the file polling interval, or disables polling with `None`.
    pub fn poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets the per-room configuration.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    /// Indexes the content root, opens the update log and binds the
    /// listener.
    ///
    /// Uses [`FsContentsManager`] over the root and, when a store
    /// directory is configured, a [`FileStore`] in it.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<QuireServer<A, FileStore, FsContentsManager>, QuireError> {
        let index = FileIndex::new();
        index.index_dir(&self.config.root).await?;
        let contents = Arc::new(FsContentsManager::new(self.config.root.clone()));
        let loaders = Arc::new(FileLoaderMapping::new(
            Arc::new(index),
            contents,
            self.config.poll_interval,
        ));
        let store = match &self.config.store_dir {
            Some(dir) => Some(Arc::new(FileStore::open(dir.clone()).await?)),
            None => None,
        };
        let rooms = RoomManager::new(loaders, store, self.config.room.clone());
        self.build_with(auth, rooms).await
    }

    /// Binds the listener around an already assembled room manager.
    /// The root, store and polling settings are ignored.
    pub async fn build_with<A, S, C>(
        self,
        auth: A,
        rooms: RoomManager<S, C>,
    ) -> Result<QuireServer<A, S, C>, QuireError>
    where
        A: Authenticator,
        S: UpdateStore,
        C: ContentsManager,
    {
        let transport = WebSocketTransport::bind(&self.config.bind).await?;

        let state = Arc::new(ServerState {
            rooms,
            users: UserRegistry::new(),
            auth,
        });

        Ok(QuireServer { transport, state })
    }
}

impl Default for QuireServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Quire server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct QuireServer<A, S: UpdateStore, C: ContentsManager> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, S, C>>,
}

impl<A, S, C> QuireServer<A, S, C>
where
    A: Authenticator,
    S: UpdateStore,
    C: ContentsManager,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The room manager shared by every connection.
    pub fn rooms(&self) -> &RoomManager<S, C> {
        &self.state.rooms
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// Never returns on its own; race it against a shutdown signal and
    /// call [`RoomManager::clear`] afterwards.
    pub async fn run(mut self) -> Result<(), QuireError> {
        tracing::info!("Quire server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
