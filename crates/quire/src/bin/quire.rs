//! `quire` binary: serves a directory of files as collaborative documents.
//!
//! Configured through `QUIRE_BIND`, `QUIRE_ROOT` and `QUIRE_STORE`; log
//! verbosity through `RUST_LOG` (default `info`). Ctrl-C stops every
//! open room before exiting.

use quire::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), QuireError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(
        bind = %config.bind,
        root = %config.root.display(),
        store = ?config.store_dir,
        "starting quire"
    );

    let server = QuireServerBuilder::new()
        .config(config)
        .build(QueryAuthenticator)
        .await?;
    let rooms = server.rooms().clone();

    let result = tokio::select! {
        result = server.run() => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down");
            Ok(())
        }
    };
    rooms.clear().await;
    result
}
