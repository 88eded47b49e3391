//! The [`UpdateStore`] trait.

use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use yrs::updates::decoder::Decode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::StoreError;

/// One entry of an update log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpdate {
    /// v1-encoded CRDT update.
    pub update: Vec<u8>,
    /// Opaque caller-supplied bytes.
    pub metadata: Vec<u8>,
    /// Seconds since the Unix epoch at which the update was written.
    pub timestamp: f64,
}

/// Current wall-clock time as seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// An append-only, per-document log of CRDT updates.
///
/// Methods return `impl Future + Send` rather than being `async fn` so
/// rooms can call them from spawned tasks while staying generic over the
/// backend.
pub trait UpdateStore: Send + Sync + 'static {
    /// Returns `true` if a log exists for `id`.
    fn exists(&self, id: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Returns the session id of the log, or `None` if there is no log.
    fn session_id(&self, id: &str)
    -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Starts a new, empty history for `id` under `session_id`, discarding
    /// any previous one.
    fn create(
        &self,
        id: &str,
        session_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Appends one update.
    ///
    /// # Errors
    /// [`StoreError::DocumentNotFound`] if no log was created for `id`.
    fn write(
        &self,
        id: &str,
        update: &[u8],
        metadata: &[u8],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns every update of the log, oldest first.
    fn read(&self, id: &str) -> impl Future<Output = Result<Vec<StoredUpdate>, StoreError>> + Send;

    /// Deletes the log. Removing a missing log is not an error.
    fn remove(&self, id: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the ids of every stored log.
    fn list(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Replays the whole log into `doc`.
    fn apply_updates(
        &self,
        id: &str,
        doc: &Doc,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            let updates = self.read(id).await?;
            let mut txn = doc.transact_mut();
            for stored in updates {
                let update = Update::decode_v1(&stored.update)
                    .map_err(|e| StoreError::InvalidUpdate(e.to_string()))?;
                txn.apply_update(update)
                    .map_err(|e| StoreError::InvalidUpdate(e.to_string()))?;
            }
            Ok(())
        }
    }

    /// Appends the full state of `doc` as a single update (a snapshot).
    fn encode_state_as_update(
        &self,
        id: &str,
        doc: &Doc,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        async move {
            let update = doc
                .transact()
                .encode_state_as_update_v1(&StateVector::default());
            self.write(id, &update, &[]).await
        }
    }
}
