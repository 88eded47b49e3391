//! In-memory update store.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{StoreError, StoredUpdate, UpdateStore, now_timestamp};

#[derive(Debug)]
struct Log {
    session_id: String,
    updates: Vec<StoredUpdate>,
}

/// An [`UpdateStore`] backed by a `HashMap`. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: Mutex<HashMap<String, Log>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_logs<T>(&self, f: impl FnOnce(&mut HashMap<String, Log>) -> T) -> T {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut logs)
    }
}

impl UpdateStore for MemoryStore {
    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.with_logs(|logs| logs.contains_key(id)))
    }

    async fn session_id(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.with_logs(|logs| logs.get(id).map(|l| l.session_id.clone())))
    }

    async fn create(&self, id: &str, session_id: &str) -> Result<(), StoreError> {
        self.with_logs(|logs| {
            logs.insert(
                id.to_string(),
                Log {
                    session_id: session_id.to_string(),
                    updates: Vec::new(),
                },
            )
        });
        tracing::debug!(doc = id, session_id, "memory log created");
        Ok(())
    }

    async fn write(&self, id: &str, update: &[u8], metadata: &[u8]) -> Result<(), StoreError> {
        self.with_logs(|logs| {
            let log = logs
                .get_mut(id)
                .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))?;
            log.updates.push(StoredUpdate {
                update: update.to_vec(),
                metadata: metadata.to_vec(),
                timestamp: now_timestamp(),
            });
            Ok(())
        })
    }

    async fn read(&self, id: &str) -> Result<Vec<StoredUpdate>, StoreError> {
        self.with_logs(|logs| {
            logs.get(id)
                .map(|l| l.updates.clone())
                .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))
        })
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.with_logs(|logs| logs.remove(id));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.with_logs(|logs| logs.keys().cloned().collect());
        ids.sort();
        Ok(ids)
    }
}
