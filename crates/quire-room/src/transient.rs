//! Rooms with no file behind them.

use std::sync::Arc;

use crate::{RoomCore, RoomError, RoomState};

/// Ephemeral shared state, such as the global awareness room. Nothing in
/// it is ever written anywhere; it disappears with its last client.
#[derive(Debug)]
pub struct TransientRoom {
    core: RoomCore,
}

impl TransientRoom {
    /// Creates a transient room.
    pub fn new(room_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: RoomCore::new(room_id),
        })
    }

    /// Shared room state.
    pub fn core(&self) -> &RoomCore {
        &self.core
    }

    /// Nothing to load: moves straight to `Ready`.
    pub fn initialize(&self) -> Result<(), RoomError> {
        if self.core.is_ready() {
            return Ok(());
        }
        self.core.transition(RoomState::Initializing)?;
        self.core.transition(RoomState::Ready)
    }

    /// Background task: idles until the room stops.
    pub async fn run(self: Arc<Self>) {
        self.core.stopped().await;
        tracing::debug!(room_id = %self.core.room_id(), "transient room task ended");
    }

    /// Ends the background task.
    pub fn stop(&self) {
        if self.core.stop() {
            tracing::info!(room_id = %self.core.room_id(), "transient room stopped");
        }
    }
}
