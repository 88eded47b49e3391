//! Room configuration and state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// What a document room does when the file changed on disk behind its
/// back while the document has unsaved edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfBandPolicy {
    /// Replace the document with the file content.
    #[default]
    ReloadFromDisk,
    /// Ask the connected clients (`FILE_CHANGED`) and apply the first
    /// answer. Falls back to reloading when nobody is connected.
    AskClients,
}

/// Timing and policy settings shared by every room of a manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Quiet period after the last edit before the document is written to
    /// disk. `None` disables saving.
    pub save_delay: Option<Duration>,

    /// How long a document room with no clients is kept before eviction.
    /// A client reconnecting within this window finds the room intact.
    pub cleanup_delay: Duration,

    /// Conflict handling for out-of-band file changes.
    pub out_of_band: OutOfBandPolicy,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            save_delay: Some(Duration::from_secs(1)),
            cleanup_delay: Duration::from_secs(60),
            out_of_band: OutOfBandPolicy::ReloadFromDisk,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// The lifecycle state of a room.
///
/// ```text
/// Created → Initializing → Ready → Stopped
/// ```
///
/// - **Created**: registered with the manager, document still empty.
/// - **Initializing**: one caller is loading the document; everyone else
///   waits on the initialization lock.
/// - **Ready**: loaded and reconciled; client edits are live.
/// - **Stopped**: evicted. Terminal, a new room is created for the id.
///
/// A failed load drops back from `Initializing` to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Created,
    Initializing,
    Ready,
    Stopped,
}

impl RoomState {
    /// Returns `true` once the document is loaded.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns `true` for the terminal state.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Returns `true` if moving to `target` is a legal transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Created, Self::Initializing)
                | (Self::Initializing, Self::Ready)
                | (Self::Initializing, Self::Created)
                | (Self::Created | Self::Initializing | Self::Ready, Self::Stopped)
        )
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_state_transitions() {
        assert!(RoomState::Created.can_transition_to(RoomState::Initializing));
        assert!(RoomState::Initializing.can_transition_to(RoomState::Ready));
        assert!(RoomState::Initializing.can_transition_to(RoomState::Created));
        assert!(RoomState::Ready.can_transition_to(RoomState::Stopped));
        assert!(!RoomState::Ready.can_transition_to(RoomState::Initializing));
        assert!(!RoomState::Stopped.can_transition_to(RoomState::Created));
        assert!(!RoomState::Stopped.can_transition_to(RoomState::Stopped));
        assert!(!RoomState::Created.can_transition_to(RoomState::Ready));
    }

    #[test]
    fn test_room_state_predicates() {
        assert!(RoomState::Ready.is_ready());
        assert!(!RoomState::Initializing.is_ready());
        assert!(RoomState::Stopped.is_stopped());
        assert_eq!(RoomState::Initializing.to_string(), "Initializing");
    }

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.save_delay, Some(Duration::from_secs(1)));
        assert_eq!(config.cleanup_delay, Duration::from_secs(60));
        assert_eq!(config.out_of_band, OutOfBandPolicy::ReloadFromDisk);
    }

    #[test]
    fn test_room_config_partial_json() {
        let config: RoomConfig =
            serde_json::from_str(r#"{"out_of_band": "ask_clients", "save_delay": null}"#).unwrap();
        assert_eq!(config.out_of_band, OutOfBandPolicy::AskClients);
        assert_eq!(config.save_delay, None);
        assert_eq!(config.cleanup_delay, Duration::from_secs(60));
    }
}
