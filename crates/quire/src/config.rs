//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use quire_room::RoomConfig;
use serde::{Deserialize, Serialize};

/// Everything needed to stand up a server over a directory of files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,
    /// Directory whose files are served as documents.
    pub root: PathBuf,
    /// Directory for update logs. `None` keeps documents in memory only
    /// and starts every room from disk.
    pub store_dir: Option<PathBuf>,
    /// How often open files are checked for out-of-band changes.
    /// `None` disables polling.
    pub poll_interval: Option<Duration>,
    /// Per-room timing and conflict policy.
    pub room: RoomConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:1234".to_string(),
            root: PathBuf::from("."),
            store_dir: None,
            poll_interval: Some(Duration::from_secs(1)),
            room: RoomConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Overlays `QUIRE_BIND`, `QUIRE_ROOT` and `QUIRE_STORE` from the
    /// environment onto the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(bind) = lookup("QUIRE_BIND") {
            config.bind = bind;
        }
        if let Some(root) = lookup("QUIRE_ROOT") {
            config.root = PathBuf::from(root);
        }
        config.store_dir = lookup("QUIRE_STORE")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "127.0.0.1:1234");
        assert!(config.store_dir.is_none());
        assert_eq!(config.poll_interval, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_env_overlay() {
        let config = ServerConfig::from_lookup(|key| match key {
            "QUIRE_BIND" => Some("0.0.0.0:9000".into()),
            "QUIRE_STORE" => Some("/var/lib/quire".into()),
            _ => None,
        });
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.root, PathBuf::from("."));
        assert_eq!(config.store_dir, Some(PathBuf::from("/var/lib/quire")));
    }

    #[test]
    fn test_empty_store_var_disables_store() {
        let config = ServerConfig::from_lookup(|key| {
            (key == "QUIRE_STORE").then(String::new)
        });
        assert!(config.store_dir.is_none());
    }
}
