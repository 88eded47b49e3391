//! Who is connected right now.
//!
//! A user may hold several connections at once (two browser tabs, or one
//! tab with a document room and the global awareness room). The registry
//! counts them so the user is reported as gone only when the last one
//! closes.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::User;

/// Connection counts per user.
///
/// Uses a `std::sync::Mutex`: every operation is a short map update and
/// never held across an `.await`.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: Mutex<HashMap<String, (User, usize)>>,
}

impl UserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new connection. Returns `true` if this is the user's
    /// first one.
    pub fn connect(&self, user: &User) -> bool {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let entry = users.entry(user.id.clone()).or_insert_with(|| (user.clone(), 0));
        entry.1 += 1;
        let first = entry.1 == 1;
        if first {
            tracing::info!(user = %user, "user connected");
        }
        first
    }

    /// Records a closed connection. Returns `true` if it was the user's
    /// last one.
    pub fn disconnect(&self, user: &User) -> bool {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = users.get_mut(&user.id) else {
            return false;
        };
        entry.1 = entry.1.saturating_sub(1);
        if entry.1 == 0 {
            users.remove(&user.id);
            tracing::info!(user = %user, "user disconnected");
            return true;
        }
        false
    }

    /// Returns the currently connected users, sorted by id.
    pub fn users(&self) -> Vec<User> {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<User> = users.values().map(|(u, _)| u.clone()).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Returns the number of distinct connected users.
    pub fn len(&self) -> usize {
        self.users.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns `true` when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_connections_count_once() {
        let registry = UserRegistry::new();
        let ada = User::named("ada");
        assert!(registry.connect(&ada));
        assert!(!registry.connect(&ada));
        assert_eq!(registry.len(), 1);

        assert!(!registry.disconnect(&ada));
        assert_eq!(registry.users(), vec![ada.clone()]);
        assert!(registry.disconnect(&ada));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_unknown_user_is_noop() {
        let registry = UserRegistry::new();
        assert!(!registry.disconnect(&User::named("ghost")));
    }

    #[test]
    fn test_users_sorted() {
        let registry = UserRegistry::new();
        registry.connect(&User::named("zoe"));
        registry.connect(&User::named("ada"));
        let ids: Vec<_> = registry.users().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["ada", "zoe"]);
    }
}
