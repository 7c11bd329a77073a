use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::models::{ConnectionId, UserId};

/// One live connection bound to an authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub connected_at: DateTime<Utc>,
}

/// Result of registering a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The user had no session before this one.
    pub came_online: bool,
    /// Sessions the user already held. They stay live.
    pub existing: Vec<ConnectionId>,
}

/// Maps identities to their live sessions. A user may hold several.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<UserId, HashMap<ConnectionId, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &UserId, connection_id: ConnectionId) -> Registration {
        let mut sessions = self.sessions.write();
        let entry = sessions.entry(user_id.clone()).or_default();
        let existing: Vec<ConnectionId> = entry
            .keys()
            .copied()
            .filter(|c| *c != connection_id)
            .collect();
        let came_online = entry.is_empty();
        entry.insert(
            connection_id,
            Session {
                connection_id,
                user_id: user_id.clone(),
                connected_at: Utc::now(),
            },
        );
        Registration {
            came_online,
            existing,
        }
    }

    /// Remove exactly this connection. A stale disconnect never evicts a
    /// different session. Returns true when the user went offline.
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut sessions = self.sessions.write();
        let Some(entry) = sessions.get_mut(user_id) else {
            return false;
        };
        if entry.remove(&connection_id).is_none() {
            return false;
        }
        if entry.is_empty() {
            sessions.remove(user_id);
            return true;
        }
        false
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.sessions.read().contains_key(user_id)
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        self.sessions
            .read()
            .get(user_id)
            .map(|entry| entry.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Sorted list of identities with at least one session.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.sessions.read().keys().cloned().collect();
        users.sort();
        users
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().values().map(HashMap::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_iff_registered() {
        let registry = SessionRegistry::new();
        let alice = "alice".to_string();
        let c1 = ConnectionId::new();

        assert!(!registry.is_online(&alice));
        let reg = registry.register(&alice, c1);
        assert!(reg.came_online);
        assert!(registry.is_online(&alice));

        assert!(registry.unregister(&alice, c1));
        assert!(!registry.is_online(&alice));
        assert!(registry.online_users().is_empty());
    }

    #[test]
    fn test_second_device_keeps_first() {
        let registry = SessionRegistry::new();
        let alice = "alice".to_string();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());

        registry.register(&alice, c1);
        let reg = registry.register(&alice, c2);
        assert!(!reg.came_online);
        assert_eq!(reg.existing, vec![c1]);
        assert_eq!(registry.session_count(), 2);

        assert!(!registry.unregister(&alice, c1));
        assert!(registry.is_online(&alice));
        assert_eq!(registry.connections_of(&alice), vec![c2]);
    }

    #[test]
    fn test_stale_disconnect_is_ignored() {
        let registry = SessionRegistry::new();
        let alice = "alice".to_string();
        let live = ConnectionId::new();
        registry.register(&alice, live);

        assert!(!registry.unregister(&alice, ConnectionId::new()));
        assert!(!registry.unregister("nobody", live));
        assert!(registry.is_online(&alice));
        assert_eq!(registry.connections_of(&alice), vec![live]);
    }

    #[test]
    fn test_reregister_same_connection() {
        let registry = SessionRegistry::new();
        let alice = "alice".to_string();
        let c1 = ConnectionId::new();
        registry.register(&alice, c1);
        let again = registry.register(&alice, c1);
        assert!(!again.came_online);
        assert!(again.existing.is_empty());
        assert_eq!(registry.session_count(), 1);
    }
}
