use std::sync::Arc;
use tracing::info;

use super::registry::SessionRegistry;
use crate::models::{ConnectionId, UserId};
use crate::protocol::ServerEvent;
use crate::rooms::RoomHub;

/// Derives presence from the registry and announces transitions.
///
/// Presence events are liveness hints: best effort, no acknowledgement.
pub struct PresenceTracker {
    registry: Arc<SessionRegistry>,
    hub: Arc<RoomHub>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<SessionRegistry>, hub: Arc<RoomHub>) -> Self {
        Self { registry, hub }
    }

    /// Record a new session, seed it with the online set and announce the
    /// user if this is their first session.
    pub fn connected(&self, user_id: &UserId, conn: ConnectionId) {
        let registration = self.registry.register(user_id, conn);
        if !registration.existing.is_empty() {
            info!(
                "[Presence] {} opened another session ({} already live)",
                user_id,
                registration.existing.len()
            );
        }

        self.hub.send_to(
            conn,
            ServerEvent::OnlineUsers {
                users: self.registry.online_users(),
            },
        );

        if registration.came_online {
            info!("[Presence] {} is online", user_id);
            self.hub.broadcast_except_user(
                ServerEvent::UserOnline {
                    user_id: user_id.clone(),
                },
                user_id,
            );
        }
    }

    /// Drop a session; announce the user if it was their last one.
    pub fn disconnected(&self, user_id: &UserId, conn: ConnectionId) {
        if self.registry.unregister(user_id, conn) {
            info!("[Presence] {} is offline", user_id);
            self.hub.broadcast_except_user(
                ServerEvent::UserOffline {
                    user_id: user_id.clone(),
                },
                user_id,
            );
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.registry.is_online(user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.registry.online_users()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn tracker() -> (PresenceTracker, Arc<RoomHub>) {
        let hub = Arc::new(RoomHub::new());
        let tracker = PresenceTracker::new(Arc::new(SessionRegistry::new()), hub.clone());
        (tracker, hub)
    }

    fn open(hub: &RoomHub, user: &str) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(16);
        hub.attach(conn, tx);
        hub.bind_user(conn, &user.to_string());
        (conn, rx)
    }

    #[test]
    fn test_transitions_are_announced_once() {
        let (tracker, hub) = tracker();
        let alice = "alice".to_string();
        let bob = "bob".to_string();

        let (b, mut b_rx) = open(&hub, "bob");
        tracker.connected(&bob, b);
        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerEvent::OnlineUsers {
                users: vec!["bob".into()]
            }
        );

        let (a1, mut a1_rx) = open(&hub, "alice");
        tracker.connected(&alice, a1);
        assert_eq!(
            a1_rx.try_recv().unwrap(),
            ServerEvent::OnlineUsers {
                users: vec!["alice".into(), "bob".into()]
            }
        );
        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerEvent::UserOnline {
                user_id: "alice".into()
            }
        );

        // A second tab is not a presence transition.
        let (a2, _a2_rx) = open(&hub, "alice");
        tracker.connected(&alice, a2);
        assert!(b_rx.try_recv().is_err());

        tracker.disconnected(&alice, a1);
        assert!(b_rx.try_recv().is_err());
        assert!(tracker.is_online("alice"));

        tracker.disconnected(&alice, a2);
        assert_eq!(
            b_rx.try_recv().unwrap(),
            ServerEvent::UserOffline {
                user_id: "alice".into()
            }
        );
        assert!(!tracker.is_online("alice"));
    }
}
