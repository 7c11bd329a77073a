use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::Room;
use crate::models::{ConnectionId, UserId};
use crate::protocol::ServerEvent;

/// Outbound queue of one connection.
pub type EventSender = mpsc::Sender<ServerEvent>;

struct ConnectionHandle {
    user: Option<UserId>,
    tx: EventSender,
    rooms: HashSet<Room>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
}

impl HubInner {
    fn join(&mut self, conn: ConnectionId, room: Room) -> bool {
        let Some(handle) = self.connections.get_mut(&conn) else {
            return false;
        };
        if !handle.rooms.insert(room.clone()) {
            return false;
        }
        self.rooms.entry(room).or_default().insert(conn);
        true
    }

    fn leave(&mut self, conn: ConnectionId, room: &Room) -> bool {
        let Some(handle) = self.connections.get_mut(&conn) else {
            return false;
        };
        if !handle.rooms.remove(room) {
            return false;
        }
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
        true
    }

    fn sessions_of(&self, user: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(&Room::Personal(user.to_string()))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Connection handles and room subscriptions.
///
/// The lock is never held across an await; delivery uses `try_send` so a
/// slow client only loses its own events.
#[derive(Default)]
pub struct RoomHub {
    inner: RwLock<HubInner>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection that has not authenticated yet.
    pub fn attach(&self, conn: ConnectionId, tx: EventSender) {
        self.inner.write().connections.insert(
            conn,
            ConnectionHandle {
                user: None,
                tx,
                rooms: HashSet::new(),
            },
        );
    }

    /// Bind an identity to a connection and subscribe it to the personal room.
    pub fn bind_user(&self, conn: ConnectionId, user: &UserId) -> bool {
        let mut inner = self.inner.write();
        match inner.connections.get_mut(&conn) {
            Some(handle) => handle.user = Some(user.clone()),
            None => return false,
        }
        inner.join(conn, Room::Personal(user.clone()));
        true
    }

    /// Drop a connection and all of its subscriptions.
    pub fn detach(&self, conn: ConnectionId) {
        let mut inner = self.inner.write();
        let rooms: Vec<Room> = match inner.connections.get(&conn) {
            Some(handle) => handle.rooms.iter().cloned().collect(),
            None => return,
        };
        for room in &rooms {
            inner.leave(conn, room);
        }
        inner.connections.remove(&conn);
    }

    /// Subscribe a connection. Idempotent; returns whether it was newly joined.
    pub fn join(&self, conn: ConnectionId, room: Room) -> bool {
        self.inner.write().join(conn, room)
    }

    /// Subscribe every live session of `user`. Returns the number newly joined.
    pub fn join_user(&self, user: &str, room: Room) -> usize {
        let mut inner = self.inner.write();
        inner
            .sessions_of(user)
            .into_iter()
            .filter(|conn| inner.join(*conn, room.clone()))
            .count()
    }

    pub fn leave_user(&self, user: &str, room: &Room) -> usize {
        let mut inner = self.inner.write();
        inner
            .sessions_of(user)
            .into_iter()
            .filter(|conn| inner.leave(*conn, room))
            .count()
    }

    pub fn is_subscribed(&self, conn: ConnectionId, room: &Room) -> bool {
        self.inner
            .read()
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&conn))
    }

    pub fn subscribers(&self, room: &Room) -> Vec<ConnectionId> {
        self.inner
            .read()
            .rooms
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send to a single connection.
    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.read();
        match inner.connections.get(&conn) {
            Some(handle) => deliver(conn, &handle.tx, event),
            None => false,
        }
    }

    /// Fan out to every subscriber of `room`. Returns the number of connections reached.
    pub fn emit(&self, room: &Room, event: ServerEvent) -> usize {
        self.emit_rooms(std::slice::from_ref(room), event, None)
    }

    /// Fan out to `room`, skipping every session of `user`.
    pub fn emit_except_user(&self, room: &Room, event: ServerEvent, user: &str) -> usize {
        self.emit_rooms(std::slice::from_ref(room), event, Some(user))
    }

    /// Fan out to the union of `rooms`; a connection subscribed to several
    /// of them still receives the event once.
    pub fn emit_rooms(&self, rooms: &[Room], event: ServerEvent, except_user: Option<&str>) -> usize {
        let inner = self.inner.read();
        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for room in rooms {
            match inner.rooms.get(room) {
                Some(members) => targets.extend(members.iter().copied()),
                None => debug!("[Hub] No subscribers in {}", room),
            }
        }
        targets
            .into_iter()
            .filter_map(|conn| inner.connections.get(&conn).map(|h| (conn, h)))
            .filter(|(_, handle)| except_user.is_none() || handle.user.as_deref() != except_user)
            .filter(|(conn, handle)| deliver(*conn, &handle.tx, event.clone()))
            .count()
    }

    /// Send to all authenticated connections not owned by `user`.
    pub fn broadcast_except_user(&self, event: ServerEvent, user: &str) -> usize {
        let inner = self.inner.read();
        inner
            .connections
            .iter()
            .filter(|(_, handle)| matches!(handle.user.as_deref(), Some(u) if u != user))
            .filter(|(conn, handle)| deliver(**conn, &handle.tx, event.clone()))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }
}

fn deliver(conn: ConnectionId, tx: &EventSender, event: ServerEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("[Hub] Outbound queue full for {}, dropping event", conn);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("[Hub] Connection {} already closed", conn);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &RoomHub, user: Option<&str>) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(16);
        hub.attach(conn, tx);
        if let Some(user) = user {
            hub.bind_user(conn, &user.to_string());
        }
        (conn, rx)
    }

    fn ping() -> ServerEvent {
        ServerEvent::Pong
    }

    #[test]
    fn test_join_is_idempotent() {
        let hub = RoomHub::new();
        let (conn, _rx) = connect(&hub, Some("alice"));
        let room = Room::Group("g1".into());

        assert!(hub.join(conn, room.clone()));
        assert!(!hub.join(conn, room.clone()));
        assert_eq!(hub.subscribers(&room).len(), 1);
    }

    #[test]
    fn test_emit_except_user_skips_all_sessions() {
        let hub = RoomHub::new();
        let (a1, mut a1_rx) = connect(&hub, Some("alice"));
        let (a2, mut a2_rx) = connect(&hub, Some("alice"));
        let (b, mut b_rx) = connect(&hub, Some("bob"));
        let room = Room::Group("g1".into());
        for conn in [a1, a2, b] {
            hub.join(conn, room.clone());
        }

        assert_eq!(hub.emit_except_user(&room, ping(), "alice"), 1);
        assert!(b_rx.try_recv().is_ok());
        assert!(a1_rx.try_recv().is_err());
        assert!(a2_rx.try_recv().is_err());
    }

    #[test]
    fn test_personal_room_reaches_every_session() {
        let hub = RoomHub::new();
        let (_a1, mut a1_rx) = connect(&hub, Some("alice"));
        let (_a2, mut a2_rx) = connect(&hub, Some("alice"));

        assert_eq!(hub.emit(&Room::Personal("alice".into()), ping()), 2);
        assert!(a1_rx.try_recv().is_ok());
        assert!(a2_rx.try_recv().is_ok());
    }

    #[test]
    fn test_join_user_and_detach() {
        let hub = RoomHub::new();
        let (a1, _a1_rx) = connect(&hub, Some("alice"));
        let (a2, _a2_rx) = connect(&hub, Some("alice"));
        let room = Room::Group("g1".into());

        assert_eq!(hub.join_user("alice", room.clone()), 2);
        assert_eq!(hub.join_user("alice", room.clone()), 0);

        hub.detach(a1);
        assert_eq!(hub.subscribers(&room), vec![a2]);
        assert_eq!(hub.leave_user("alice", &room), 1);
        assert!(hub.subscribers(&room).is_empty());
    }

    #[test]
    fn test_emit_rooms_delivers_once() {
        let hub = RoomHub::new();
        let (a, mut a_rx) = connect(&hub, Some("alice"));
        let (_b, mut b_rx) = connect(&hub, Some("bob"));
        let dyadic = Room::dyadic("alice", "bob");
        hub.join(a, dyadic.clone());

        let rooms = [
            Room::Personal("alice".into()),
            Room::Personal("bob".into()),
            dyadic,
        ];
        assert_eq!(hub.emit_rooms(&rooms, ping(), None), 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());

        assert_eq!(hub.emit_rooms(&rooms, ping(), Some("alice")), 1);
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_skips_anonymous_and_self() {
        let hub = RoomHub::new();
        let (_anon, mut anon_rx) = connect(&hub, None);
        let (_a, mut a_rx) = connect(&hub, Some("alice"));
        let (_b, mut b_rx) = connect(&hub, Some("bob"));

        assert_eq!(hub.broadcast_except_user(ping(), "alice"), 1);
        assert!(b_rx.try_recv().is_ok());
        assert!(a_rx.try_recv().is_err());
        assert!(anon_rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let hub = RoomHub::new();
        let conn = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(1);
        hub.attach(conn, tx);

        assert!(hub.send_to(conn, ping()));
        assert!(!hub.send_to(conn, ping()));
    }
}
