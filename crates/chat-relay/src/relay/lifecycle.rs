use tracing::{debug, info, warn};

use super::Relay;
use crate::auth::Handshake;
use crate::error::{RelayError, Result};
use crate::models::{ConnectionId, UserId};
use crate::protocol::ServerEvent;
use crate::rooms::{dyadic_counterpart, EventSender, Room};

impl Relay {
    /// Register a freshly accepted transport connection.
    pub fn open(&self, tx: EventSender) -> ConnectionId {
        let conn = ConnectionId::new();
        self.hub.attach(conn, tx);
        debug!("[Relay] Connection {} opened", conn);
        conn
    }

    /// Verify the handshake token and, on success, bring the session online.
    pub async fn handshake(&self, conn: ConnectionId, token: Option<&str>) -> Handshake {
        let handshake = Handshake::perform(self.auth.as_ref(), token).await;
        match &handshake {
            Handshake::Authenticated(user) => self.establish(conn, user).await,
            Handshake::Unauthenticated(err) => {
                info!("[Relay] Connection {} is unauthenticated: {}", conn, err);
                self.hub.send_to(
                    conn,
                    ServerEvent::AuthError {
                        message: err.to_string(),
                    },
                );
            }
        }
        handshake
    }

    /// Late `authenticate` event from a connection still inside its grace period.
    pub(super) async fn authenticate(&self, conn: ConnectionId, handshake: &mut Handshake, token: &str) {
        if let Some(user) = handshake.user_id() {
            debug!("[Relay] {} already authenticated as {}", conn, user);
            return;
        }
        let outcome = Handshake::perform(self.auth.as_ref(), Some(token)).await;
        match &outcome {
            Handshake::Authenticated(user) => {
                self.hub.send_to(
                    conn,
                    ServerEvent::Authenticated {
                        user_id: user.clone(),
                    },
                );
                self.establish(conn, user).await;
            }
            Handshake::Unauthenticated(err) => {
                self.hub.send_to(
                    conn,
                    ServerEvent::AuthError {
                        message: err.to_string(),
                    },
                );
            }
        }
        *handshake = outcome;
    }

    /// Bind identity, announce presence and subscribe to the user's group rooms.
    async fn establish(&self, conn: ConnectionId, user: &UserId) {
        self.hub.bind_user(conn, user);
        self.presence.connected(user, conn);
        info!("[Relay] {} connected as {}", conn, user);

        match self.groups.list_by_member(user).await {
            Ok(groups) => {
                let joined = groups
                    .iter()
                    .filter(|group| self.hub.join(conn, Room::Group(group.id.clone())))
                    .count();
                debug!("[Relay] {} auto-joined {} group rooms", conn, joined);
            }
            Err(e) => {
                warn!("[Relay] Could not resolve groups of {}: {}", user, e);
                let err = RelayError::from(e);
                self.hub.send_to(
                    conn,
                    ServerEvent::EventError {
                        event: "connect".to_string(),
                        code: err.code(),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                        reference: None,
                    },
                );
            }
        }
    }

    /// Cleanup after close, error or liveness eviction. Safe to call once per connection.
    pub fn close(&self, conn: ConnectionId, handshake: &Handshake) {
        self.hub.detach(conn);
        if let Some(user) = handshake.user_id() {
            self.presence.disconnected(user, conn);
        }
        debug!("[Relay] Connection {} closed", conn);
    }

    /// Manual subscription to the caller's personal room or one of their dyadic rooms.
    pub(super) fn join_room(&self, conn: ConnectionId, user: &UserId, key: &str) -> Result<()> {
        let room = if key == user.as_str() {
            Room::Personal(user.clone())
        } else if dyadic_counterpart(key, user).is_some() {
            Room::Dyadic(key.to_string())
        } else {
            return Err(RelayError::forbidden(format!("room {} does not include {}", key, user)));
        };
        if !self.hub.join(conn, room.clone()) {
            debug!("[Relay] {} already in {}", conn, room);
        }
        Ok(())
    }

    pub(super) async fn join_group_room(&self, conn: ConnectionId, user: &UserId, group_id: &str) -> Result<()> {
        let group = self
            .groups
            .find_by_id(group_id)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("group {}", group_id)))?;
        if !group.is_member(user) {
            return Err(RelayError::forbidden(format!("{} is not in group {}", user, group_id)));
        }
        self.hub.join(conn, Room::Group(group.id));
        Ok(())
    }

    /// A member was added to a group by the REST layer.
    pub fn group_member_added(&self, group_id: &str, user: &str) {
        let room = Room::Group(group_id.to_string());
        let joined = self.hub.join_user(user, room.clone());
        info!("[Relay] {} added to {} ({} live sessions subscribed)", user, group_id, joined);

        self.hub.emit(
            &Room::Personal(user.to_string()),
            ServerEvent::AddedToGroup {
                group_id: group_id.to_string(),
            },
        );
        self.hub.emit_except_user(
            &room,
            ServerEvent::GroupMemberAdded {
                group_id: group_id.to_string(),
                user_id: user.to_string(),
            },
            user,
        );
    }

    /// A member was removed from a group by the REST layer.
    pub fn group_member_removed(&self, group_id: &str, user: &str) {
        let room = Room::Group(group_id.to_string());
        self.hub.emit_except_user(
            &room,
            ServerEvent::GroupMemberRemoved {
                group_id: group_id.to_string(),
                user_id: user.to_string(),
            },
            user,
        );
        self.hub.emit(
            &Room::Personal(user.to_string()),
            ServerEvent::RemovedFromGroup {
                group_id: group_id.to_string(),
            },
        );
        let left = self.hub.leave_user(user, &room);
        info!("[Relay] {} removed from {} ({} sessions unsubscribed)", user, group_id, left);
    }
}
