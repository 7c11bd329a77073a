//! Relay core
//!
//! Owns the session registry, presence tracker and room hub, and routes
//! each client event to its handler. Handlers for one connection run in
//! arrival order because the socket task awaits each dispatch; handlers
//! for different connections interleave freely and only meet at the
//! lock-guarded maps.

mod interactions;
mod lifecycle;
mod messages;

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::auth::{Authenticator, Handshake};
use crate::error::{RelayError, Result};
use crate::models::{ConnectionId, Message, UserId};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::rooms::{is_routable_identity, Room, RoomHub};
use crate::session::{PresenceTracker, SessionRegistry};
use crate::store::{GroupStore, MessageStore};

pub struct Relay {
    hub: Arc<RoomHub>,
    registry: Arc<SessionRegistry>,
    presence: PresenceTracker,
    messages: Arc<dyn MessageStore>,
    groups: Arc<dyn GroupStore>,
    auth: Arc<dyn Authenticator>,
}

impl Relay {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        groups: Arc<dyn GroupStore>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let hub = Arc::new(RoomHub::new());
        let registry = Arc::new(SessionRegistry::new());
        let presence = PresenceTracker::new(registry.clone(), hub.clone());
        Self {
            hub,
            registry,
            presence,
            messages,
            groups,
            auth,
        }
    }

    pub fn hub(&self) -> &RoomHub {
        &self.hub
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.is_online(user_id)
    }

    /// Handle one client event. Never fails: errors become targeted events
    /// for the originating connection or are logged and dropped.
    pub async fn dispatch(&self, conn: ConnectionId, handshake: &mut Handshake, event: ClientEvent) {
        let name = event.name();
        debug!("[Relay] {} <- {}", conn, name);

        match &event {
            ClientEvent::Authenticate { token } => {
                self.authenticate(conn, handshake, token).await;
                return;
            }
            ClientEvent::Ping => {
                self.hub.send_to(conn, ServerEvent::Pong);
                return;
            }
            _ => {}
        }

        let Some(user) = handshake.user_id().cloned() else {
            self.report(conn, None, name, event.reference(), RelayError::Unauthenticated);
            return;
        };

        let reference = event.reference().map(str::to_string);
        let result = self.handle(conn, &user, event).await;
        if let Err(err) = result {
            self.report(conn, Some(&user), name, reference.as_deref(), err);
        }
    }

    async fn handle(&self, conn: ConnectionId, user: &UserId, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::JoinRoom { room } => self.join_room(conn, user, &room),
            ClientEvent::JoinGroupRoom { group_id } => {
                self.join_group_room(conn, user, &group_id).await
            }
            ClientEvent::Typing {
                sender_id,
                receiver_id,
            } => self.typing(user, &sender_id, &receiver_id, true),
            ClientEvent::StopTyping {
                sender_id,
                receiver_id,
            } => self.typing(user, &sender_id, &receiver_id, false),
            ClientEvent::TypingInGroup {
                sender_id,
                group_id,
            } => self.typing_in_group(conn, user, &sender_id, &group_id, true),
            ClientEvent::StopTypingInGroup {
                sender_id,
                group_id,
            } => self.typing_in_group(conn, user, &sender_id, &group_id, false),
            ClientEvent::SendMessage(send) => self.send_direct(user, send).await,
            ClientEvent::SendGroupMessage(send) => self.send_group(user, send).await,
            ClientEvent::AddReaction {
                message_id,
                user_id,
                emoji,
            } => self.react(user, &message_id, &user_id, Some(emoji)).await,
            ClientEvent::RemoveReaction {
                message_id,
                user_id,
            } => self.react(user, &message_id, &user_id, None).await,
            ClientEvent::MessageRead {
                message_id,
                user_id,
            } => self.mark_seen(user, &message_id, &user_id).await,
            ClientEvent::UnsendMessage {
                message_id,
                user_id,
            } => self.unsend(user, &message_id, &user_id).await,
            ClientEvent::DeleteMessage {
                message_id,
                user_id,
            } => self.delete_for_self(user, &message_id, &user_id).await,
            ClientEvent::DeleteConversation {
                user_id,
                other_user_id,
            } => self.delete_conversation(user, &user_id, &other_user_id).await,
            ClientEvent::DeleteGroupMessage {
                message_id,
                user_id,
                for_everyone,
            } => {
                if for_everyone {
                    self.delete_for_everyone(user, &message_id, &user_id).await
                } else {
                    self.delete_for_self(user, &message_id, &user_id).await
                }
            }
            ClientEvent::Authenticate { .. } | ClientEvent::Ping => Ok(()),
        }
    }

    /// Turn a handler failure into the event the client should see.
    fn report(
        &self,
        conn: ConnectionId,
        user: Option<&UserId>,
        event: &str,
        reference: Option<&str>,
        err: RelayError,
    ) {
        match &err {
            RelayError::Forbidden(reason) => {
                warn!(
                    "[Relay] Dropped {} from {} ({:?}): {}",
                    event, conn, user, reason
                );
                return;
            }
            RelayError::Store(e) => error!("[Relay] {} failed for {}: {}", event, conn, e),
            _ => debug!("[Relay] {} rejected for {}: {}", event, conn, err),
        }

        let is_send = matches!(event, "sendMessage" | "sendGroupMessage");
        match (is_send, user, reference) {
            (true, Some(user), Some(temp_id)) => {
                self.hub.emit(
                    &Room::Personal(user.clone()),
                    ServerEvent::MessageError {
                        temp_id: temp_id.to_string(),
                        error: err.to_string(),
                    },
                );
            }
            _ => {
                self.hub.send_to(
                    conn,
                    ServerEvent::EventError {
                        event: event.to_string(),
                        code: err.code(),
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                        reference: reference.map(str::to_string),
                    },
                );
            }
        }
    }

    /// Report a frame that could not be parsed.
    pub fn reject_frame(&self, conn: ConnectionId, err: RelayError) {
        debug!("[Relay] Unparseable frame from {}: {}", conn, err);
        self.hub.send_to(
            conn,
            ServerEvent::EventError {
                event: "unknown".to_string(),
                code: err.code(),
                kind: err.kind().to_string(),
                message: err.to_string(),
                reference: None,
            },
        );
    }

    async fn load_message(&self, message_id: &str) -> Result<Message> {
        self.messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("message {}", message_id)))
    }

    /// Rooms that see events about `message`, derived from its stored
    /// routing fields only.
    fn audience(message: &Message) -> Vec<Room> {
        match message.receiver() {
            Some(receiver) => vec![
                Room::Personal(message.sender.clone()),
                Room::Personal(receiver.clone()),
                Room::dyadic(&message.sender, receiver),
            ],
            None => message
                .group_id()
                .map(|group_id| vec![Room::Group(group_id.clone())])
                .unwrap_or_default(),
        }
    }

    /// Fails with Forbidden unless `user` takes part in the message's conversation.
    async fn ensure_participant(&self, message: &Message, user: &str) -> Result<()> {
        let allowed = match message.group_id() {
            Some(group_id) => self
                .groups
                .find_by_id(group_id)
                .await?
                .is_some_and(|group| group.is_member(user)),
            None => message.counterpart_of(user).is_some(),
        };
        if allowed {
            Ok(())
        } else {
            Err(RelayError::forbidden(format!(
                "{} is not part of the conversation of {}",
                user, message.id
            )))
        }
    }
}

/// The identity carried in a payload must match the connection's.
fn ensure_actor(authenticated: &str, claimed: &str) -> Result<()> {
    if authenticated == claimed {
        Ok(())
    } else {
        Err(RelayError::forbidden(format!(
            "payload identity {} does not match {}",
            claimed, authenticated
        )))
    }
}

/// A counterpart identity taken from a payload must map to exactly one dyadic room.
fn ensure_routable(field: &str, id: &str) -> Result<()> {
    if is_routable_identity(id) {
        Ok(())
    } else {
        Err(RelayError::invalid_event(format!("{} {:?} is not a valid identity", field, id)))
    }
}
