//! Reactions, unsend, deletes and typing.
//!
//! Fan-out targets always come from the stored message, never from the
//! client payload.

use tracing::{debug, info};

use super::{ensure_actor, ensure_routable, Relay};
use crate::error::{RelayError, Result};
use crate::models::{ConnectionId, DeleteScope, UserId};
use crate::protocol::ServerEvent;
use crate::rooms::{dyadic_room_key, Room};

impl Relay {
    /// Upsert (`Some(emoji)`) or remove (`None`) the caller's reaction.
    pub(super) async fn react(
        &self,
        user: &UserId,
        message_id: &str,
        claimed: &str,
        emoji: Option<String>,
    ) -> Result<()> {
        ensure_actor(user, claimed)?;
        if emoji.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(RelayError::invalid_event("emoji is empty"));
        }
        let message = self.load_message(message_id).await?;
        self.ensure_participant(&message, user).await?;
        if message.unsent {
            return Err(RelayError::invalid_event(format!(
                "message {} was unsent",
                message.id
            )));
        }

        let updated = match &emoji {
            Some(emoji) => self.messages.set_reaction(&message.id, user, emoji).await?,
            None => self.messages.unset_reaction(&message.id, user).await?,
        }
        .ok_or_else(|| RelayError::not_found(format!("message {}", message.id)))?;

        let audience = Self::audience(&updated);
        self.hub.emit_rooms(
            &audience,
            ServerEvent::MessageReaction {
                message_id: updated.id,
                user_id: user.clone(),
                emoji,
                reactions: updated.reactions,
            },
            None,
        );
        Ok(())
    }

    /// Sender-only, one-way unsend of a dyadic message.
    pub(super) async fn unsend(&self, user: &UserId, message_id: &str, claimed: &str) -> Result<()> {
        ensure_actor(user, claimed)?;
        let message = self.load_message(message_id).await?;
        if message.receiver().is_none() {
            return Err(RelayError::invalid_event(
                "group messages are removed with deleteGroupMessage",
            ));
        }
        if message.sender != *user {
            return Err(RelayError::forbidden(format!(
                "{} did not send {}",
                user, message.id
            )));
        }
        if message.unsent {
            debug!("[Relay] {} already unsent", message.id);
            return Ok(());
        }

        let updated = self
            .messages
            .mark_unsent(&message.id)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("message {}", message.id)))?;
        info!("[Relay] {} unsent {}", user, updated.id);

        let audience = Self::audience(&updated);
        self.hub.emit_rooms(
            &audience,
            ServerEvent::MessageUnsent {
                message_id: updated.id,
            },
            None,
        );
        Ok(())
    }

    /// Group delete visible to everyone: sender, admin or co-admin only.
    pub(super) async fn delete_for_everyone(
        &self,
        user: &UserId,
        message_id: &str,
        claimed: &str,
    ) -> Result<()> {
        ensure_actor(user, claimed)?;
        let message = self.load_message(message_id).await?;
        let Some(group_id) = message.group_id().cloned() else {
            return Err(RelayError::invalid_event(
                "direct messages are removed with unsendMessage",
            ));
        };
        let group = self
            .groups
            .find_by_id(&group_id)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("group {}", group_id)))?;
        if message.sender != *user && !group.is_privileged(user) {
            return Err(RelayError::forbidden(format!(
                "{} may not delete {} in {}",
                user, message.id, group_id
            )));
        }
        if message.unsent {
            debug!("[Relay] {} already deleted", message.id);
            return Ok(());
        }

        let updated = self
            .messages
            .mark_deleted(&message.id, DeleteScope::Everyone)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("message {}", message.id)))?;
        info!("[Relay] {} deleted {} in {}", user, updated.id, group_id);

        self.hub.emit(
            &Room::Group(group_id.clone()),
            ServerEvent::MessageDeleted {
                message_id: updated.id,
                group_id,
                deleted_by: user.clone(),
            },
        );
        Ok(())
    }

    /// Hide a message for the caller only. Other viewers are unaffected.
    pub(super) async fn delete_for_self(&self, user: &UserId, message_id: &str, claimed: &str) -> Result<()> {
        ensure_actor(user, claimed)?;
        let message = self.load_message(message_id).await?;
        self.ensure_participant(&message, user).await?;
        if !message.is_visible_to(user) {
            return Ok(());
        }

        self.messages
            .mark_deleted(&message.id, DeleteScope::ForUser(user.clone()))
            .await?
            .ok_or_else(|| RelayError::not_found(format!("message {}", message.id)))?;

        self.hub.emit(
            &Room::Personal(user.clone()),
            ServerEvent::MessageHidden {
                message_id: message.id,
            },
        );
        Ok(())
    }

    /// Hide a whole dyadic conversation for the caller.
    pub(super) async fn delete_conversation(&self, user: &UserId, claimed: &str, other: &str) -> Result<()> {
        ensure_actor(user, claimed)?;
        ensure_routable("otherUserId", other)?;
        let room_key = dyadic_room_key(user, other);
        let hidden = self.messages.hide_room(&room_key, user).await?;
        info!("[Relay] {} cleared {} ({} messages)", user, room_key, hidden);

        self.hub.emit(
            &Room::Personal(user.clone()),
            ServerEvent::ConversationDeleted {
                other_user_id: other.to_string(),
                hidden,
            },
        );
        Ok(())
    }

    pub(super) fn typing(&self, user: &UserId, sender_id: &str, receiver_id: &str, started: bool) -> Result<()> {
        ensure_actor(user, sender_id)?;
        ensure_routable("receiverId", receiver_id)?;
        let event = if started {
            ServerEvent::Typing {
                sender_id: user.clone(),
            }
        } else {
            ServerEvent::StopTyping {
                sender_id: user.clone(),
            }
        };
        self.hub.emit(&Room::Personal(receiver_id.to_string()), event);
        Ok(())
    }

    pub(super) fn typing_in_group(
        &self,
        conn: ConnectionId,
        user: &UserId,
        sender_id: &str,
        group_id: &str,
        started: bool,
    ) -> Result<()> {
        ensure_actor(user, sender_id)?;
        let room = Room::Group(group_id.to_string());
        if !self.hub.is_subscribed(conn, &room) {
            return Err(RelayError::forbidden(format!("{} is not subscribed to {}", conn, room)));
        }
        let (sender_id, group_id) = (user.clone(), group_id.to_string());
        let event = if started {
            ServerEvent::TypingInGroup { sender_id, group_id }
        } else {
            ServerEvent::StopTypingInGroup { sender_id, group_id }
        };
        self.hub.emit_except_user(&room, event, user);
        Ok(())
    }
}
