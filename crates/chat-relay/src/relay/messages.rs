//! Message pipeline: reply snapshot, persistence, delivery status and fan-out.

use tracing::{debug, info, warn};

use super::{ensure_actor, ensure_routable, Relay};
use crate::error::{RelayError, Result};
use crate::models::{Conversation, DeliveryStatus, NewMessage, Reply, UserId};
use crate::protocol::{Outgoing, SendGroupMessage, SendMessage, ServerEvent};
use crate::rooms::{dyadic_room_key, group_room_key, Room};

impl Relay {
    pub(super) async fn send_direct(&self, user: &UserId, send: SendMessage) -> Result<()> {
        ensure_actor(user, &send.sender_id)?;
        ensure_routable("receiverId", &send.receiver_id)?;

        let room_key = dyadic_room_key(user, &send.receiver_id);
        let reply = self.reply_snapshot(send.body.reply_to.as_deref(), &room_key).await;
        // Presence at this instant only; a later login does not upgrade it.
        let status = DeliveryStatus::initial(self.presence.is_online(&send.receiver_id));

        let message = self
            .messages
            .create(new_message(
                user,
                Conversation::Direct {
                    receiver: send.receiver_id.clone(),
                },
                room_key.clone(),
                send.body,
                reply,
                Some(status),
            ))
            .await?;
        info!(
            "[Relay] {} -> {}: message {} ({:?})",
            user, send.receiver_id, message.id, status
        );

        self.hub.emit(
            &Room::Personal(user.clone()),
            ServerEvent::ReceiveMessage {
                message: message.clone(),
                temp_id: Some(send.temp_id),
            },
        );
        self.hub.emit_rooms(
            &[Room::Personal(send.receiver_id), Room::Dyadic(room_key)],
            ServerEvent::ReceiveMessage {
                message,
                temp_id: None,
            },
            Some(user.as_str()),
        );
        Ok(())
    }

    pub(super) async fn send_group(&self, user: &UserId, send: SendGroupMessage) -> Result<()> {
        ensure_actor(user, &send.sender_id)?;
        let group = self
            .groups
            .find_by_id(&send.group_id)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("group {}", send.group_id)))?;
        if !group.is_member(user) {
            return Err(RelayError::forbidden(format!(
                "{} is not in group {}",
                user, group.id
            )));
        }

        let room_key = group_room_key(&group.id);
        let reply = self.reply_snapshot(send.body.reply_to.as_deref(), &room_key).await;
        let message = self
            .messages
            .create(new_message(
                user,
                Conversation::Group {
                    group_id: group.id.clone(),
                },
                room_key,
                send.body,
                reply,
                None,
            ))
            .await?;
        info!("[Relay] {} -> group {}: message {}", user, group.id, message.id);

        self.hub.emit(
            &Room::Personal(user.clone()),
            ServerEvent::ReceiveGroupMessage {
                message: message.clone(),
                temp_id: Some(send.temp_id),
            },
        );
        self.hub.emit_except_user(
            &Room::Group(group.id),
            ServerEvent::ReceiveGroupMessage {
                message,
                temp_id: None,
            },
            user,
        );
        Ok(())
    }

    /// Snapshot of the replied-to message. A missing target, or one from
    /// another conversation, just means no reply.
    async fn reply_snapshot(&self, reply_to: Option<&str>, room_key: &str) -> Reply {
        let Some(reply_to) = reply_to else {
            return Reply::NoReply;
        };
        match self.messages.find_by_id(reply_to).await {
            Ok(Some(original)) if original.room_key == room_key => Reply::snapshot_of(&original),
            Ok(_) => {
                debug!("[Relay] Reply target {} not found in {}", reply_to, room_key);
                Reply::NoReply
            }
            Err(e) => {
                warn!("[Relay] Reply lookup for {} failed: {}", reply_to, e);
                Reply::NoReply
            }
        }
    }

    /// Receiver acknowledgement: moves a dyadic message to Seen.
    pub(super) async fn mark_seen(&self, user: &UserId, message_id: &str, claimed: &str) -> Result<()> {
        ensure_actor(user, claimed)?;
        let message = self.load_message(message_id).await?;
        let receiver = message
            .receiver()
            .ok_or_else(|| RelayError::invalid_event("group messages have no delivery status"))?;
        if receiver != user {
            return Err(RelayError::forbidden(format!(
                "{} is not the receiver of {}",
                user, message.id
            )));
        }

        let current = message.status.unwrap_or(DeliveryStatus::Sent);
        if message.unsent || !current.can_advance_to(DeliveryStatus::Seen) {
            debug!("[Relay] {} stays {:?}", message.id, current);
            return Ok(());
        }

        let updated = self
            .messages
            .update_status(&message.id, DeliveryStatus::Seen)
            .await?
            .ok_or_else(|| RelayError::not_found(format!("message {}", message.id)))?;
        self.hub.emit(
            &Room::Personal(updated.sender.clone()),
            ServerEvent::MessageStatusUpdate {
                message_id: updated.id,
                status: DeliveryStatus::Seen,
            },
        );
        Ok(())
    }
}

fn new_message(
    sender: &UserId,
    conversation: Conversation,
    room_key: String,
    body: Outgoing,
    reply: Reply,
    status: Option<DeliveryStatus>,
) -> NewMessage {
    NewMessage {
        sender: sender.clone(),
        conversation,
        room_key,
        content: body.content,
        message_type: body.message_type,
        file: body.file,
        reply,
        status,
    }
}
