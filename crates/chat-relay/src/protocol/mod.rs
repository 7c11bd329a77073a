//! Wire protocol
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! Client events are accepted in any order; the relay answers with
//! server events addressed to rooms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{
    DeliveryStatus, FileMeta, GroupId, Message, MessageId, MessageType, UserId,
};

/// Events accepted from clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Late authentication for a connection that failed or skipped the handshake token.
    Authenticate { token: String },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room: String },
    #[serde(rename_all = "camelCase")]
    JoinGroupRoom { group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    Typing { sender_id: UserId, receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    StopTyping { sender_id: UserId, receiver_id: UserId },
    #[serde(rename_all = "camelCase")]
    TypingInGroup { sender_id: UserId, group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    StopTypingInGroup { sender_id: UserId, group_id: GroupId },
    SendMessage(SendMessage),
    SendGroupMessage(SendGroupMessage),
    #[serde(rename_all = "camelCase", alias = "addGroupReaction")]
    AddReaction {
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },
    #[serde(rename_all = "camelCase", alias = "removeGroupReaction")]
    RemoveReaction { message_id: MessageId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: MessageId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    UnsendMessage { message_id: MessageId, user_id: UserId },
    /// Hide a message from the requester's own view.
    #[serde(rename_all = "camelCase")]
    DeleteMessage { message_id: MessageId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    DeleteConversation { user_id: UserId, other_user_id: UserId },
    #[serde(rename_all = "camelCase")]
    DeleteGroupMessage {
        message_id: MessageId,
        user_id: UserId,
        #[serde(default = "default_true")]
        for_everyone: bool,
    },
    Ping,
}

fn default_true() -> bool {
    true
}

impl ClientEvent {
    /// Wire name, used to correlate `eventError` replies.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::JoinRoom { .. } => "joinRoom",
            ClientEvent::JoinGroupRoom { .. } => "joinGroupRoom",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stopTyping",
            ClientEvent::TypingInGroup { .. } => "typingInGroup",
            ClientEvent::StopTypingInGroup { .. } => "stopTypingInGroup",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::SendGroupMessage(_) => "sendGroupMessage",
            ClientEvent::AddReaction { .. } => "addReaction",
            ClientEvent::RemoveReaction { .. } => "removeReaction",
            ClientEvent::MessageRead { .. } => "messageRead",
            ClientEvent::UnsendMessage { .. } => "unsendMessage",
            ClientEvent::DeleteMessage { .. } => "deleteMessage",
            ClientEvent::DeleteConversation { .. } => "deleteConversation",
            ClientEvent::DeleteGroupMessage { .. } => "deleteGroupMessage",
            ClientEvent::Ping => "ping",
        }
    }

    /// Message id the event refers to, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            ClientEvent::AddReaction { message_id, .. }
            | ClientEvent::RemoveReaction { message_id, .. }
            | ClientEvent::MessageRead { message_id, .. }
            | ClientEvent::UnsendMessage { message_id, .. }
            | ClientEvent::DeleteMessage { message_id, .. }
            | ClientEvent::DeleteGroupMessage { message_id, .. } => Some(message_id),
            ClientEvent::SendMessage(send) => Some(&send.temp_id),
            ClientEvent::SendGroupMessage(send) => Some(&send.temp_id),
            _ => None,
        }
    }
}

/// Payload common to dyadic and group sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outgoing {
    pub content: String,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub file: Option<FileMeta>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub temp_id: String,
    #[serde(flatten)]
    pub body: Outgoing,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendGroupMessage {
    pub sender_id: UserId,
    pub group_id: GroupId,
    pub temp_id: String,
    #[serde(flatten)]
    pub body: Outgoing,
}

/// Events emitted to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    OnlineUsers { users: Vec<UserId> },
    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    ReceiveMessage {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ReceiveGroupMessage {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MessageError { temp_id: String, error: String },
    #[serde(rename_all = "camelCase")]
    MessageStatusUpdate {
        message_id: MessageId,
        status: DeliveryStatus,
    },
    #[serde(rename_all = "camelCase")]
    MessageReaction {
        message_id: MessageId,
        user_id: UserId,
        emoji: Option<String>,
        reactions: BTreeMap<UserId, String>,
    },
    #[serde(rename_all = "camelCase")]
    MessageUnsent { message_id: MessageId },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        message_id: MessageId,
        group_id: GroupId,
        deleted_by: UserId,
    },
    #[serde(rename_all = "camelCase")]
    MessageHidden { message_id: MessageId },
    #[serde(rename_all = "camelCase")]
    ConversationDeleted { other_user_id: UserId, hidden: usize },
    #[serde(rename_all = "camelCase")]
    Typing { sender_id: UserId },
    #[serde(rename_all = "camelCase")]
    StopTyping { sender_id: UserId },
    #[serde(rename_all = "camelCase")]
    TypingInGroup { sender_id: UserId, group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    StopTypingInGroup { sender_id: UserId, group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    AddedToGroup { group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    RemovedFromGroup { group_id: GroupId },
    #[serde(rename_all = "camelCase")]
    GroupMemberAdded { group_id: GroupId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    GroupMemberRemoved { group_id: GroupId, user_id: UserId },
    #[serde(rename_all = "camelCase")]
    AuthError { message: String },
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    EventError {
        event: String,
        code: u32,
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Pong,
}

impl ServerEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_send_message() {
        let raw = json!({
            "event": "sendMessage",
            "data": {
                "senderId": "alice",
                "receiverId": "bob",
                "tempId": "tmp-1",
                "content": "hi",
                "type": "image",
                "replyTo": "m0",
                "file": { "url": "https://cdn/x.png", "size": 12 }
            }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        match event {
            ClientEvent::SendMessage(send) => {
                assert_eq!(send.sender_id, "alice");
                assert_eq!(send.temp_id, "tmp-1");
                assert_eq!(send.body.message_type, MessageType::Image);
                assert_eq!(send.body.reply_to.as_deref(), Some("m0"));
                assert_eq!(send.body.file.unwrap().size, Some(12));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_group_reaction_alias() {
        let raw = json!({
            "event": "addGroupReaction",
            "data": { "messageId": "m1", "userId": "alice", "emoji": "👍" }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.name(), "addReaction");
        assert_eq!(event.reference(), Some("m1"));
    }

    #[test]
    fn test_delete_group_message_defaults_to_everyone() {
        let raw = json!({
            "event": "deleteGroupMessage",
            "data": { "messageId": "m1", "userId": "alice" }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            event,
            ClientEvent::DeleteGroupMessage { for_everyone: true, .. }
        ));
    }

    #[test]
    fn test_ping_without_data() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(event, ClientEvent::Ping);
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::UserOnline {
            user_id: "alice".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "userOnline", "data": {"userId": "alice"}}));

        let err = ServerEvent::MessageError {
            temp_id: "t1".into(),
            error: "boom".into(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["data"]["tempId"], "t1");
    }
}
