use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Verified user identity.
pub type UserId = String;
pub type GroupId = String;
pub type MessageId = String;

/// Content written over an unsent dyadic message.
pub const UNSENT_PLACEHOLDER: &str = "This message was unsent";
/// Content written over a group message deleted for everyone.
pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// Identifier of one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
}

/// Delivery status of a dyadic message. Ordered so that progress only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

impl DeliveryStatus {
    /// Initial status from the receiver's presence at send time.
    pub fn initial(receiver_online: bool) -> Self {
        if receiver_online {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }

    /// Whether moving to `next` is a forward transition.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        next > self
    }
}

/// Opaque attachment metadata produced by the media service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Copy of the replied-to message taken at send time.
///
/// This is a frozen snapshot: later unsends or deletes of the original are
/// not reflected here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub id: MessageId,
    pub content: String,
    pub sender: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Reply {
    #[default]
    NoReply,
    Snapshot(ReplySnapshot),
}

impl Reply {
    pub fn snapshot_of(message: &Message) -> Self {
        Reply::Snapshot(ReplySnapshot {
            id: message.id.clone(),
            content: message.content.clone(),
            sender: message.sender.clone(),
        })
    }
}

/// Where a message is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Conversation {
    #[serde(rename_all = "camelCase")]
    Direct { receiver: UserId },
    #[serde(rename_all = "camelCase")]
    Group { group_id: GroupId },
}

/// Fields of a message before the store assigns it an identity.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: UserId,
    pub conversation: Conversation,
    pub room_key: String,
    pub content: String,
    pub message_type: MessageType,
    pub file: Option<FileMeta>,
    pub reply: Reply,
    pub status: Option<DeliveryStatus>,
}

/// A persisted chat message, as far as the relay reads and writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    pub conversation: Conversation,
    pub room_key: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    #[serde(default)]
    pub reply: Reply,
    /// Acting user -> emoji; one entry per user.
    #[serde(default)]
    pub reactions: BTreeMap<UserId, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    #[serde(default)]
    pub unsent: bool,
    /// Users who deleted this message for themselves only.
    #[serde(default, skip_serializing)]
    pub hidden_for: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_new(id: MessageId, new: NewMessage) -> Self {
        Self {
            id,
            sender: new.sender,
            conversation: new.conversation,
            room_key: new.room_key,
            content: new.content,
            message_type: new.message_type,
            file: new.file,
            reply: new.reply,
            reactions: BTreeMap::new(),
            status: new.status,
            unsent: false,
            hidden_for: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn receiver(&self) -> Option<&UserId> {
        match &self.conversation {
            Conversation::Direct { receiver } => Some(receiver),
            Conversation::Group { .. } => None,
        }
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        match &self.conversation {
            Conversation::Group { group_id } => Some(group_id),
            Conversation::Direct { .. } => None,
        }
    }

    /// For a dyadic message, the participant that is not `user`.
    pub fn counterpart_of(&self, user: &str) -> Option<&UserId> {
        let receiver = self.receiver()?;
        if self.sender == user {
            Some(receiver)
        } else if receiver == user {
            Some(&self.sender)
        } else {
            None
        }
    }

    pub fn is_visible_to(&self, user: &str) -> bool {
        !self.hidden_for.contains(user)
    }
}

/// Group record as exposed by the group service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    pub admin: UserId,
    #[serde(default)]
    pub co_admins: BTreeSet<UserId>,
    #[serde(default)]
    pub members: BTreeSet<UserId>,
}

impl Group {
    pub fn is_member(&self, user: &str) -> bool {
        self.admin == user || self.members.contains(user)
    }

    /// Admin or co-admin.
    pub fn is_privileged(&self, user: &str) -> bool {
        self.admin == user || self.co_admins.contains(user)
    }
}

/// Scope of a logical delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteScope {
    Everyone,
    ForUser(UserId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(sender: &str, receiver: &str) -> Message {
        Message::from_new(
            "m1".into(),
            NewMessage {
                sender: sender.into(),
                conversation: Conversation::Direct {
                    receiver: receiver.into(),
                },
                room_key: "alice_bob".into(),
                content: "hi".into(),
                message_type: MessageType::Text,
                file: None,
                reply: Reply::NoReply,
                status: Some(DeliveryStatus::Sent),
            },
        )
    }

    #[test]
    fn test_status_only_moves_forward() {
        assert!(DeliveryStatus::Sent.can_advance_to(DeliveryStatus::Delivered));
        assert!(DeliveryStatus::Delivered.can_advance_to(DeliveryStatus::Seen));
        assert!(DeliveryStatus::Sent.can_advance_to(DeliveryStatus::Seen));
        assert!(!DeliveryStatus::Seen.can_advance_to(DeliveryStatus::Delivered));
        assert!(!DeliveryStatus::Seen.can_advance_to(DeliveryStatus::Seen));
    }

    #[test]
    fn test_counterpart() {
        let msg = direct("alice", "bob");
        assert_eq!(msg.counterpart_of("alice").map(String::as_str), Some("bob"));
        assert_eq!(msg.counterpart_of("bob").map(String::as_str), Some("alice"));
        assert_eq!(msg.counterpart_of("carol"), None);
    }

    #[test]
    fn test_wire_shape() {
        let msg = direct("alice", "bob");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["status"], "sent");
        assert_eq!(value["reply"]["kind"], "noReply");
        assert_eq!(value["conversation"]["receiver"], "bob");
        assert!(value.get("hiddenFor").is_none());
    }

    #[test]
    fn test_group_privileges() {
        let group = Group {
            id: "g1".into(),
            name: "team".into(),
            admin: "alice".into(),
            co_admins: ["bob".to_string()].into(),
            members: ["bob".to_string(), "carol".to_string()].into(),
        };
        assert!(group.is_member("alice"));
        assert!(group.is_privileged("bob"));
        assert!(!group.is_privileged("carol"));
        assert!(!group.is_member("dave"));
    }
}
