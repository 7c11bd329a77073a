//! In-memory stores

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{new_message_id, GroupStore, MessageStore, StoreResult};
use crate::models::{
    DeleteScope, DeliveryStatus, Group, GroupId, Message, MessageId, NewMessage, UserId,
    DELETED_PLACEHOLDER, UNSENT_PLACEHOLDER,
};

#[derive(Default)]
struct MessageTable {
    messages: HashMap<MessageId, Message>,
    /// Insertion order, used for room listings.
    order: Vec<MessageId>,
}

/// Message store kept entirely in process memory.
#[derive(Default)]
pub struct MemoryMessageStore {
    table: RwLock<MessageTable>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update<F>(&self, id: &str, f: F) -> Option<Message>
    where
        F: FnOnce(&mut Message),
    {
        let mut table = self.table.write();
        let message = table.messages.get_mut(id)?;
        f(message);
        Some(message.clone())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, new: NewMessage) -> StoreResult<Message> {
        let id = new_message_id();
        let message = Message::from_new(id.clone(), new);
        let mut table = self.table.write();
        table.messages.insert(id.clone(), message.clone());
        table.order.push(id);
        debug!("[Store] Created message {} in {}", message.id, message.room_key);
        Ok(message)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Message>> {
        Ok(self.table.read().messages.get(id).cloned())
    }

    async fn set_reaction(
        &self,
        id: &str,
        user: &str,
        emoji: &str,
    ) -> StoreResult<Option<Message>> {
        Ok(self.update(id, |m| {
            m.reactions.insert(user.to_string(), emoji.to_string());
        }))
    }

    async fn unset_reaction(&self, id: &str, user: &str) -> StoreResult<Option<Message>> {
        Ok(self.update(id, |m| {
            m.reactions.remove(user);
        }))
    }

    async fn mark_unsent(&self, id: &str) -> StoreResult<Option<Message>> {
        Ok(self.update(id, |m| {
            if !m.unsent {
                m.unsent = true;
                m.content = UNSENT_PLACEHOLDER.to_string();
                m.file = None;
            }
        }))
    }

    async fn mark_deleted(&self, id: &str, scope: DeleteScope) -> StoreResult<Option<Message>> {
        Ok(self.update(id, |m| match scope {
            DeleteScope::Everyone => {
                if !m.unsent {
                    m.unsent = true;
                    m.content = DELETED_PLACEHOLDER.to_string();
                    m.file = None;
                }
            }
            DeleteScope::ForUser(user) => {
                m.hidden_for.insert(user);
            }
        }))
    }

    async fn update_status(
        &self,
        id: &str,
        status: DeliveryStatus,
    ) -> StoreResult<Option<Message>> {
        Ok(self.update(id, |m| {
            m.status = Some(status);
        }))
    }

    async fn hide_room(&self, room_key: &str, user: &str) -> StoreResult<usize> {
        let mut table = self.table.write();
        let mut hidden = 0;
        for message in table.messages.values_mut() {
            if message.room_key == room_key && message.hidden_for.insert(user.to_string()) {
                hidden += 1;
            }
        }
        Ok(hidden)
    }

    async fn list_room(&self, room_key: &str, viewer: &str) -> StoreResult<Vec<Message>> {
        let table = self.table.read();
        Ok(table
            .order
            .iter()
            .filter_map(|id| table.messages.get(id))
            .filter(|m| m.room_key == room_key && m.is_visible_to(viewer))
            .cloned()
            .collect())
    }
}

/// Group records kept in process memory. Writes come from the REST side.
#[derive(Default)]
pub struct MemoryGroupStore {
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(groups: impl IntoIterator<Item = Group>) -> Self {
        let map: HashMap<GroupId, Group> = groups.into_iter().map(|g| (g.id.clone(), g)).collect();
        info!("[Store] Group store loaded with {} groups", map.len());
        Self {
            groups: RwLock::new(map),
        }
    }

    pub fn upsert(&self, group: Group) {
        self.groups.write().insert(group.id.clone(), group);
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.groups.read().contains_key(group_id)
    }

    pub fn add_member(&self, group_id: &str, user: &str) -> bool {
        self.groups
            .write()
            .get_mut(group_id)
            .map(|g| g.members.insert(user.to_string()))
            .unwrap_or(false)
    }

    pub fn remove_member(&self, group_id: &str, user: &str) -> bool {
        self.groups
            .write()
            .get_mut(group_id)
            .map(|g| g.members.remove(user))
            .unwrap_or(false)
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Group>> {
        Ok(self.groups.read().get(id).cloned())
    }

    async fn list_by_member(&self, user: &UserId) -> StoreResult<Vec<Group>> {
        let mut groups: Vec<Group> = self
            .groups
            .read()
            .values()
            .filter(|g| g.is_member(user))
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(groups)
    }
}
