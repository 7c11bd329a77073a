//! Storage collaborators
//!
//! The relay never owns durable state. Messages and groups live behind
//! these traits; the in-memory implementations back the binary and tests.

pub mod memory;
pub mod seed;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{
    DeleteScope, DeliveryStatus, Group, Message, MessageId, NewMessage, UserId,
};

pub use memory::{MemoryGroupStore, MemoryMessageStore};
pub use seed::SeedFile;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable message record. Mutators return the updated message, or `None`
/// when the id is unknown.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: NewMessage) -> StoreResult<Message>;

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Message>>;

    /// Upsert `user`'s reaction; at most one entry per user.
    async fn set_reaction(&self, id: &str, user: &str, emoji: &str)
        -> StoreResult<Option<Message>>;

    async fn unset_reaction(&self, id: &str, user: &str) -> StoreResult<Option<Message>>;

    async fn mark_unsent(&self, id: &str) -> StoreResult<Option<Message>>;

    async fn mark_deleted(&self, id: &str, scope: DeleteScope) -> StoreResult<Option<Message>>;

    async fn update_status(
        &self,
        id: &str,
        status: DeliveryStatus,
    ) -> StoreResult<Option<Message>>;

    /// Hide every message of a room for one user. Returns how many were newly hidden.
    async fn hide_room(&self, room_key: &str, user: &str) -> StoreResult<usize>;

    /// Messages of a room as seen by `viewer`, oldest first.
    async fn list_room(&self, room_key: &str, viewer: &str) -> StoreResult<Vec<Message>>;
}

/// Read side of the group service.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Group>>;

    async fn list_by_member(&self, user: &UserId) -> StoreResult<Vec<Group>>;
}

/// Generates message ids for stores that do not have their own.
pub fn new_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}
