//! Storage collaborator contract
//!
//! The delivery core never touches persistence directly. Everything it needs
//! goes through [`ChatStore`], and everything it learns about writes made by
//! any server instance arrives through a [`ChangeFeed`].
//!
//! Delivery counters and read watermarks are updated with atomic
//! read-modify-write operations inside the store, so concurrent handlers for
//! the same message can never lose an update or move a counter backwards.

pub mod feed;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Conversation, Message, NewMessage, PendingReceipt};

pub use feed::{ChangeFeed, FeedError, MemoryChangeFeed, Notification, NotificationStream};
pub use memory::MemoryStore;

/// Storage errors surfaced to handlers and the fanout bridge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("user {user_id} is not part of conversation {conversation_id}")]
    NotParticipant {
        user_id: String,
        conversation_id: String,
    },

    #[error("read watermark {requested} is behind stored watermark {current}")]
    StaleWatermark { current: i64, requested: i64 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Narrow query contract the delivery core consumes
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a message and one pending receipt per recipient
    ///
    /// Direct conversations are created on first use; group conversations
    /// must already exist.
    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError>;

    /// Remove the caller's pending receipts for `message_ids`
    ///
    /// Returns the rows actually removed. An empty result means the messages
    /// were already marked as received (or never addressed to the user).
    async fn mark_received(
        &self,
        message_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<PendingReceipt>, StoreError>;

    /// Advance the read watermark of `user_id` in `conversation_id`
    ///
    /// A `time` earlier than the stored watermark fails with
    /// [`StoreError::StaleWatermark`].
    async fn update_seen(
        &self,
        conversation_id: &str,
        user_id: &str,
        time: i64,
    ) -> Result<(), StoreError>;

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>, StoreError>;

    async fn message(&self, message_id: &str) -> Result<Message, StoreError>;

    async fn conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError>;

    async fn is_participant(&self, user_id: &str, conversation_id: &str)
        -> Result<bool, StoreError>;

    async fn create_direct_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Conversation, StoreError>;

    async fn create_group_conversation(
        &self,
        owner_id: &str,
        members: &[String],
    ) -> Result<Conversation, StoreError>;
}
