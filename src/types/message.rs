//! Message and delivery-state types

use serde::{Deserialize, Serialize};

/// A persisted chat message together with its delivery counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub body: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// Client-reported send time
    pub sent_at: i64,
    /// Server receive time (Unix nanoseconds)
    pub created_at: i64,
    /// Number of intended recipients, sender included
    pub sent_to_count: u32,
    pub delivered_count: u32,
    pub seen_count: u32,
}

impl Message {
    /// Whether every intended recipient has received the message
    pub fn fully_delivered(&self) -> bool {
        self.delivered_count >= self.sent_to_count
    }

    /// Whether every intended recipient has seen the message
    pub fn fully_seen(&self) -> bool {
        self.seen_count >= self.sent_to_count
    }
}

/// A message about to be written by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub body: String,
    pub sender_id: String,
    pub conversation_id: String,
    pub is_group: bool,
    /// Counterpart of a direct conversation, used to create it on first use
    pub receiver_id: Option<String>,
    pub sent_at: i64,
}

/// A recipient that has not yet confirmed receipt of a message
///
/// This is also the payload of the `chat_written` change-feed channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingReceipt {
    pub message_id: String,
    pub receiver_id: String,
}
