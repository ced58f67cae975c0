//! Data types for the chat gateway
//!
//! Store-owned records the delivery core reads and writes through the
//! [`ChatStore`](crate::store::ChatStore) contract.

mod conversation;
mod message;

pub use conversation::{direct_conversation_id, Conversation, Participant};
pub use message::{Message, NewMessage, PendingReceipt};
