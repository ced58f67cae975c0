//! Conversation and participant types

use serde::{Deserialize, Serialize};

/// A conversation between two users or a named group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub created_at: i64,
}

/// Membership of one user in one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    /// Read watermark: every message created at or before this time has been seen
    pub last_seen_at: i64,
}

impl Participant {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            last_seen_at: 0,
        }
    }
}

/// Deterministic id of the direct conversation between two users
///
/// The ids are ordered so both sides derive the same value. The first id is
/// prefixed with its byte length, so user ids may contain `:` without two
/// distinct pairs mapping to the same conversation.
pub fn direct_conversation_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{first}:{second}", first.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_id_is_symmetric() {
        assert_eq!(direct_conversation_id("alice", "bob"), "5:alice:bob");
        assert_eq!(direct_conversation_id("bob", "alice"), "5:alice:bob");
    }

    #[test]
    fn test_direct_id_does_not_collide() {
        assert_ne!(
            direct_conversation_id("a", "bc"),
            direct_conversation_id("ab", "c")
        );
    }

    #[test]
    fn test_direct_id_with_separator_in_user_id() {
        assert_ne!(
            direct_conversation_id("a:b", "c"),
            direct_conversation_id("a", "b:c")
        );
        assert_ne!(
            direct_conversation_id("a", "b:c"),
            direct_conversation_id("a:b:c", "")
        );
        assert_eq!(direct_conversation_id("a", "b:c"), "1:a:b:c");
        assert_eq!(direct_conversation_id("a:b", "c"), "3:a:b:c");
    }

    #[test]
    fn test_new_participant_has_zero_watermark() {
        let participant = Participant::new("alice");
        assert_eq!(participant.last_seen_at, 0);
    }
}
