//! In-memory chat store
//!
//! Every read-modify-write runs under a single lock acquisition. Change
//! notifications are collected while the lock is held and published once it
//! has been released.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::types::{
    direct_conversation_id, Conversation, Message, NewMessage, Participant, PendingReceipt,
};
use crate::utils::current_timestamp_nanos;

use super::feed::{MemoryChangeFeed, CHAT_READ, CHAT_RECEIVED, CHAT_WRITTEN};
use super::{ChatStore, StoreError};

#[derive(Default)]
struct StoreInner {
    conversations: HashMap<String, Conversation>,
    /// conversation id -> members in join order
    participants: HashMap<String, Vec<Participant>>,
    messages: HashMap<String, Message>,
    pending: HashSet<PendingReceipt>,
    /// Last `created_at` handed out, keeps message times strictly increasing
    last_created_at: i64,
}

impl StoreInner {
    fn next_created_at(&mut self) -> i64 {
        let now = current_timestamp_nanos().max(self.last_created_at + 1);
        self.last_created_at = now;
        now
    }

    fn ensure_conversation(&mut self, id: &str, is_group: bool, owner: Option<&str>) -> Conversation {
        if let Some(existing) = self.conversations.get(id) {
            return existing.clone();
        }
        let conversation = Conversation {
            id: id.to_string(),
            is_group,
            owner_id: owner.map(str::to_string),
            created_at: self.next_created_at(),
        };
        self.conversations
            .insert(id.to_string(), conversation.clone());
        conversation
    }

    fn add_participant(&mut self, conversation_id: &str, user_id: &str) {
        let members = self
            .participants
            .entry(conversation_id.to_string())
            .or_default();
        if !members.iter().any(|p| p.user_id == user_id) {
            members.push(Participant::new(user_id));
        }
    }

    fn member_ids(&self, conversation_id: &str) -> Vec<String> {
        self.participants
            .get(conversation_id)
            .map(|members| members.iter().map(|p| p.user_id.clone()).collect())
            .unwrap_or_default()
    }

    fn is_member(&self, conversation_id: &str, user_id: &str) -> bool {
        self.participants
            .get(conversation_id)
            .is_some_and(|members| members.iter().any(|p| p.user_id == user_id))
    }
}

/// [`ChatStore`] kept entirely in process memory
///
/// Writes are announced on the paired [`MemoryChangeFeed`], which is what a
/// database trigger would do for a persistent backend.
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    feed: MemoryChangeFeed,
}

impl MemoryStore {
    pub fn new(feed: MemoryChangeFeed) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            feed,
        }
    }

    /// The feed this store publishes to
    pub fn feed(&self) -> &MemoryChangeFeed {
        &self.feed
    }

    /// Pending receipts still waiting on a recipient
    pub fn pending_receipts(&self) -> Vec<PendingReceipt> {
        self.inner.lock().pending.iter().cloned().collect()
    }

    /// Current read watermark of a participant
    pub fn watermark(&self, conversation_id: &str, user_id: &str) -> Option<i64> {
        let inner = self.inner.lock();
        inner
            .participants
            .get(conversation_id)?
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.last_seen_at)
    }

    fn publish_all(&self, notifications: Vec<(&'static str, String)>) {
        for (channel, payload) in notifications {
            self.feed.publish(channel, payload);
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Backend(e.to_string()))
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_message(&self, new: NewMessage) -> Result<Message, StoreError> {
        let mut notifications = Vec::new();
        let message = {
            let mut inner = self.inner.lock();

            let conversation_id = if new.is_group {
                match inner.conversations.get(&new.conversation_id) {
                    Some(conversation) if conversation.is_group => new.conversation_id.clone(),
                    _ => return Err(StoreError::not_found("conversation", &new.conversation_id)),
                }
            } else {
                let receiver = new
                    .receiver_id
                    .as_deref()
                    .ok_or_else(|| StoreError::not_found("receiver", ""))?;
                let id = direct_conversation_id(&new.sender_id, receiver);
                inner.ensure_conversation(&id, false, None);
                inner.add_participant(&id, &new.sender_id);
                inner.add_participant(&id, receiver);
                id
            };

            if !inner.is_member(&conversation_id, &new.sender_id) {
                return Err(StoreError::NotParticipant {
                    user_id: new.sender_id,
                    conversation_id,
                });
            }

            let members = inner.member_ids(&conversation_id);
            let message = Message {
                id: Uuid::new_v4().to_string(),
                body: new.body,
                conversation_id,
                sender_id: new.sender_id,
                sent_at: new.sent_at,
                created_at: inner.next_created_at(),
                sent_to_count: members.len() as u32,
                delivered_count: 1,
                seen_count: 1,
            };

            for member in members.into_iter().filter(|m| *m != message.sender_id) {
                let receipt = PendingReceipt {
                    message_id: message.id.clone(),
                    receiver_id: member,
                };
                notifications.push((CHAT_WRITTEN, encode(&receipt)?));
                inner.pending.insert(receipt);
            }

            inner.messages.insert(message.id.clone(), message.clone());
            message
        };

        self.publish_all(notifications);
        Ok(message)
    }

    async fn mark_received(
        &self,
        message_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<PendingReceipt>, StoreError> {
        let mut notifications = Vec::new();
        let removed = {
            let mut inner = self.inner.lock();
            let mut removed = Vec::new();

            for message_id in message_ids {
                let receipt = PendingReceipt {
                    message_id: message_id.clone(),
                    receiver_id: user_id.to_string(),
                };
                if !inner.pending.remove(&receipt) {
                    continue;
                }
                if let Some(message) = inner.messages.get_mut(message_id) {
                    if !message.fully_delivered() {
                        message.delivered_count += 1;
                    }
                    notifications.push((CHAT_RECEIVED, encode(&*message)?));
                }
                removed.push(receipt);
            }
            removed
        };

        self.publish_all(notifications);
        Ok(removed)
    }

    async fn update_seen(
        &self,
        conversation_id: &str,
        user_id: &str,
        time: i64,
    ) -> Result<(), StoreError> {
        let mut notifications = Vec::new();
        {
            let mut inner = self.inner.lock();

            let participant = inner
                .participants
                .get_mut(conversation_id)
                .and_then(|members| members.iter_mut().find(|p| p.user_id == user_id))
                .ok_or_else(|| StoreError::NotParticipant {
                    user_id: user_id.to_string(),
                    conversation_id: conversation_id.to_string(),
                })?;

            let previous = participant.last_seen_at;
            if time < previous {
                return Err(StoreError::StaleWatermark {
                    current: previous,
                    requested: time,
                });
            }
            if time == previous {
                return Ok(());
            }
            participant.last_seen_at = time;

            for message in inner.messages.values_mut() {
                if message.conversation_id != conversation_id
                    || message.sender_id == user_id
                    || message.created_at <= previous
                    || message.created_at > time
                {
                    continue;
                }
                if !message.fully_seen() {
                    message.seen_count += 1;
                    notifications.push((CHAT_READ, encode(&*message)?));
                }
            }
        }

        self.publish_all(notifications);
        Ok(())
    }

    async fn participants(&self, conversation_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        if !inner.conversations.contains_key(conversation_id) {
            return Err(StoreError::not_found("conversation", conversation_id));
        }
        Ok(inner.member_ids(conversation_id))
    }

    async fn message(&self, message_id: &str) -> Result<Message, StoreError> {
        self.inner
            .lock()
            .messages
            .get(message_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("message", message_id))
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError> {
        self.inner
            .lock()
            .conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("conversation", conversation_id))
    }

    async fn is_participant(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.inner.lock().is_member(conversation_id, user_id))
    }

    async fn create_direct_conversation(
        &self,
        a: &str,
        b: &str,
    ) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock();
        let id = direct_conversation_id(a, b);
        let conversation = inner.ensure_conversation(&id, false, None);
        inner.add_participant(&id, a);
        inner.add_participant(&id, b);
        Ok(conversation)
    }

    async fn create_group_conversation(
        &self,
        owner_id: &str,
        members: &[String],
    ) -> Result<Conversation, StoreError> {
        let mut inner = self.inner.lock();
        let id = Uuid::new_v4().to_string();
        let conversation = inner.ensure_conversation(&id, true, Some(owner_id));
        inner.add_participant(&id, owner_id);
        for member in members {
            inner.add_participant(&id, member);
        }
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeFeed, Notification};
    use futures::StreamExt;
    use std::sync::Arc;

    fn store() -> MemoryStore {
        MemoryStore::new(MemoryChangeFeed::new(64))
    }

    fn direct(sender: &str, receiver: &str) -> NewMessage {
        NewMessage {
            body: "hello".to_string(),
            sender_id: sender.to_string(),
            conversation_id: String::new(),
            is_group: false,
            receiver_id: Some(receiver.to_string()),
            sent_at: 1,
        }
    }

    fn group(sender: &str, conversation_id: &str) -> NewMessage {
        NewMessage {
            body: "hello all".to_string(),
            sender_id: sender.to_string(),
            conversation_id: conversation_id.to_string(),
            is_group: true,
            receiver_id: None,
            sent_at: 1,
        }
    }

    #[tokio::test]
    async fn test_direct_message_creates_conversation_and_receipt() {
        let store = store();
        let message = store.create_message(direct("alice", "bob")).await.unwrap();

        assert_eq!(message.conversation_id, "5:alice:bob");
        assert_eq!(message.sent_to_count, 2);
        assert_eq!(message.delivered_count, 1);
        assert_eq!(message.seen_count, 1);
        assert!(store.is_participant("bob", "5:alice:bob").await.unwrap());
        assert_eq!(
            store.pending_receipts(),
            vec![PendingReceipt {
                message_id: message.id.clone(),
                receiver_id: "bob".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_create_message_emits_chat_written_per_recipient() {
        let store = store();
        let mut stream = store.feed().subscribe(&[CHAT_WRITTEN]).await.unwrap();
        let conversation = store
            .create_group_conversation("alice", &["bob".to_string(), "carol".to_string()])
            .await
            .unwrap();

        let message = store
            .create_message(group("alice", &conversation.id))
            .await
            .unwrap();
        assert_eq!(message.sent_to_count, 3);

        let mut receivers = Vec::new();
        for _ in 0..2 {
            let Notification { channel, payload } = stream.next().await.unwrap().unwrap();
            assert_eq!(channel, CHAT_WRITTEN);
            let receipt: PendingReceipt = serde_json::from_str(&payload).unwrap();
            assert_eq!(receipt.message_id, message.id);
            receivers.push(receipt.receiver_id);
        }
        receivers.sort();
        assert_eq!(receivers, vec!["bob", "carol"]);
    }

    #[tokio::test]
    async fn test_group_message_requires_existing_conversation() {
        let store = store();
        let err = store
            .create_message(group("alice", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_group_message_rejects_non_member() {
        let store = store();
        let conversation = store
            .create_group_conversation("alice", &["bob".to_string()])
            .await
            .unwrap();
        let err = store
            .create_message(group("mallory", &conversation.id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotParticipant { .. }));
    }

    #[tokio::test]
    async fn test_mark_received_is_idempotent() {
        let store = store();
        let message = store.create_message(direct("alice", "bob")).await.unwrap();
        let ids = vec![message.id.clone()];

        let first = store.mark_received(&ids, "bob").await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.mark_received(&ids, "bob").await.unwrap();
        assert!(second.is_empty());

        let stored = store.message(&message.id).await.unwrap();
        assert_eq!(stored.delivered_count, 2);
        assert!(stored.fully_delivered());
    }

    #[tokio::test]
    async fn test_mark_received_emits_full_message() {
        let store = store();
        let message = store.create_message(direct("alice", "bob")).await.unwrap();
        let mut stream = store.feed().subscribe(&[CHAT_RECEIVED]).await.unwrap();

        store
            .mark_received(&[message.id.clone()], "bob")
            .await
            .unwrap();

        let notification = stream.next().await.unwrap().unwrap();
        let decoded: Message = serde_json::from_str(&notification.payload).unwrap();
        assert_eq!(decoded.id, message.id);
        assert_eq!(decoded.delivered_count, 2);
    }

    #[tokio::test]
    async fn test_update_seen_advances_watermark_and_counts() {
        let store = store();
        let message = store.create_message(direct("alice", "bob")).await.unwrap();
        let mut stream = store.feed().subscribe(&[CHAT_READ]).await.unwrap();

        store
            .update_seen("5:alice:bob", "bob", message.created_at)
            .await
            .unwrap();

        assert_eq!(store.watermark("5:alice:bob", "bob"), Some(message.created_at));
        let stored = store.message(&message.id).await.unwrap();
        assert_eq!(stored.seen_count, 2);
        let notification = stream.next().await.unwrap().unwrap();
        assert_eq!(notification.channel, CHAT_READ);
    }

    #[tokio::test]
    async fn test_update_seen_ignores_own_messages() {
        let store = store();
        let message = store.create_message(direct("alice", "bob")).await.unwrap();

        store
            .update_seen("5:alice:bob", "alice", message.created_at)
            .await
            .unwrap();

        let stored = store.message(&message.id).await.unwrap();
        assert_eq!(stored.seen_count, 1);
    }

    #[tokio::test]
    async fn test_update_seen_rejects_stale_watermark() {
        let store = store();
        let message = store.create_message(direct("alice", "bob")).await.unwrap();
        store
            .update_seen("5:alice:bob", "bob", message.created_at)
            .await
            .unwrap();

        let err = store
            .update_seen("5:alice:bob", "bob", message.created_at - 1)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::StaleWatermark {
                current: message.created_at,
                requested: message.created_at - 1,
            }
        );

        // Same watermark again is accepted and counts nothing twice
        store
            .update_seen("5:alice:bob", "bob", message.created_at)
            .await
            .unwrap();
        assert_eq!(store.message(&message.id).await.unwrap().seen_count, 2);
    }

    #[tokio::test]
    async fn test_update_seen_requires_membership() {
        let store = store();
        store.create_direct_conversation("alice", "bob").await.unwrap();
        let err = store
            .update_seen("5:alice:bob", "mallory", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotParticipant { .. }));
    }

    #[tokio::test]
    async fn test_participants_lists_members() {
        let store = store();
        let conversation = store.create_direct_conversation("bob", "alice").await.unwrap();
        assert_eq!(conversation.id, "5:alice:bob");

        let members = store.participants(&conversation.id).await.unwrap();
        assert_eq!(members, vec!["bob", "alice"]);
        assert!(!store.conversation(&conversation.id).await.unwrap().is_group);
        assert!(store.participants("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_separator_in_user_id_keeps_threads_apart() {
        let store = store();
        let first = store.create_message(direct("a:b", "c")).await.unwrap();
        let second = store.create_message(direct("a", "b:c")).await.unwrap();

        assert_ne!(first.conversation_id, second.conversation_id);
        assert!(!store.is_participant("a", &first.conversation_id).await.unwrap());
        assert!(!store.is_participant("c", &second.conversation_id).await.unwrap());

        let mut receivers: Vec<String> = store
            .pending_receipts()
            .into_iter()
            .filter(|r| r.message_id == second.id)
            .map(|r| r.receiver_id)
            .collect();
        receivers.sort();
        assert_eq!(receivers, vec!["b:c"]);
    }

    #[tokio::test]
    async fn test_seen_count_is_capped() {
        let store = store();
        let message = store.create_message(direct("alice", "bob")).await.unwrap();
        let conversation = message.conversation_id.clone();

        store
            .update_seen(&conversation, "bob", message.created_at)
            .await
            .unwrap();
        let seen = store.message(&message.id).await.unwrap();
        assert!(seen.fully_seen());

        // Rewind bob's watermark so the message falls in range again
        store.inner.lock().participants.get_mut(&conversation).unwrap()[1].last_seen_at = 0;
        store
            .update_seen(&conversation, "bob", message.created_at + 1)
            .await
            .unwrap();
        assert_eq!(store.message(&message.id).await.unwrap().seen_count, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_watermark_is_monotonic_under_concurrency() {
        let store = Arc::new(store());
        let message = store.create_message(direct("alice", "bob")).await.unwrap();
        let conversation = message.conversation_id.clone();

        // 1..=50 visited in a scrambled order around the message timestamp
        let times: Vec<i64> = (0..50)
            .map(|i| message.created_at - 25 + ((i * 37) % 50) as i64)
            .collect();
        let max = *times.iter().max().unwrap();

        let watcher = {
            let store = Arc::clone(&store);
            let conversation = conversation.clone();
            tokio::spawn(async move {
                let mut last = 0;
                for _ in 0..2_000 {
                    let current = store.watermark(&conversation, "bob").unwrap();
                    assert!(current >= last, "watermark went back from {last} to {current}");
                    last = current;
                    tokio::task::yield_now().await;
                }
            })
        };

        let calls: Vec<_> = times
            .iter()
            .map(|&time| {
                let store = Arc::clone(&store);
                let conversation = conversation.clone();
                tokio::spawn(async move {
                    let outcome = store.update_seen(&conversation, "bob", time).await;
                    let after = store.watermark(&conversation, "bob").unwrap();
                    (time, outcome, after)
                })
            })
            .collect();

        for call in calls {
            let (time, outcome, after) = call.await.unwrap();
            match outcome {
                Ok(()) => assert!(after >= time),
                Err(StoreError::StaleWatermark { current, requested }) => {
                    assert_eq!(requested, time);
                    assert!(current > time);
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        watcher.await.unwrap();

        assert_eq!(store.watermark(&conversation, "bob"), Some(max));
        assert_eq!(store.message(&message.id).await.unwrap().seen_count, 2);
    }
}
