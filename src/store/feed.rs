//! Change-feed subscription abstraction
//!
//! Storage announces writes on named channels. Every server instance sharing
//! the store subscribes independently, which is the only coordination between
//! instances: no message is ever routed peer-to-peer.

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast;

/// A message was written; payload is a [`PendingReceipt`](crate::types::PendingReceipt)
pub const CHAT_WRITTEN: &str = "chat_written";

/// A recipient received a message; payload is the full [`Message`](crate::types::Message)
pub const CHAT_RECEIVED: &str = "chat_received";

/// A recipient saw a message; payload is the full [`Message`](crate::types::Message)
pub const CHAT_READ: &str = "chat_read";

/// A `(channel, payload)` pair delivered by the change feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("subscriber lagged behind by {0} notifications")]
    Lagged(u64),

    #[error("change feed backend error: {0}")]
    Backend(String),
}

/// Stream of notifications for one subscription
pub type NotificationStream = Pin<Box<dyn Stream<Item = Result<Notification, FeedError>> + Send>>;

/// Publish/subscribe primitive the fanout bridge listens on
///
/// A database `LISTEN/NOTIFY` connection, a message broker topic or the
/// in-process [`MemoryChangeFeed`] all fit behind this trait.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to the given channels
    ///
    /// The stream ends when the underlying connection is lost; callers are
    /// expected to resubscribe.
    async fn subscribe(&self, channels: &[&str]) -> Result<NotificationStream, FeedError>;
}

/// In-process change feed backed by a broadcast channel
#[derive(Clone)]
pub struct MemoryChangeFeed {
    tx: broadcast::Sender<Notification>,
}

impl MemoryChangeFeed {
    /// Create a feed that buffers up to `capacity` notifications per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notification to every current subscriber
    pub fn publish(&self, channel: &str, payload: String) {
        // No subscribers is fine: nothing is listening yet.
        let _ = self.tx.send(Notification::new(channel, payload));
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryChangeFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn subscribe(&self, channels: &[&str]) -> Result<NotificationStream, FeedError> {
        let mut rx = self.tx.subscribe();
        let wanted: HashSet<String> = channels.iter().map(|c| c.to_string()).collect();

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        if wanted.contains(&notification.channel) {
                            yield Ok(notification);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(FeedError::Lagged(n));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
