//! Outbound fanout bridge
//!
//! Listens on the store's change feed and turns message-state notifications
//! into pushes for whichever sessions of the affected user live on this
//! instance. Users connected elsewhere are served by that instance's own
//! bridge.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::store::feed::{CHAT_READ, CHAT_RECEIVED, CHAT_WRITTEN};
use crate::store::{ChangeFeed, ChatStore, Notification, StoreError};
use crate::types::{Message, PendingReceipt};
use crate::utils::current_timestamp_nanos;

use super::events::{OutgoingChatPayload, ReceiptUpdatePayload};
use super::registry::ConnectionRegistry;

/// Channels the bridge subscribes to
pub const CHANNELS: [&str; 3] = [CHAT_WRITTEN, CHAT_RECEIVED, CHAT_READ];

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("unknown channel {0}")]
    UnknownChannel(String),

    #[error("undecodable payload on {channel}: {source}")]
    Decode {
        channel: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

#[derive(Clone, Copy)]
enum Receipt {
    Delivered,
    Read,
}

pub struct FanoutBridge {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    backoff: Duration,
}

impl FanoutBridge {
    pub fn new(store: Arc<dyn ChatStore>, registry: Arc<ConnectionRegistry>, backoff: Duration) -> Self {
        Self {
            store,
            registry,
            backoff,
        }
    }

    /// Route one notification, returning how many sessions were targeted
    pub async fn handle(&self, notification: &Notification) -> Result<usize, FanoutError> {
        let decode_err = |source| FanoutError::Decode {
            channel: notification.channel.clone(),
            source,
        };

        match notification.channel.as_str() {
            CHAT_WRITTEN => {
                let receipt: PendingReceipt =
                    serde_json::from_str(&notification.payload).map_err(decode_err)?;
                let message = self.store.message(&receipt.message_id).await?;
                let conversation = self.store.conversation(&message.conversation_id).await?;

                let payload = Arc::new(OutgoingChatPayload::from_message(
                    &message,
                    &receipt.receiver_id,
                    conversation.is_group,
                ));
                Ok(self.registry.push_with(&receipt.receiver_id, move |session| {
                    let payload = Arc::clone(&payload);
                    async move { session.send_chat(&payload).await }
                }))
            }
            CHAT_RECEIVED => {
                let message: Message =
                    serde_json::from_str(&notification.payload).map_err(decode_err)?;
                Ok(self.push_receipt(Receipt::Delivered, &message))
            }
            CHAT_READ => {
                let message: Message =
                    serde_json::from_str(&notification.payload).map_err(decode_err)?;
                Ok(self.push_receipt(Receipt::Read, &message))
            }
            other => Err(FanoutError::UnknownChannel(other.to_string())),
        }
    }

    /// Delivered and read updates go back to the message sender
    fn push_receipt(&self, receipt: Receipt, message: &Message) -> usize {
        let payload = Arc::new(ReceiptUpdatePayload {
            message_id: message.id.clone(),
            receiver_id: message.sender_id.clone(),
            time: current_timestamp_nanos(),
        });
        self.registry.push_with(&message.sender_id, move |session| {
            let payload = Arc::clone(&payload);
            async move {
                match receipt {
                    Receipt::Delivered => session.send_delivered_update(&payload).await,
                    Receipt::Read => session.send_read_update(&payload).await,
                }
            }
        })
    }

    /// Consume the change feed until cancelled
    ///
    /// A failed or ended subscription is retried after the backoff delay.
    pub async fn run(self: Arc<Self>, feed: Arc<dyn ChangeFeed>, cancel: CancellationToken) {
        loop {
            match feed.subscribe(&CHANNELS).await {
                Ok(mut stream) => {
                    info!("fanout bridge subscribed to change feed");
                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => return,
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(notification)) => match self.handle(&notification).await {
                                Ok(targets) => {
                                    debug!(channel = %notification.channel, targets, "notification routed")
                                }
                                Err(e) => {
                                    warn!(channel = %notification.channel, error = %e, "notification dropped")
                                }
                            },
                            Some(Err(e)) => warn!(error = %e, "change feed error"),
                            None => {
                                warn!("change feed subscription ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => error!(error = %e, "change feed subscription failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}
