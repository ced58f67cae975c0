//! Handlers for inbound chat events

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::store::{ChatStore, StoreError};
use crate::types::{direct_conversation_id, NewMessage};

use super::dispatch::{EventHandler, HandlerError};
use super::events::{Envelope, IncomingChatPayload, IncomingDeliveredPayload, IncomingReadPayload};
use super::session::Session;

const SUCCESS: &str = "success";
const ALREADY_DELIVERED: &str = "message already marked as delivered";

/// The identity claimed in a payload must be the session owner
fn ensure_identity(claimed: &str, session: &Session) -> Result<(), HandlerError> {
    if claimed == session.user_id() {
        Ok(())
    } else {
        Err(HandlerError::IdentityMismatch {
            claimed: claimed.to_string(),
        })
    }
}

/// `INCOMING_CHAT_MESSAGE`: persist a new message
pub struct ChatMessageHandler {
    store: Arc<dyn ChatStore>,
}

impl ChatMessageHandler {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ChatMessageHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        session: &Session,
    ) -> Result<&'static str, HandlerError> {
        let payload: IncomingChatPayload = envelope.decode_payload()?;
        ensure_identity(&payload.sender_id, session)?;

        let new = if payload.is_group {
            if payload.conversation_id.is_empty() {
                return Err(HandlerError::Invalid("conversation_id is required for group messages"));
            }
            match self
                .store
                .is_participant(&payload.sender_id, &payload.conversation_id)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    return Err(HandlerError::NotMember {
                        conversation_id: payload.conversation_id,
                        disconnect: false,
                    })
                }
                Err(e) => return Err(HandlerError::MembershipUnverified(e)),
            }
            NewMessage {
                body: payload.message_body,
                sender_id: payload.sender_id,
                conversation_id: payload.conversation_id,
                is_group: true,
                receiver_id: None,
                sent_at: payload.sent_at,
            }
        } else {
            if payload.receiver_id.is_empty() {
                return Err(HandlerError::Invalid("receiver_id is required for direct messages"));
            }
            if payload.receiver_id == payload.sender_id {
                return Err(HandlerError::Invalid("cannot send a direct message to yourself"));
            }
            NewMessage {
                body: payload.message_body,
                conversation_id: direct_conversation_id(&payload.sender_id, &payload.receiver_id),
                sender_id: payload.sender_id,
                is_group: false,
                receiver_id: Some(payload.receiver_id),
                sent_at: payload.sent_at,
            }
        };

        match self.store.create_message(new).await {
            Ok(message) => {
                debug!(message_id = %message.id, conversation_id = %message.conversation_id, "message stored");
                Ok(SUCCESS)
            }
            Err(StoreError::NotParticipant { conversation_id, .. }) => Err(HandlerError::NotMember {
                conversation_id,
                disconnect: false,
            }),
            Err(e) => Err(HandlerError::Store(e)),
        }
    }
}

/// `INCOMING_DELIVERED_UPDATE`: the recipient received a message
pub struct DeliveredReceiptHandler {
    store: Arc<dyn ChatStore>,
}

impl DeliveredReceiptHandler {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for DeliveredReceiptHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        session: &Session,
    ) -> Result<&'static str, HandlerError> {
        let payload: IncomingDeliveredPayload = envelope.decode_payload()?;
        ensure_identity(&payload.receiver_id, session)?;

        let removed = self
            .store
            .mark_received(std::slice::from_ref(&payload.message_id), &payload.receiver_id)
            .await
            .map_err(HandlerError::Store)?;

        if removed.is_empty() {
            Ok(ALREADY_DELIVERED)
        } else {
            Ok(SUCCESS)
        }
    }
}

/// `INCOMING_READ_UPDATE`: advance the reader's watermark
///
/// Unlike chat messages, a read receipt for a conversation the user is not
/// part of ends the session.
pub struct ReadReceiptHandler {
    store: Arc<dyn ChatStore>,
}

impl ReadReceiptHandler {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for ReadReceiptHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        session: &Session,
    ) -> Result<&'static str, HandlerError> {
        let payload: IncomingReadPayload = envelope.decode_payload()?;
        ensure_identity(&payload.sender_id, session)?;

        let not_member = || HandlerError::NotMember {
            conversation_id: payload.conversation_id.clone(),
            disconnect: true,
        };

        match self
            .store
            .is_participant(&payload.sender_id, &payload.conversation_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => return Err(not_member()),
            Err(e) => return Err(HandlerError::MembershipUnverified(e)),
        }

        match self
            .store
            .update_seen(&payload.conversation_id, &payload.sender_id, payload.time)
            .await
        {
            Ok(()) => Ok(SUCCESS),
            Err(StoreError::StaleWatermark { .. }) => Err(HandlerError::StaleWatermark),
            Err(StoreError::NotParticipant { .. }) => Err(not_member()),
            Err(e) => Err(HandlerError::Store(e)),
        }
    }
}
