//! Event dispatch table
//!
//! Maps inbound event types to handlers and owns the acknowledgment
//! guarantee: every dispatched envelope produces exactly one ack on the
//! originating session, whatever the handler outcome.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{ChatStore, StoreError};

use super::events::{Acknowledge, Envelope, EventType};
use super::handlers::{ChatMessageHandler, DeliveredReceiptHandler, ReadReceiptHandler};
use super::registry::ConnectionRegistry;
use super::session::Session;

/// Why an inbound event was rejected
///
/// The display text is what the client receives in the failure ack.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unsupported event type")]
    Unsupported,

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("identity mismatch")]
    IdentityMismatch { claimed: String },

    #[error("user not part of conversation")]
    NotMember {
        conversation_id: String,
        disconnect: bool,
    },

    #[error("could not verify conversation membership")]
    MembershipUnverified(#[source] StoreError),

    #[error("{0}")]
    Invalid(&'static str),

    #[error("stale read watermark")]
    StaleWatermark,

    #[error("failed to store event")]
    Store(#[source] StoreError),
}

impl HandlerError {
    /// Authorization violations end the session after the ack
    pub fn disconnects(&self) -> bool {
        match self {
            HandlerError::IdentityMismatch { .. } => true,
            HandlerError::NotMember { disconnect, .. } => *disconnect,
            _ => false,
        }
    }
}

/// Handles one inbound event type
///
/// Returns the message of the success ack.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &Envelope,
        session: &Session,
    ) -> Result<&'static str, HandlerError>;
}

pub struct Dispatcher {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    /// Build the table with the chat, delivered and read handlers
    pub fn new(store: Arc<dyn ChatStore>, registry: Arc<ConnectionRegistry>) -> Self {
        let mut dispatcher = Self::empty(registry);
        dispatcher.register(
            EventType::IncomingChatMessage,
            Arc::new(ChatMessageHandler::new(Arc::clone(&store))),
        );
        dispatcher.register(
            EventType::IncomingDeliveredUpdate,
            Arc::new(DeliveredReceiptHandler::new(Arc::clone(&store))),
        );
        dispatcher.register(
            EventType::IncomingReadUpdate,
            Arc::new(ReadReceiptHandler::new(store)),
        );
        dispatcher
    }

    /// A table with no handlers registered
    pub fn empty(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            handlers: HashMap::new(),
            registry,
        }
    }

    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type, handler);
    }

    pub fn has_handler(&self, event_type: EventType) -> bool {
        self.handlers.contains_key(&event_type)
    }

    /// Run the handler for `envelope` and acknowledge the outcome
    pub async fn dispatch(&self, envelope: Envelope, session: Arc<Session>) {
        let event_type = envelope.event_type;
        let outcome = match self.handlers.get(&event_type) {
            Some(handler) => handler.handle(&envelope, &session).await,
            None => Err(HandlerError::Unsupported),
        };

        let (ack, disconnect) = match outcome {
            Ok(message) => (Acknowledge::success(event_type, message), false),
            Err(e) => {
                warn!(
                    session_id = session.id(),
                    user_id = %session.user_id(),
                    event_type = ?event_type,
                    error = %e,
                    "event rejected"
                );
                (Acknowledge::failure(event_type, e.to_string()), e.disconnects())
            }
        };

        if let Err(e) = session.send_ack(&envelope.id, &ack).await {
            debug!(session_id = session.id(), error = %e, "ack not queued");
        }

        if disconnect {
            warn!(session_id = session.id(), user_id = %session.user_id(), "forcing disconnect");
            self.registry.remove(&session);
        }
    }
}
