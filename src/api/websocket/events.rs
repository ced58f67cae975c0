//! WebSocket wire protocol: envelopes, acknowledgments and typed payloads

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::Message;
use crate::utils::current_timestamp_nanos;

/// Numeric event type carried in every envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum EventType {
    Unknown = 0,
    Ack = 1,
    IncomingChatMessage = 2,
    IncomingDeliveredUpdate = 3,
    IncomingReadUpdate = 4,
    OutgoingChatMessage = 5,
    OutgoingReadUpdate = 6,
    OutgoingDeliveredUpdate = 7,
    UserStatusChange = 8,
    NotifyFriendStatusChange = 9,
    FailedMessageRetry = 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown event type code {0}")]
pub struct UnknownEventType(pub u8);

impl TryFrom<u8> for EventType {
    type Error = UnknownEventType;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => EventType::Unknown,
            1 => EventType::Ack,
            2 => EventType::IncomingChatMessage,
            3 => EventType::IncomingDeliveredUpdate,
            4 => EventType::IncomingReadUpdate,
            5 => EventType::OutgoingChatMessage,
            6 => EventType::OutgoingReadUpdate,
            7 => EventType::OutgoingDeliveredUpdate,
            8 => EventType::UserStatusChange,
            9 => EventType::NotifyFriendStatusChange,
            10 => EventType::FailedMessageRetry,
            other => return Err(UnknownEventType(other)),
        })
    }
}

impl From<EventType> for u8 {
    fn from(event_type: EventType) -> Self {
        event_type as u8
    }
}

/// Wire unit exchanged in both directions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Client-assigned correlation id, echoed back in the acknowledgment
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub payload: Value,

    /// Informational retry counter set by the client
    #[serde(default)]
    pub retry: u32,
}

impl Envelope {
    /// Build an envelope with a serialized payload
    pub fn new<T: Serialize>(
        event_type: EventType,
        id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type,
            id: id.into(),
            payload: serde_json::to_value(payload)?,
            retry: 0,
        })
    }

    /// Acknowledgment envelope echoing `id`
    pub fn ack(id: impl Into<String>, ack: &Acknowledge) -> Self {
        Self {
            event_type: EventType::Ack,
            id: id.into(),
            payload: ack.to_value(),
            retry: 0,
        }
    }

    /// Decode the payload as the type expected for this event
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// Outcome of one inbound event, sent back exactly once
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledge {
    pub event_type: EventType,
    pub status: bool,
    pub message: String,
    /// Server time in Unix nanoseconds
    pub ack_time: i64,
}

impl Acknowledge {
    pub fn success(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            status: true,
            message: message.into(),
            ack_time: current_timestamp_nanos(),
        }
    }

    pub fn failure(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            status: false,
            ..Self::success(event_type, message)
        }
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "event_type": u8::from(self.event_type),
            "status": self.status,
            "message": self.message,
            "ack_time": self.ack_time,
        })
    }
}

// ============================================================================
// Inbound payloads
// ============================================================================

/// Payload of `INCOMING_CHAT_MESSAGE`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingChatPayload {
    /// Client-side message id
    #[serde(default)]
    pub id: String,
    pub message_body: String,
    pub sender_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub sent_at: i64,
}

/// Payload of `INCOMING_DELIVERED_UPDATE`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingDeliveredPayload {
    pub message_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub time: i64,
}

/// Payload of `INCOMING_READ_UPDATE`
///
/// `sender_id` is the reader; `time` becomes their read watermark.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingReadPayload {
    #[serde(default)]
    pub id: String,
    pub sender_id: String,
    pub conversation_id: String,
    pub time: i64,
}

// ============================================================================
// Outbound payloads
// ============================================================================

/// Payload of `OUTGOING_CHAT_MESSAGE`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingChatPayload {
    pub id: String,
    pub message_body: String,
    pub sender_id: String,
    pub conversation_id: String,
    pub sent_at: i64,
    pub receiver_id: String,
    pub is_group: bool,
    pub server_receive_time: i64,
}

impl OutgoingChatPayload {
    /// Build the push for one recipient of a stored message
    pub fn from_message(message: &Message, receiver_id: &str, is_group: bool) -> Self {
        Self {
            id: message.id.clone(),
            message_body: message.body.clone(),
            sender_id: message.sender_id.clone(),
            conversation_id: message.conversation_id.clone(),
            sent_at: message.sent_at,
            receiver_id: receiver_id.to_string(),
            is_group,
            server_receive_time: message.created_at,
        }
    }
}

/// Payload of `OUTGOING_DELIVERED_UPDATE` and `OUTGOING_READ_UPDATE`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptUpdatePayload {
    pub message_id: String,
    pub receiver_id: String,
    pub time: i64,
}
