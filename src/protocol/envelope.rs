//! Outbound envelope model: every frame the server writes to a socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ========================================
// ERROR CODES
// ========================================

pub const ERR_MISSING_TOPIC: &str = "MISSING_TOPIC";
pub const ERR_MISSING_MESSAGE: &str = "MISSING_MESSAGE";
pub const ERR_MISSING_MESSAGE_ID: &str = "MISSING_MESSAGE_ID";
pub const ERR_TOPIC_NOT_FOUND: &str = "TOPIC_NOT_FOUND";
pub const ERR_NOT_SUBSCRIBED: &str = "NOT_SUBSCRIBED";
pub const ERR_UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
pub const ERR_INVALID_JSON: &str = "INVALID_JSON";
pub const ERR_BUFFER_OVERFLOW: &str = "BUFFER_OVERFLOW";

// ========================================
// MESSAGE
// ========================================

/// A single pub/sub message. The `id` is client-chosen and opaque to the
/// broker; the payload may be any JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { id: id.into(), payload }
    }
}

// ========================================
// ENVELOPE
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Welcome,
    Ack,
    Error,
    Pong,
    Message,
    TopicDeleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// The unit of write ordering: exactly one envelope per socket frame.
/// Optional fields are omitted on the wire when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped: Option<u64>,
    pub ts: DateTime<Utc>,
}

impl Envelope {
    fn base(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            request_id: None,
            topic: None,
            message: None,
            error: None,
            client_id: None,
            reason: None,
            delivered: None,
            dropped: None,
            ts: Utc::now(),
        }
    }

    /// First frame on every session, carrying the server-assigned client id.
    pub fn welcome(client_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            ..Self::base(EnvelopeKind::Welcome)
        }
    }

    pub fn ack(request_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            request_id: request_id.map(str::to_string),
            reason: Some(reason.into()),
            ..Self::base(EnvelopeKind::Ack)
        }
    }

    /// Ack for a publish request, carrying the fan-out outcome.
    pub fn publish_ack(request_id: Option<&str>, delivered: u64, dropped: u64) -> Self {
        Self {
            request_id: request_id.map(str::to_string),
            reason: Some("published".to_string()),
            delivered: Some(delivered),
            dropped: Some(dropped),
            ..Self::base(EnvelopeKind::Ack)
        }
    }

    pub fn error(request_id: Option<&str>, code: &str, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.map(str::to_string),
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
            ..Self::base(EnvelopeKind::Error)
        }
    }

    pub fn pong(request_id: Option<&str>) -> Self {
        Self {
            request_id: request_id.map(str::to_string),
            ..Self::base(EnvelopeKind::Pong)
        }
    }

    /// A published message fanned out to one subscriber.
    pub fn message(topic: &str, message: Message) -> Self {
        Self {
            topic: Some(topic.to_string()),
            message: Some(message),
            ..Self::base(EnvelopeKind::Message)
        }
    }

    pub fn topic_deleted(topic: &str) -> Self {
        Self {
            topic: Some(topic.to_string()),
            ..Self::base(EnvelopeKind::TopicDeleted)
        }
    }
}
