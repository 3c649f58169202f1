//! Inbound client frames: one JSON request per socket frame.

use serde::{Deserialize, Serialize};

use crate::protocol::envelope::Message;

// ========================================
// REQUEST TYPES
// ========================================

pub const MSG_SUBSCRIBE: &str = "subscribe";
pub const MSG_UNSUBSCRIBE: &str = "unsubscribe";
pub const MSG_PUBLISH: &str = "publish";
pub const MSG_PING: &str = "ping";

/// Raw client request. The `type` field is kept as a string so an
/// unrecognized value is reported as `UNKNOWN_TYPE` instead of being
/// indistinguishable from a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type", default)]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_n: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

pub fn parse_frame(text: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str(text)
}
