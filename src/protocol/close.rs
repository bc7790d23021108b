use serde::{Deserialize, Serialize};

use super::negotiate::MessageType;

/// Server-initiated close. When `allowReconnect` is false the client must not
/// consult its reconnection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    #[serde(rename = "type")]
    pub(crate) message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub allow_reconnect: bool,
}
