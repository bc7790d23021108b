use serde::{Deserialize, Serialize};

use super::negotiate::MessageType;

/// Opens a server-to-client item stream; answered by a sequence of
/// `StreamItem`s and one terminal `Completion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInvocationMessage {
    #[serde(rename = "type")]
    pub(crate) message_type: MessageType,
    pub invocation_id: String,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
}

impl StreamInvocationMessage {
    pub(crate) fn new(invocation_id: String, target: String, arguments: Vec<serde_json::Value>) -> Self {
        StreamInvocationMessage {
            message_type: MessageType::StreamInvocation,
            invocation_id,
            target,
            arguments,
        }
    }
}

/// One item of an open stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItemMessage {
    #[serde(rename = "type")]
    pub(crate) message_type: MessageType,
    pub invocation_id: String,
    pub item: serde_json::Value,
}

impl StreamItemMessage {
    #[cfg(test)]
    pub(crate) fn new(invocation_id: String, item: serde_json::Value) -> Self {
        StreamItemMessage {
            message_type: MessageType::StreamItem,
            invocation_id,
            item,
        }
    }
}

/// Tells the server to tear down a stream; the client drops its bookkeeping
/// without waiting for an acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvocationMessage {
    #[serde(rename = "type")]
    pub(crate) message_type: MessageType,
    pub invocation_id: String,
}

impl CancelInvocationMessage {
    pub(crate) fn new(invocation_id: String) -> Self {
        CancelInvocationMessage {
            message_type: MessageType::CancelInvocation,
            invocation_id,
        }
    }
}
