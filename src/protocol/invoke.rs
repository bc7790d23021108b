use serde::{Deserialize, Serialize};

use super::negotiate::MessageType;

/// A method call addressed to the remote hub, or a server call addressed to a
/// registered client handler. `nonBlocking` marks fire-and-forget sends that
/// no completion will ever answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    #[serde(rename = "type")]
    pub(crate) message_type: MessageType,
    pub invocation_id: String,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<serde_json::Value>,
    #[serde(default)]
    pub non_blocking: bool,
}

impl InvocationMessage {
    pub(crate) fn new(
        invocation_id: String,
        target: String,
        arguments: Vec<serde_json::Value>,
        non_blocking: bool,
    ) -> Self {
        InvocationMessage {
            message_type: MessageType::Invocation,
            invocation_id,
            target,
            arguments,
            non_blocking,
        }
    }
}

/// Terminal event of an invocation or stream. Carries either a result or an
/// error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    #[serde(rename = "type")]
    pub(crate) message_type: MessageType,
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionMessage {
    #[cfg(test)]
    pub(crate) fn result(invocation_id: String, result: Option<serde_json::Value>) -> Self {
        CompletionMessage {
            message_type: MessageType::Completion,
            invocation_id,
            result,
            error: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn error(invocation_id: String, error: String) -> Self {
        CompletionMessage {
            message_type: MessageType::Completion,
            invocation_id,
            result: None,
            error: Some(error),
        }
    }
}
