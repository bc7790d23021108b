use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Integer discriminant carried in the `type` field of every hub message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
    Close = 7,
}

/// First frame sent after the transport opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct HandshakeRequest {
    pub protocol: String,
    pub version: i32,
}

impl HandshakeRequest {
    pub(crate) fn new(protocol: String, version: i32) -> Self {
        HandshakeRequest { protocol, version }
    }
}

/// The server's answer to the handshake request: `{}` on success,
/// `{"error": ...}` on rejection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct HandshakeResponse {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PingMessage {
    #[serde(rename = "type")]
    pub(crate) message_type: MessageType,
}

impl PingMessage {
    pub(crate) fn new() -> Self {
        PingMessage { message_type: MessageType::Ping }
    }
}

/// Body of the `POST {base}/negotiate` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NegotiateResponse {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connection_token: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    pub negotiate_version: Option<u32>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    /// Redirect target; when present the negotiation is re-run against it.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl NegotiateResponse {
    /// The value of the `id` query parameter for transport endpoints.
    /// Servers speaking negotiate version 1 hand out a connection token that
    /// replaces the connection id on the wire.
    pub(crate) fn transport_connection_id(&self) -> Option<&String> {
        self.connection_token.as_ref().or(self.connection_id.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}
