//! The single error taxonomy for the crate.
//!
//! Every fallible operation returns `Result<_, HubError>`. Variants carry
//! `String`s (not `serde_json::Error`) so an error clones cleanly when one
//! failure fans out to many pending invocations.

use thiserror::Error;

/// All failures surfaced by the hub client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HubError {
    /// Negotiation with the server failed (fatal to `start`).
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// No transport was acceptable to both the server and the client.
    #[error("no compatible transport was offered by the server")]
    NoCompatibleTransport,

    /// The handshake did not complete within the allotted time.
    #[error("the handshake timed out")]
    HandshakeTimeout,

    /// The server rejected the handshake.
    #[error("the server rejected the handshake: {0}")]
    HandshakeRejected(String),

    /// A wire message could not be parsed.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The requested operation is not valid in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The client is not connected.
    #[error("the client is not connected")]
    NotConnected,

    /// The connection was lost.
    #[error("the connection was lost")]
    ConnectionLost,

    /// No message arrived within the server timeout window.
    #[error("the server timed out")]
    ServerTimeout,

    /// A transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server closed the connection with an error.
    #[error("the server closed the connection: {0}")]
    ServerClose(String),

    /// A hub method returned an error completion.
    #[error("hub error: {0}")]
    Hub(String),

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl HubError {
    /// Build a [`HubError::MalformedMessage`] from a JSON decode failure.
    ///
    /// Shaped for use as `result.map_err(HubError::malformed)`.
    pub(crate) fn malformed(error: serde_json::Error) -> Self {
        HubError::MalformedMessage(error.to_string())
    }

    /// Build a [`HubError::Serialization`] from a JSON (de)serialization failure.
    ///
    /// Shaped for use as `result.map_err(HubError::serialization)`.
    pub(crate) fn serialization(error: serde_json::Error) -> Self {
        HubError::Serialization(error.to_string())
    }
}
