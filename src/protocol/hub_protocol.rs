/// Protocol selection for the hub connection.
///
/// Only the text/JSON protocol is implemented; the enum keeps the handshake
/// and negotiation code honest about where the protocol name and transfer
/// format come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HubProtocolKind {
    #[default]
    Json,
}

impl HubProtocolKind {
    /// Returns the protocol name string used in the handshake request.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            HubProtocolKind::Json => "json",
        }
    }

    /// Returns the protocol version sent in the handshake request.
    pub fn version(&self) -> i32 {
        match self {
            HubProtocolKind::Json => 1,
        }
    }

    /// Returns the transfer format the transport must support.
    pub fn transfer_format(&self) -> &'static str {
        match self {
            HubProtocolKind::Json => "Text",
        }
    }
}
