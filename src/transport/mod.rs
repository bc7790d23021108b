pub(crate) mod long_polling;
pub(crate) mod websockets;

use crate::errors::HubError;

pub(crate) use long_polling::LongPollingTransport;
pub(crate) use websockets::WebSocketsTransport;

/// Transports the client knows how to drive, in no particular order; the
/// server's preference order decides which one is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSockets,
    LongPolling,
}

impl TransportKind {
    /// The transport name as it appears in the negotiate exchange.
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::WebSockets => "WebSockets",
            TransportKind::LongPolling => "LongPolling",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "WebSockets" => Some(TransportKind::WebSockets),
            "LongPolling" => Some(TransportKind::LongPolling),
            _ => None,
        }
    }
}

/// Events a running transport feeds upward, in arrival order. A successful
/// constructor return is the "open" signal; after that the transport emits any
/// number of `Received` events and exactly one `Closed`.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Received(String),
    Closed(Option<HubError>),
}

/// The one concrete transport a connection currently drives.
pub(crate) enum ActiveTransport {
    WebSockets(WebSocketsTransport),
    LongPolling(LongPollingTransport),
}

impl ActiveTransport {
    pub(crate) async fn send(&mut self, data: String) -> Result<(), HubError> {
        match self {
            ActiveTransport::WebSockets(transport) => transport.send(data).await,
            ActiveTransport::LongPolling(transport) => transport.send(data).await,
        }
    }

    pub(crate) async fn stop(&mut self) {
        match self {
            ActiveTransport::WebSockets(transport) => transport.stop().await,
            ActiveTransport::LongPolling(transport) => transport.stop().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for kind in [TransportKind::WebSockets, TransportKind::LongPolling] {
            assert_eq!(TransportKind::from_name(kind.name()), Some(kind));
        }

        assert_eq!(TransportKind::from_name("ServerSentEvents"), None);
    }
}
