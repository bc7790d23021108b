use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::client::ConnectionConfiguration;
use crate::communication::negotiation;
use crate::errors::HubError;
use crate::transport::{ActiveTransport, LongPollingTransport, TransportEvent, TransportKind, WebSocketsTransport};

/// One negotiated transport session. `open` runs the negotiate exchange,
/// builds the selected transport and returns once it is ready to send;
/// inbound traffic flows through the supplied event channel.
pub(crate) struct HttpConnection {
    transport: ActiveTransport,
    connection_id: Option<String>,
}

impl HttpConnection {
    pub(crate) async fn open(
        configuration: &ConnectionConfiguration,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<Self, HubError> {
        let negotiated = negotiation::negotiate(configuration).await?;
        info!(
            "Opening {} connection to {}",
            negotiated.kind.name(),
            negotiated.endpoint
        );

        let transport = match negotiated.kind {
            TransportKind::WebSockets => {
                let endpoint = negotiated.socket_endpoint()?;
                ActiveTransport::WebSockets(WebSocketsTransport::connect(endpoint, events).await?)
            }
            TransportKind::LongPolling => ActiveTransport::LongPolling(LongPollingTransport::start(
                negotiated.endpoint.clone(),
                negotiated.authentication.clone(),
                events,
            )),
        };

        Ok(HttpConnection {
            transport,
            connection_id: negotiated.connection_id,
        })
    }

    pub(crate) fn connection_id(&self) -> Option<&String> {
        self.connection_id.as_ref()
    }

    pub(crate) async fn send(&mut self, data: String) -> Result<(), HubError> {
        self.transport.send(data).await
    }

    pub(crate) async fn stop(&mut self) {
        self.transport.stop().await;
    }
}
