use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http::Uri;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_native_tls::native_tls::TlsConnector;
use tokio_websockets::{ClientBuilder, MaybeTlsStream, Message, WebSocketStream};

use crate::errors::HubError;

use super::TransportEvent;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Duplex WebSocket transport. Text frames map one-to-one onto hub payloads;
/// a reader task relays them onto the event channel until the socket dies.
pub(crate) struct WebSocketsTransport {
    sink: WsSink,
    receiver: Option<JoinHandle<()>>,
    closed: Arc<AtomicBool>,
    events: UnboundedSender<TransportEvent>,
}

impl WebSocketsTransport {
    /// Connects to `endpoint`, negotiating TLS for `wss` schemes. Returning
    /// `Ok` means the socket is open and `send` may be called.
    pub(crate) async fn connect(endpoint: Uri, events: UnboundedSender<TransportEvent>) -> Result<Self, HubError> {
        info!("Connecting websocket to {}", endpoint);

        let stream = if endpoint.scheme_str() == Some("wss") {
            let connector = TlsConnector::new()
                .map_err(|e| HubError::Transport(format!("cannot create TLS connector: {}", e)))?;
            let connector = tokio_websockets::Connector::NativeTls(connector.into());

            ClientBuilder::from_uri(endpoint.clone()).connector(&connector).connect().await
        } else {
            ClientBuilder::from_uri(endpoint.clone()).connect().await
        };

        let (socket, _response) = stream.map_err(|e| HubError::Transport(e.to_string()))?;
        let (sink, stream) = socket.split();

        let closed = Arc::new(AtomicBool::new(false));
        let receiver = tokio::spawn(Self::run_receiver(stream, events.clone(), closed.clone()));

        Ok(WebSocketsTransport {
            sink,
            receiver: Some(receiver),
            closed,
            events,
        })
    }

    async fn run_receiver(mut stream: WsStream, events: UnboundedSender<TransportEvent>, closed: Arc<AtomicBool>) {
        let error = loop {
            match stream.next().await {
                Some(Ok(message)) => {
                    if let Some(text) = message.as_text() {
                        if events.send(TransportEvent::Received(text.to_string())).is_err() {
                            break None;
                        }
                    } else if message.is_binary() {
                        warn!("Ignoring binary frame on a text protocol connection");
                    }
                }
                Some(Err(error)) => break Some(HubError::Transport(error.to_string())),
                None => break None,
            }
        };

        if !closed.swap(true, Ordering::SeqCst) {
            let _ = events.send(TransportEvent::Closed(error));
        }
    }

    pub(crate) async fn send(&mut self, data: String) -> Result<(), HubError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HubError::NotConnected);
        }

        self.sink
            .send(Message::text(data))
            .await
            .map_err(|e| HubError::Transport(e.to_string()))
    }

    pub(crate) async fn stop(&mut self) {
        debug!("Stopping websocket transport");

        if let Err(error) = self.sink.close().await {
            debug!("Closing websocket sink failed: {}", error);
        }

        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }

        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Closed(None));
        }
    }
}

impl Drop for WebSocketsTransport {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}
