use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::client::Authentication;
use crate::communication::common::HttpClient;
use crate::errors::HubError;

use super::TransportEvent;

/// HTTP long polling fallback transport.
///
/// Reception is a loop of back-to-back GETs against the connection endpoint:
/// 200 with a body delivers hub records, 200 without a body is a poll timeout,
/// 204 means the server ended the connection. Sends are POSTs of one frame,
/// stopping issues a best-effort DELETE.
pub(crate) struct LongPollingTransport {
    url: String,
    authentication: Authentication,
    closed: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
    events: UnboundedSender<TransportEvent>,
}

impl LongPollingTransport {
    pub(crate) fn start(
        url: String,
        authentication: Authentication,
        events: UnboundedSender<TransportEvent>,
    ) -> Self {
        info!("Starting long polling against {}", url);

        let closed = Arc::new(AtomicBool::new(false));
        let poller = tokio::spawn(Self::run_poll_loop(
            url.clone(),
            authentication.clone(),
            events.clone(),
            closed.clone(),
        ));

        LongPollingTransport {
            url,
            authentication,
            closed,
            poller: Some(poller),
            events,
        }
    }

    async fn run_poll_loop(
        url: String,
        authentication: Authentication,
        events: UnboundedSender<TransportEvent>,
        closed: Arc<AtomicBool>,
    ) {
        let error = loop {
            if closed.load(Ordering::SeqCst) {
                break None;
            }

            let mut request = ehttp::Request::get(url.clone());
            HttpClient::apply_authentication(&mut request, &authentication);

            match HttpClient::fetch(request).await {
                Ok(response) if response.status == 200 => {
                    match response.text() {
                        Some(text) if !text.is_empty() => {
                            if events.send(TransportEvent::Received(text.to_string())).is_err() {
                                break None;
                            }
                        }
                        // empty 200 is a poll timeout, issue the next poll
                        _ => {}
                    }
                }
                Ok(response) if response.status == 204 => {
                    debug!("Long polling terminated by the server");
                    break None;
                }
                Ok(response) => {
                    break Some(HubError::Transport(format!("unexpected poll status {}", response.status)));
                }
                Err(error) => break Some(error),
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

        let mut request = ehttp::Request::post(self.url.clone(), data.into_bytes());
        request
            .headers
            .insert("Content-Type", "text/plain;charset=UTF-8".to_string());
        HttpClient::apply_authentication(&mut request, &self.authentication);

        let response = HttpClient::fetch(request).await?;
        if !response.ok {
            return Err(HubError::Transport(format!("send rejected with status {}", response.status)));
        }

        Ok(())
    }

    pub(crate) async fn stop(&mut self) {
        debug!("Stopping long polling transport");

        let already_closed = self.closed.swap(true, Ordering::SeqCst);

        if let Some(poller) = self.poller.take() {
            poller.abort();
        }

        if !already_closed {
            // tell the server the connection is done with it
            let mut request = ehttp::Request::get(self.url.clone());
            request.method = "DELETE".to_string();
            HttpClient::apply_authentication(&mut request, &self.authentication);
            if let Err(error) = HttpClient::fetch(request).await {
                debug!("DELETE of the polling connection failed: {}", error);
            }

            let _ = self.events.send(TransportEvent::Closed(None));
        }
    }
}

impl Drop for LongPollingTransport {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}
