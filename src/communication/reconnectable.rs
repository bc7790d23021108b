use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use log::{info, warn};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};

use crate::client::ConnectionConfiguration;
use crate::communication::connection::HttpConnection;
use crate::communication::reconnection::RetryContext;
use crate::communication::ConnectionEvent;
use crate::errors::HubError;
use crate::transport::TransportEvent;

/// Wraps [`HttpConnection`] behind the same duplex contract and rebuilds it
/// through the negotiator when it drops unexpectedly, following the
/// configured reconnection policy. The layers above only ever observe the
/// event stream: `Received`, `WillReconnect`, `Reconnected`, `Closed`.
pub(crate) struct ReconnectableConnection {
    inner: Arc<ReconnectableInner>,
}

impl Clone for ReconnectableConnection {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

struct ReconnectableInner {
    configuration: ConnectionConfiguration,
    events: UnboundedSender<ConnectionEvent>,
    /// The live lower connection; `None` while disconnected or mid-rebuild.
    link: Mutex<Option<HttpConnection>>,
    connection_id: StdMutex<Option<String>>,
    stopping: AtomicBool,
    stop_signal: Notify,
    /// Error to report for a close this side provoked via `force_close`.
    induced_error: StdMutex<Option<HubError>>,
}

impl ReconnectableConnection {
    pub(crate) fn new(configuration: ConnectionConfiguration, events: UnboundedSender<ConnectionEvent>) -> Self {
        ReconnectableConnection {
            inner: Arc::new(ReconnectableInner {
                configuration,
                events,
                link: Mutex::new(None),
                connection_id: StdMutex::new(None),
                stopping: AtomicBool::new(false),
                stop_signal: Notify::new(),
                induced_error: StdMutex::new(None),
            }),
        }
    }

    /// First connect. Failures surface to the caller and are never retried;
    /// the reconnect machinery only covers a connection that dropped after it
    /// was established.
    pub(crate) async fn start(&self) -> Result<(), HubError> {
        let (transport_events, receiver) = unbounded_channel();
        let connection = HttpConnection::open(&self.inner.configuration, transport_events).await?;

        *self.inner.connection_id.lock().unwrap() = connection.connection_id().cloned();
        *self.inner.link.lock().await = Some(connection);

        tokio::spawn(Self::run_relay(self.clone(), receiver));

        Ok(())
    }

    /// The id produced by the most recent successful negotiation; not stable
    /// across a reconnect.
    pub(crate) fn connection_id(&self) -> Option<String> {
        self.inner.connection_id.lock().unwrap().clone()
    }

    pub(crate) async fn send(&self, data: String) -> Result<(), HubError> {
        let mut link = self.inner.link.lock().await;

        match link.as_mut() {
            Some(connection) => connection.send(data).await,
            None => Err(HubError::NotConnected),
        }
    }

    /// User-initiated close: suppresses any current or future reconnect
    /// attempt, then tears the transport down.
    pub(crate) async fn stop(&self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.stop_signal.notify_waiters();

        let connection = self.inner.link.lock().await.take();
        if let Some(mut connection) = connection {
            connection.stop().await;
        }
    }

    /// Closes the transport as if it had failed, so the drop flows through
    /// the reconnection policy carrying `error` as the reason. Used for
    /// keepalive timeouts and server closes that allow reconnecting.
    pub(crate) async fn force_close(&self, error: HubError) {
        *self.inner.induced_error.lock().unwrap() = Some(error);

        let mut link = self.inner.link.lock().await;
        if let Some(connection) = link.as_mut() {
            connection.stop().await;
        }
    }

    async fn run_relay(connection: ReconnectableConnection, mut events: UnboundedReceiver<TransportEvent>) {
        let inner = connection.inner;

        loop {
            // relay inbound traffic until the transport dies
            let close_error = loop {
                match events.recv().await {
                    Some(TransportEvent::Received(payload)) => {
                        if inner.events.send(ConnectionEvent::Received(payload)).is_err() {
                            return;
                        }
                    }
                    Some(TransportEvent::Closed(error)) => break error,
                    None => break None,
                }
            };

            if inner.stopping.load(Ordering::SeqCst) {
                let _ = inner.events.send(ConnectionEvent::Closed(None));
                return;
            }

            let induced = inner.induced_error.lock().unwrap().take();
            let mut last_error = induced.or(close_error).unwrap_or(HubError::ConnectionLost);

            *inner.link.lock().await = None;

            let policy = inner.configuration.reconnection_policy();
            let disconnected_at = Instant::now();
            let mut retry_count: u32 = 0;
            let mut announced = false;

            events = loop {
                let context = RetryContext {
                    retry_count,
                    elapsed: disconnected_at.elapsed(),
                    error: last_error.clone(),
                };

                let Some(delay) = policy.next_retry_delay(&context) else {
                    info!("Reconnection given up after {} attempts", retry_count);
                    let _ = inner.events.send(ConnectionEvent::Closed(Some(last_error)));
                    return;
                };

                if !announced {
                    announced = true;
                    let _ = inner.events.send(ConnectionEvent::WillReconnect(last_error.clone()));
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = inner.stop_signal.notified() => {
                        let _ = inner.events.send(ConnectionEvent::Closed(None));
                        return;
                    }
                }

                if inner.stopping.load(Ordering::SeqCst) {
                    let _ = inner.events.send(ConnectionEvent::Closed(None));
                    return;
                }

                info!("Reconnecting (attempt {})...", retry_count + 1);
                let (transport_events, receiver) = unbounded_channel();

                match HttpConnection::open(&inner.configuration, transport_events).await {
                    Ok(mut new_connection) => {
                        if inner.stopping.load(Ordering::SeqCst) {
                            new_connection.stop().await;
                            let _ = inner.events.send(ConnectionEvent::Closed(None));
                            return;
                        }

                        let connection_id = new_connection.connection_id().cloned();
                        *inner.connection_id.lock().unwrap() = connection_id.clone();
                        *inner.link.lock().await = Some(new_connection);

                        info!("Reconnected successfully");
                        let _ = inner.events.send(ConnectionEvent::Reconnected { connection_id });
                        break receiver;
                    }
                    Err(error) => {
                        warn!("Reconnection attempt failed: {}", error);
                        retry_count += 1;
                        last_error = error;
                    }
                }
            };
        }
    }
}
