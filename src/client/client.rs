use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::communication::reconnectable::ReconnectableConnection;
use crate::communication::ConnectionEvent;
use crate::completer::{ManualFuture, ManualFutureCompleter, ManualStream};
use crate::errors::HubError;
use crate::execution::{ArgumentConfiguration, CallbackFn, CallbackRegistry, InvocationRegistry};
use crate::protocol::hub_protocol::HubProtocolKind;
use crate::protocol::invoke::InvocationMessage;
use crate::protocol::messages::{HubMessage, MessageParser, RECORD_SEPARATOR};
use crate::protocol::streaming::{CancelInvocationMessage, StreamInvocationMessage};

use super::{ConnectionConfiguration, InvocationContext};

/// The authoritative lifecycle state of a hub client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopping,
}

/// Connection lifecycle notifications. All methods default to no-ops so a
/// delegate only implements what it cares about.
pub trait HubClientDelegate: Send + Sync {
    fn on_opened(&self, _client: &HubClient) {}
    fn on_failed_to_open(&self, _error: &HubError) {}
    fn on_closed(&self, _error: Option<&HubError>) {}
    fn on_will_reconnect(&self, _error: &HubError) {}
    fn on_reconnected(&self, _client: &HubClient) {}
}

/// A client for a remote hub endpoint.
///
/// The client multiplexes invocations, fire-and-forget sends, server-invoked
/// callbacks and item streams over one logical connection that re-establishes
/// itself after transient failures when a reconnection policy is configured.
/// Cloning is cheap; every clone drives the same connection.
///
/// ```ignore
/// let client = HubClient::new_with("localhost", "chat", |c| {
///     c.with_port(5220);
///     c.unsecure();
///     c.with_automatic_reconnect();
/// });
///
/// let registration = client.on("newMessage".to_string(), |ctx| {
///     if let Ok(text) = ctx.argument::<String>(0) {
///         info!("incoming: {}", text);
///     }
/// });
///
/// client.start().await?;
/// let echoed = client.invoke_with_args::<String, _>("Echo".to_string(), |c| {
///     c.argument("hi");
/// }).await?;
///
/// registration.unregister();
/// client.stop().await;
/// ```
pub struct HubClient {
    inner: Arc<ClientInner>,
}

impl Clone for HubClient {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

struct ClientInner {
    configuration: ConnectionConfiguration,
    state: Mutex<ClientState>,
}

struct ClientState {
    lifecycle: ConnectionState,
    /// Bumped on every start/stop so tasks from earlier lifecycles turn inert.
    epoch: u64,
    connection: Option<ReconnectableConnection>,
    registry: InvocationRegistry,
    callbacks: CallbackRegistry,
    handshake: Option<ManualFutureCompleter<Result<(), HubError>>>,
    handshake_for_reconnect: bool,
    last_inbound: Instant,
    last_ping: Instant,
    pump: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

/// Work the pump performs after releasing the state lock: user callbacks and
/// anything that awaits.
enum Dispatch {
    HandshakeSettled {
        completer: ManualFutureCompleter<Result<(), HubError>>,
        result: Result<(), HubError>,
        reconnect: bool,
    },
    ResendHandshake,
    InvokeCallbacks {
        invocation: InvocationMessage,
        callbacks: Vec<CallbackFn>,
    },
    CloseRequested {
        error: Option<String>,
        allow_reconnect: bool,
    },
    SuppressReconnect,
    Notify(Notification),
}

enum Notification {
    WillReconnect(HubError),
    Reconnected,
    Closed(Option<HubError>),
}

enum KeepaliveAction {
    Idle,
    SendPing,
    TimedOut,
}

impl ClientState {
    fn new() -> Self {
        ClientState {
            lifecycle: ConnectionState::Disconnected,
            epoch: 0,
            connection: None,
            registry: InvocationRegistry::new(),
            callbacks: CallbackRegistry::new(),
            handshake: None,
            handshake_for_reconnect: false,
            last_inbound: Instant::now(),
            last_ping: Instant::now(),
            pump: None,
            keepalive: None,
        }
    }

    fn process_event(&mut self, event: ConnectionEvent) -> Vec<Dispatch> {
        match event {
            ConnectionEvent::Received(payload) => {
                self.last_inbound = Instant::now();
                self.process_payload(&payload)
            }
            ConnectionEvent::WillReconnect(error) => self.process_will_reconnect(error),
            ConnectionEvent::Reconnected { .. } => self.process_reconnected(),
            ConnectionEvent::Closed(error) => self.process_closed(error),
        }
    }

    fn process_payload(&mut self, payload: &str) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        let mut remainder = payload;

        // before the handshake settles, the first record is its response
        if let Some(completer) = self.handshake.take() {
            let reconnect = self.handshake_for_reconnect;
            let (record, rest) = match payload.split_once(RECORD_SEPARATOR) {
                Some((record, rest)) => (record, rest),
                None => (payload, ""),
            };

            match MessageParser::parse_handshake_response(record) {
                Ok(response) => match response.error {
                    None => {
                        self.lifecycle = ConnectionState::Connected;
                        self.last_ping = Instant::now();
                        dispatches.push(Dispatch::HandshakeSettled {
                            completer,
                            result: Ok(()),
                            reconnect,
                        });
                        if reconnect {
                            dispatches.push(Dispatch::Notify(Notification::Reconnected));
                        }
                    }
                    Some(error) => {
                        dispatches.push(Dispatch::HandshakeSettled {
                            completer,
                            result: Err(HubError::HandshakeRejected(error)),
                            reconnect,
                        });
                        return dispatches;
                    }
                },
                Err(error) => {
                    dispatches.push(Dispatch::HandshakeSettled {
                        completer,
                        result: Err(error),
                        reconnect,
                    });
                    return dispatches;
                }
            }

            remainder = rest;
        }

        if !remainder.is_empty() {
            match MessageParser::parse_messages(remainder) {
                Ok(messages) => {
                    for message in messages {
                        self.dispatch_message(message, &mut dispatches);
                    }
                }
                // one bad record discards the batch, the connection stays up
                Err(error) => error!("Discarding inbound batch: {}", error),
            }
        }

        dispatches
    }

    fn dispatch_message(&mut self, message: HubMessage, dispatches: &mut Vec<Dispatch>) {
        match message {
            HubMessage::Invocation(invocation) => {
                let callbacks = self.callbacks.matching(&invocation.target);

                if callbacks.is_empty() {
                    debug!("No handler registered for target {}, dropping invocation", invocation.target);
                } else {
                    dispatches.push(Dispatch::InvokeCallbacks { invocation, callbacks });
                }
            }
            HubMessage::StreamItem(item) => self.registry.push_stream_item(item),
            HubMessage::Completion(completion) => self.registry.complete(completion),
            HubMessage::Ping => {}
            HubMessage::Close(close) => dispatches.push(Dispatch::CloseRequested {
                error: close.error,
                allow_reconnect: close.allow_reconnect,
            }),
            HubMessage::StreamInvocation(_) | HubMessage::CancelInvocation(_) => {
                debug!("Ignoring a client-bound frame of a server-only conversation");
            }
        }
    }

    fn process_will_reconnect(&mut self, error: HubError) -> Vec<Dispatch> {
        match self.lifecycle {
            ConnectionState::Connected => {
                self.lifecycle = ConnectionState::Reconnecting;
                self.registry.fail_all(HubError::ConnectionLost);
                if let Some(keepalive) = self.keepalive.take() {
                    keepalive.abort();
                }

                vec![Dispatch::Notify(Notification::WillReconnect(error))]
            }
            ConnectionState::Connecting => {
                // a drop before the first handshake settles is not covered by
                // reconnection; fail the start attempt instead
                let mut dispatches = vec![Dispatch::SuppressReconnect];
                if let Some(completer) = self.handshake.take() {
                    dispatches.push(Dispatch::HandshakeSettled {
                        completer,
                        result: Err(HubError::ConnectionLost),
                        reconnect: false,
                    });
                }

                dispatches
            }
            ConnectionState::Reconnecting => {
                // the rebuilt transport dropped again before its handshake
                // settled; clear the stale completer and let the policy loop go on
                match self.handshake.take() {
                    Some(completer) => vec![Dispatch::HandshakeSettled {
                        completer,
                        result: Err(HubError::ConnectionLost),
                        reconnect: false,
                    }],
                    None => Vec::new(),
                }
            }
            ConnectionState::Disconnected | ConnectionState::Stopping => Vec::new(),
        }
    }

    fn process_reconnected(&mut self) -> Vec<Dispatch> {
        if self.lifecycle != ConnectionState::Reconnecting {
            return Vec::new();
        }

        // the transport is back, the protocol handshake must be redone before
        // the connection counts as usable again
        let (_future, completer) = ManualFuture::new();
        self.handshake = Some(completer);
        self.handshake_for_reconnect = true;

        vec![Dispatch::ResendHandshake]
    }

    fn process_closed(&mut self, error: Option<HubError>) -> Vec<Dispatch> {
        match self.lifecycle {
            ConnectionState::Disconnected => Vec::new(),
            ConnectionState::Connecting => {
                // surfaced to the start caller through the handshake future
                self.lifecycle = ConnectionState::Disconnected;
                self.connection = None;

                match self.handshake.take() {
                    Some(completer) => vec![Dispatch::HandshakeSettled {
                        completer,
                        result: Err(error.unwrap_or(HubError::ConnectionLost)),
                        reconnect: false,
                    }],
                    None => Vec::new(),
                }
            }
            _ => {
                let mut dispatches = Vec::new();

                if let Some(completer) = self.handshake.take() {
                    dispatches.push(Dispatch::HandshakeSettled {
                        completer,
                        result: Err(HubError::ConnectionLost),
                        reconnect: false,
                    });
                }

                self.lifecycle = ConnectionState::Disconnected;
                self.registry.fail_all(HubError::ConnectionLost);
                self.connection = None;
                if let Some(keepalive) = self.keepalive.take() {
                    keepalive.abort();
                }

                dispatches.push(Dispatch::Notify(Notification::Closed(error)));
                dispatches
            }
        }
    }

    fn keepalive_action(&self, now: Instant, keep_alive_interval: Duration, server_timeout: Duration) -> KeepaliveAction {
        if now.duration_since(self.last_inbound) >= server_timeout {
            KeepaliveAction::TimedOut
        } else if now.duration_since(self.last_ping) >= keep_alive_interval {
            KeepaliveAction::SendPing
        } else {
            KeepaliveAction::Idle
        }
    }
}

impl HubClient {
    /// Creates a client for `https://{domain}/{hub}` with default settings.
    /// Nothing connects until [`start`](Self::start) is called.
    pub fn new(domain: &str, hub: &str) -> Self {
        HubClient::new_internal(domain, hub, None::<fn(&mut ConnectionConfiguration)>)
    }

    /// Creates a client with custom connection properties.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let client = HubClient::new_with("localhost", "chat", |c| {
    ///     c.with_port(5220);
    ///     c.unsecure();
    /// });
    /// ```
    pub fn new_with<F>(domain: &str, hub: &str, options: F) -> Self
    where
        F: FnMut(&mut ConnectionConfiguration),
    {
        HubClient::new_internal(domain, hub, Some(options))
    }

    fn new_internal<F>(domain: &str, hub: &str, options: Option<F>) -> Self
    where
        F: FnMut(&mut ConnectionConfiguration),
    {
        let mut configuration = ConnectionConfiguration::new(domain.to_string(), hub.to_string());

        if let Some(mut options) = options {
            (options)(&mut configuration);
        }

        HubClient {
            inner: Arc::new(ClientInner {
                configuration,
                state: Mutex::new(ClientState::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.inner.state.lock().unwrap()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.lock().lifecycle
    }

    /// The id produced by the most recent successful negotiation. Changes
    /// across reconnects; `None` while disconnected or when negotiation was
    /// skipped.
    pub fn connection_id(&self) -> Option<String> {
        let connection = { self.lock().connection.clone() };
        connection.and_then(|connection| connection.connection_id())
    }

    /// Opens the connection: negotiates a transport, performs the protocol
    /// handshake and transitions to `Connected`.
    ///
    /// Valid only while disconnected. Failures before the handshake settles
    /// are returned here (and mirrored to the delegate's `on_failed_to_open`)
    /// and are never retried by the reconnect machinery.
    pub async fn start(&self) -> Result<(), HubError> {
        let handshake_frame = MessageParser::write_handshake_request(HubProtocolKind::Json)?;

        let epoch = {
            let mut state = self.lock();
            if state.lifecycle != ConnectionState::Disconnected {
                return Err(HubError::InvalidOperation(
                    "start is only valid while disconnected".to_string(),
                ));
            }

            state.lifecycle = ConnectionState::Connecting;
            state.epoch += 1;
            state.registry.reset();
            state.epoch
        };

        let (events, receiver) = unbounded_channel();
        let connection = ReconnectableConnection::new(self.inner.configuration.clone(), events);

        if let Err(error) = connection.start().await {
            {
                let mut state = self.lock();
                if state.epoch == epoch {
                    state.lifecycle = ConnectionState::Disconnected;
                }
            }
            self.notify_failed_to_open(&error);
            return Err(error);
        }

        let future = {
            let mut state = self.lock();
            if state.epoch != epoch || state.lifecycle != ConnectionState::Connecting {
                None
            } else {
                let (future, completer) = ManualFuture::new();
                state.handshake = Some(completer);
                state.handshake_for_reconnect = false;
                state.connection = Some(connection.clone());
                state.last_inbound = Instant::now();
                state.pump = Some(tokio::spawn(Self::run_pump(self.inner.clone(), receiver, epoch)));
                Some(future)
            }
        };

        let Some(future) = future else {
            // a concurrent stop won the race
            connection.stop().await;
            return Err(HubError::ConnectionLost);
        };

        if let Err(error) = connection.send(handshake_frame).await {
            self.abort_start(epoch, &connection).await;
            self.notify_failed_to_open(&error);
            return Err(error);
        }

        Self::spawn_handshake_timer(self.inner.clone(), epoch);

        match future.await {
            Ok(()) => {
                info!("Hub connection to {} established", self.inner.configuration.get_web_url());
                self.notify_opened();
                Ok(())
            }
            Err(error) => {
                self.abort_start(epoch, &connection).await;
                self.notify_failed_to_open(&error);
                Err(error)
            }
        }
    }

    async fn abort_start(&self, epoch: u64, connection: &ReconnectableConnection) {
        {
            let mut state = self.lock();
            if state.epoch == epoch {
                state.lifecycle = ConnectionState::Disconnected;
                state.handshake = None;
                state.connection = None;
                if let Some(pump) = state.pump.take() {
                    pump.abort();
                }
                if let Some(keepalive) = state.keepalive.take() {
                    keepalive.abort();
                }
            }
        }

        connection.stop().await;
    }

    /// Closes the connection: suppresses reconnection, fails all pending
    /// invocations and streams with `ConnectionLost`, transitions to
    /// `Disconnected` and fires `on_closed`. Idempotent; registered `on`
    /// callbacks survive for the next `start`.
    pub async fn stop(&self) {
        let connection = {
            let mut state = self.lock();
            if state.lifecycle == ConnectionState::Disconnected {
                return;
            }

            state.lifecycle = ConnectionState::Stopping;
            state.epoch += 1;
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            if let Some(keepalive) = state.keepalive.take() {
                keepalive.abort();
            }
            if let Some(completer) = state.handshake.take() {
                completer.complete(Err(HubError::ConnectionLost));
            }
            state.registry.fail_all(HubError::ConnectionLost);
            state.lifecycle = ConnectionState::Disconnected;
            state.connection.take()
        };

        if let Some(connection) = connection {
            connection.stop().await;
        }

        info!("Hub connection stopped");
        self.notify_closed(None);
    }

    /// Registers a callback the server can invoke. Registrations for the same
    /// target accumulate and all fire, in registration order, for every
    /// matching invocation. The registry survives reconnects.
    pub fn on(
        &self,
        target: String,
        callback: impl Fn(InvocationContext) + Send + Sync + 'static,
    ) -> CallbackRegistration {
        let token = self.lock().callbacks.add(target.clone(), Arc::new(callback));

        CallbackRegistration {
            inner: self.inner.clone(),
            target,
            token,
        }
    }

    /// Invokes a hub method and waits for its result.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let entity = client.invoke::<TestEntity>("SingleEntity".to_string()).await?;
    /// ```
    pub async fn invoke<R: 'static + DeserializeOwned + Unpin + Send>(&self, target: String) -> Result<R, HubError> {
        self.invoke_internal(target, None::<fn(&mut ArgumentConfiguration)>).await
    }

    /// Invokes a hub method with arguments and waits for its result.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let merged = client.invoke_with_args::<TestEntity, _>("PushTwoEntities".to_string(), |c| {
    ///     c.argument(first).argument(second);
    /// }).await?;
    /// ```
    pub async fn invoke_with_args<R: 'static + DeserializeOwned + Unpin + Send, F>(
        &self,
        target: String,
        configuration: F,
    ) -> Result<R, HubError>
    where
        F: FnMut(&mut ArgumentConfiguration),
    {
        self.invoke_internal(target, Some(configuration)).await
    }

    async fn invoke_internal<R: 'static + DeserializeOwned + Unpin + Send, F>(
        &self,
        target: String,
        configuration: Option<F>,
    ) -> Result<R, HubError>
    where
        F: FnMut(&mut ArgumentConfiguration),
    {
        let arguments = Self::build_arguments(configuration)?;

        let (frame, future, connection) = {
            let mut state = self.lock();
            if state.lifecycle != ConnectionState::Connected {
                return Err(HubError::NotConnected);
            }
            let connection = state.connection.clone().ok_or(HubError::NotConnected)?;

            let invocation_id = state.registry.next_invocation_id();
            let invocation = InvocationMessage::new(invocation_id.clone(), target, arguments, false);
            let frame = MessageParser::write_message(&HubMessage::Invocation(invocation))?;
            let future = state.registry.add_invocation::<R>(invocation_id.clone());

            let tracked = TrackedInvocation {
                inner: self.inner.clone(),
                invocation_id,
                future,
                settled: false,
            };

            (frame, tracked, connection)
        };

        // a send failure drops `future`, which discards the bookkeeping
        connection.send(frame).await?;

        future.await
    }

    /// Calls a hub method without waiting for any result; completes once the
    /// transport has accepted the frame.
    pub async fn send(&self, target: String) -> Result<(), HubError> {
        self.send_internal(target, None::<fn(&mut ArgumentConfiguration)>).await
    }

    /// Calls a hub method with arguments without waiting for any result.
    pub async fn send_with_args<F>(&self, target: String, configuration: F) -> Result<(), HubError>
    where
        F: FnMut(&mut ArgumentConfiguration),
    {
        self.send_internal(target, Some(configuration)).await
    }

    async fn send_internal<F>(&self, target: String, configuration: Option<F>) -> Result<(), HubError>
    where
        F: FnMut(&mut ArgumentConfiguration),
    {
        let arguments = Self::build_arguments(configuration)?;

        let (frame, connection) = {
            let mut state = self.lock();
            if state.lifecycle != ConnectionState::Connected {
                return Err(HubError::NotConnected);
            }
            let connection = state.connection.clone().ok_or(HubError::NotConnected)?;

            // non-blocking sends carry an id on the wire but no bookkeeping
            let invocation_id = state.registry.next_invocation_id();
            let invocation = InvocationMessage::new(invocation_id, target, arguments, true);
            let frame = MessageParser::write_message(&HubMessage::Invocation(invocation))?;

            (frame, connection)
        };

        connection.send(frame).await
    }

    /// Opens a server-to-client stream.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut stream = client.stream::<TestEntity>("HundredEntities".to_string()).await?;
    /// while let Some(item) = stream.next().await {
    ///     info!("entity: {:?}", item?);
    /// }
    /// ```
    pub async fn stream<R: 'static + DeserializeOwned + Unpin + Send>(
        &self,
        target: String,
    ) -> Result<HubStream<R>, HubError> {
        self.stream_internal(target, None::<fn(&mut ArgumentConfiguration)>).await
    }

    /// Opens a server-to-client stream with arguments.
    pub async fn stream_with_args<R: 'static + DeserializeOwned + Unpin + Send, F>(
        &self,
        target: String,
        configuration: F,
    ) -> Result<HubStream<R>, HubError>
    where
        F: FnMut(&mut ArgumentConfiguration),
    {
        self.stream_internal(target, Some(configuration)).await
    }

    async fn stream_internal<R: 'static + DeserializeOwned + Unpin + Send, F>(
        &self,
        target: String,
        configuration: Option<F>,
    ) -> Result<HubStream<R>, HubError>
    where
        F: FnMut(&mut ArgumentConfiguration),
    {
        let arguments = Self::build_arguments(configuration)?;

        let (frame, stream, connection) = {
            let mut state = self.lock();
            if state.lifecycle != ConnectionState::Connected {
                return Err(HubError::NotConnected);
            }
            let connection = state.connection.clone().ok_or(HubError::NotConnected)?;

            let invocation_id = state.registry.next_invocation_id();
            let invocation = StreamInvocationMessage::new(invocation_id.clone(), target, arguments);
            let frame = MessageParser::write_message(&HubMessage::StreamInvocation(invocation))?;
            let stream = state.registry.add_stream::<R>(invocation_id.clone());

            let stream = HubStream {
                stream,
                handle: StreamHandle { invocation_id },
                inner: self.inner.clone(),
            };

            (frame, stream, connection)
        };

        connection.send(frame).await?;

        Ok(stream)
    }

    /// Cancels an open stream: the local bookkeeping is removed immediately,
    /// before the server acknowledges anything, so late items for the id are
    /// dropped. The consumer stream ends without an error.
    pub async fn cancel_stream_invocation(&self, handle: &StreamHandle) -> Result<(), HubError> {
        let (frame, connection) = {
            let mut state = self.lock();
            if state.lifecycle != ConnectionState::Connected {
                return Err(HubError::NotConnected);
            }
            let connection = state.connection.clone().ok_or(HubError::NotConnected)?;

            if !state.registry.cancel(&handle.invocation_id) {
                debug!("Stream {} already settled, nothing to cancel locally", handle.invocation_id);
            }

            let cancellation = CancelInvocationMessage::new(handle.invocation_id.clone());
            let frame = MessageParser::write_message(&HubMessage::CancelInvocation(cancellation))?;

            (frame, connection)
        };

        connection.send(frame).await
    }

    fn build_arguments<F>(configuration: Option<F>) -> Result<Vec<serde_json::Value>, HubError>
    where
        F: FnMut(&mut ArgumentConfiguration),
    {
        let mut arguments = ArgumentConfiguration::new();

        if let Some(mut configure) = configuration {
            configure(&mut arguments);
        }

        arguments.into_arguments()
    }

    async fn run_pump(inner: Arc<ClientInner>, mut events: UnboundedReceiver<ConnectionEvent>, epoch: u64) {
        while let Some(event) = events.recv().await {
            let dispatches = {
                let mut state = inner.state.lock().unwrap();
                if state.epoch != epoch {
                    return;
                }
                state.process_event(event)
            };

            for dispatch in dispatches {
                Self::execute(&inner, epoch, dispatch).await;
            }
        }
    }

    async fn execute(inner: &Arc<ClientInner>, epoch: u64, dispatch: Dispatch) {
        match dispatch {
            Dispatch::HandshakeSettled { completer, result, reconnect } => match result {
                Ok(()) => {
                    Self::start_keepalive(inner, epoch);
                    completer.complete(Ok(()));
                }
                Err(error) if reconnect => {
                    // nothing awaits the reconnect handshake, tear down here
                    warn!("Handshake after reconnect failed: {}", error);
                    let connection = { inner.state.lock().unwrap().connection.clone() };
                    completer.complete(Err(error.clone()));
                    Self::shutdown_with_error(inner.clone(), epoch, connection, Some(error)).await;
                }
                Err(error) => completer.complete(Err(error)),
            },
            Dispatch::ResendHandshake => {
                let connection = { inner.state.lock().unwrap().connection.clone() };
                let Some(connection) = connection else { return };

                match MessageParser::write_handshake_request(HubProtocolKind::Json) {
                    Ok(frame) => {
                        if let Err(error) = connection.send(frame).await {
                            // the transport will report its own close and the
                            // reconnect loop continues from there
                            warn!("Could not resend the handshake: {}", error);
                        } else {
                            Self::spawn_handshake_timer(inner.clone(), epoch);
                        }
                    }
                    Err(error) => error!("Cannot encode the handshake request: {}", error),
                }
            }
            Dispatch::InvokeCallbacks { invocation, callbacks } => {
                let client = HubClient { inner: inner.clone() };

                for callback in callbacks {
                    callback(InvocationContext::new(client.clone(), invocation.clone()));
                }
            }
            Dispatch::CloseRequested { error, allow_reconnect } => {
                let connection = { inner.state.lock().unwrap().connection.clone() };
                let error = error.map(HubError::ServerClose);

                if allow_reconnect {
                    if let Some(connection) = connection {
                        connection.force_close(error.unwrap_or(HubError::ConnectionLost)).await;
                    }
                } else {
                    info!("The server requested the connection to close");
                    Self::shutdown_with_error(inner.clone(), epoch, connection, error).await;
                }
            }
            Dispatch::SuppressReconnect => {
                let connection = { inner.state.lock().unwrap().connection.clone() };
                if let Some(connection) = connection {
                    connection.stop().await;
                }
            }
            Dispatch::Notify(notification) => Self::notify(inner, notification),
        }
    }

    /// Final teardown that bypasses the reconnect machinery: keepalive
    /// timeouts give-up, server closes, failed reconnect handshakes.
    async fn shutdown_with_error(
        inner: Arc<ClientInner>,
        epoch: u64,
        connection: Option<ReconnectableConnection>,
        error: Option<HubError>,
    ) {
        if let Some(connection) = connection {
            connection.stop().await;
        }

        let proceed = {
            let mut state = inner.state.lock().unwrap();
            if state.epoch != epoch || state.lifecycle == ConnectionState::Disconnected {
                false
            } else {
                state.lifecycle = ConnectionState::Disconnected;
                state.registry.fail_all(HubError::ConnectionLost);
                state.connection = None;
                state.handshake = None;
                if let Some(keepalive) = state.keepalive.take() {
                    keepalive.abort();
                }
                true
            }
        };

        if proceed {
            Self::notify(&inner, Notification::Closed(error));
        }
    }

    fn spawn_handshake_timer(inner: Arc<ClientInner>, epoch: u64) {
        let timeout = inner.configuration.handshake_timeout();

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let (completer, reconnect, connection) = {
                let mut state = inner.state.lock().unwrap();
                if state.epoch != epoch {
                    return;
                }
                match state.handshake.take() {
                    Some(completer) => (completer, state.handshake_for_reconnect, state.connection.clone()),
                    None => return,
                }
            };

            warn!("Handshake timed out");
            completer.complete(Err(HubError::HandshakeTimeout));

            if reconnect {
                HubClient::shutdown_with_error(inner, epoch, connection, Some(HubError::HandshakeTimeout)).await;
            }
        });
    }

    fn start_keepalive(inner: &Arc<ClientInner>, epoch: u64) {
        let handle = tokio::spawn(Self::run_keepalive(inner.clone(), epoch));

        let mut state = inner.state.lock().unwrap();
        if state.epoch == epoch && state.lifecycle == ConnectionState::Connected {
            if let Some(previous) = state.keepalive.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }

    async fn run_keepalive(inner: Arc<ClientInner>, epoch: u64) {
        let keep_alive_interval = inner.configuration.keep_alive_interval();
        let server_timeout = inner.configuration.server_timeout();

        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;

            let (action, connection) = {
                let mut state = inner.state.lock().unwrap();
                if state.epoch != epoch || state.lifecycle != ConnectionState::Connected {
                    return;
                }

                let now = Instant::now();
                let action = state.keepalive_action(now, keep_alive_interval, server_timeout);
                if matches!(action, KeepaliveAction::SendPing) {
                    state.last_ping = now;
                }

                (action, state.connection.clone())
            };

            match action {
                KeepaliveAction::TimedOut => {
                    warn!("No inbound message within the server timeout window, closing");
                    if let Some(connection) = connection {
                        connection.force_close(HubError::ServerTimeout).await;
                    }
                    return;
                }
                KeepaliveAction::SendPing => {
                    let Some(connection) = connection else { continue };
                    match MessageParser::write_message(&HubMessage::Ping) {
                        Ok(frame) => {
                            if let Err(error) = connection.send(frame).await {
                                debug!("Keepalive ping failed: {}", error);
                            }
                        }
                        Err(error) => error!("Cannot encode a ping: {}", error),
                    }
                }
                KeepaliveAction::Idle => {}
            }
        }
    }

    fn notify(inner: &Arc<ClientInner>, notification: Notification) {
        let Some(delegate) = inner.configuration.delegate() else { return };

        match notification {
            Notification::WillReconnect(error) => delegate.on_will_reconnect(&error),
            Notification::Reconnected => {
                let client = HubClient { inner: inner.clone() };
                delegate.on_reconnected(&client);
            }
            Notification::Closed(error) => delegate.on_closed(error.as_ref()),
        }
    }

    fn notify_opened(&self) {
        if let Some(delegate) = self.inner.configuration.delegate() {
            delegate.on_opened(self);
        }
    }

    fn notify_failed_to_open(&self, error: &HubError) {
        if let Some(delegate) = self.inner.configuration.delegate() {
            delegate.on_failed_to_open(error);
        }
    }

    fn notify_closed(&self, error: Option<&HubError>) {
        if let Some(delegate) = self.inner.configuration.delegate() {
            delegate.on_closed(error);
        }
    }
}

/// Identifies an open stream for [`HubClient::cancel_stream_invocation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub(crate) invocation_id: String,
}

/// A server-to-client item stream. Dropping it discards the local bookkeeping
/// without telling the server; use
/// [`HubClient::cancel_stream_invocation`] for an explicit cancel.
pub struct HubStream<R: Unpin> {
    stream: ManualStream<Result<R, HubError>>,
    handle: StreamHandle,
    inner: Arc<ClientInner>,
}

impl<R: Unpin> HubStream<R> {
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }
}

impl<R: Unpin> Stream for HubStream<R> {
    type Item = Result<R, HubError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stream).poll_next(cx)
    }
}

impl<R: Unpin> Drop for HubStream<R> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.registry.discard(&self.handle.invocation_id);
        }
    }
}

/// Removes one registration made with [`HubClient::on`].
pub struct CallbackRegistration {
    inner: Arc<ClientInner>,
    target: String,
    token: u64,
}

impl CallbackRegistration {
    pub fn unregister(self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.callbacks.remove(&self.target, self.token);
        }
    }
}

/// An in-flight invocation future. Dropping it before the terminal event
/// removes the correlation entry; the network never learns about it.
struct TrackedInvocation<R: Unpin> {
    inner: Arc<ClientInner>,
    invocation_id: String,
    future: ManualFuture<Result<R, HubError>>,
    settled: bool,
}

impl<R: Unpin> Future for TrackedInvocation<R> {
    type Output = Result<R, HubError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.get_mut();

        match Pin::new(&mut this.future).poll(cx) {
            Poll::Ready(result) => {
                this.settled = true;
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<R: Unpin> Drop for TrackedInvocation<R> {
    fn drop(&mut self) {
        if !self.settled {
            if let Ok(mut state) = self.inner.state.lock() {
                state.registry.discard(&self.invocation_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::invoke::CompletionMessage;

    const SEP: char = RECORD_SEPARATOR;

    fn connected_state() -> ClientState {
        let mut state = ClientState::new();
        state.lifecycle = ConnectionState::Connected;
        state
    }

    fn pending_handshake(state: &mut ClientState, reconnect: bool) {
        let (_future, completer) = ManualFuture::new();
        state.handshake = Some(completer);
        state.handshake_for_reconnect = reconnect;
    }

    #[test]
    fn handshake_success_transitions_to_connected() {
        let mut state = ClientState::new();
        state.lifecycle = ConnectionState::Connecting;
        pending_handshake(&mut state, false);

        let dispatches = state.process_payload(&format!("{{}}{}", SEP));

        assert_eq!(state.lifecycle, ConnectionState::Connected);
        assert_eq!(dispatches.len(), 1);
        assert!(matches!(
            &dispatches[0],
            Dispatch::HandshakeSettled { result: Ok(()), reconnect: false, .. }
        ));
    }

    #[test]
    fn handshake_rejection_does_not_connect() {
        let mut state = ClientState::new();
        state.lifecycle = ConnectionState::Connecting;
        pending_handshake(&mut state, false);

        let dispatches = state.process_payload(&format!("{{\"error\":\"nope\"}}{}", SEP));

        assert_eq!(state.lifecycle, ConnectionState::Connecting);
        assert!(matches!(
            &dispatches[0],
            Dispatch::HandshakeSettled { result: Err(HubError::HandshakeRejected(_)), .. }
        ));
    }

    #[test]
    fn records_behind_the_handshake_response_are_processed() {
        let mut state = ClientState::new();
        state.lifecycle = ConnectionState::Connecting;
        pending_handshake(&mut state, false);

        let id = state.registry.next_invocation_id();
        let _future = state.registry.add_invocation::<String>(id.clone());

        let payload = format!("{{}}{}{{\"type\":3,\"invocationId\":\"{}\",\"result\":\"hi\"}}{}", SEP, id, SEP);
        state.process_payload(&payload);

        assert_eq!(state.lifecycle, ConnectionState::Connected);
        assert!(state.registry.is_empty());
    }

    #[test]
    fn completion_resolves_a_pending_invocation() {
        let mut state = connected_state();
        let id = state.registry.next_invocation_id();
        let _future = state.registry.add_invocation::<String>(id.clone());

        let payload = format!("{{\"type\":3,\"invocationId\":\"{}\",\"result\":\"hi\"}}{}", id, SEP);
        let dispatches = state.process_payload(&payload);

        assert!(dispatches.is_empty());
        assert!(state.registry.is_empty());
    }

    #[test]
    fn invocations_fan_out_to_all_registrations_in_order() {
        let mut state = connected_state();
        state.callbacks.add("broadcast".to_string(), Arc::new(|_| {}));
        state.callbacks.add("broadcast".to_string(), Arc::new(|_| {}));

        let payload = format!(
            "{{\"type\":1,\"invocationId\":\"9\",\"target\":\"broadcast\",\"arguments\":[\"x\"]}}{}",
            SEP
        );
        let dispatches = state.process_payload(&payload);

        assert_eq!(dispatches.len(), 1);
        match &dispatches[0] {
            Dispatch::InvokeCallbacks { invocation, callbacks } => {
                assert_eq!(invocation.target, "broadcast");
                assert_eq!(callbacks.len(), 2);
            }
            _ => panic!("expected a callback dispatch"),
        }
    }

    #[test]
    fn unregistered_targets_are_dropped_silently() {
        let mut state = connected_state();

        let payload = format!("{{\"type\":1,\"invocationId\":\"9\",\"target\":\"nobody\",\"arguments\":[]}}{}", SEP);
        let dispatches = state.process_payload(&payload);

        assert!(dispatches.is_empty());
    }

    #[test]
    fn malformed_batches_leave_state_untouched() {
        let mut state = connected_state();
        let id = state.registry.next_invocation_id();
        let _future = state.registry.add_invocation::<String>(id.clone());

        let payload = format!("{{\"type\":1,\"target\":\"Send\"}}{}", SEP);
        let dispatches = state.process_payload(&payload);

        assert!(dispatches.is_empty());
        assert_eq!(state.lifecycle, ConnectionState::Connected);
        assert!(!state.registry.is_empty());
    }

    #[test]
    fn close_message_produces_a_close_request() {
        let mut state = connected_state();

        let payload = format!("{{\"type\":7,\"error\":\"bye\",\"allowReconnect\":true}}{}", SEP);
        let dispatches = state.process_payload(&payload);

        assert_eq!(dispatches.len(), 1);
        match &dispatches[0] {
            Dispatch::CloseRequested { error, allow_reconnect } => {
                assert_eq!(error.as_deref(), Some("bye"));
                assert!(*allow_reconnect);
            }
            _ => panic!("expected a close request"),
        }
    }

    #[test]
    fn will_reconnect_fails_pending_work_but_keeps_callbacks() {
        let mut state = connected_state();
        state.callbacks.add("chat".to_string(), Arc::new(|_| {}));
        let id = state.registry.next_invocation_id();
        let _future = state.registry.add_invocation::<String>(id);

        let dispatches = state.process_will_reconnect(HubError::ConnectionLost);

        assert_eq!(state.lifecycle, ConnectionState::Reconnecting);
        assert!(state.registry.is_empty());
        assert_eq!(state.callbacks.matching("chat").len(), 1);
        assert!(matches!(
            &dispatches[0],
            Dispatch::Notify(Notification::WillReconnect(_))
        ));
    }

    #[test]
    fn drop_before_first_handshake_is_not_reconnected() {
        let mut state = ClientState::new();
        state.lifecycle = ConnectionState::Connecting;
        pending_handshake(&mut state, false);

        let dispatches = state.process_will_reconnect(HubError::ConnectionLost);

        assert_eq!(state.lifecycle, ConnectionState::Connecting);
        assert!(matches!(&dispatches[0], Dispatch::SuppressReconnect));
        assert!(matches!(
            &dispatches[1],
            Dispatch::HandshakeSettled { result: Err(HubError::ConnectionLost), reconnect: false, .. }
        ));
    }

    #[test]
    fn reconnected_requests_a_fresh_handshake() {
        let mut state = connected_state();
        state.process_will_reconnect(HubError::ConnectionLost);

        let dispatches = state.process_reconnected();

        assert!(state.handshake.is_some());
        assert!(state.handshake_for_reconnect);
        assert!(matches!(&dispatches[0], Dispatch::ResendHandshake));

        // and the reconnect handshake response flips back to connected
        let follow_up = state.process_payload(&format!("{{}}{}", SEP));
        assert_eq!(state.lifecycle, ConnectionState::Connected);
        assert!(matches!(
            &follow_up[0],
            Dispatch::HandshakeSettled { result: Ok(()), reconnect: true, .. }
        ));
        assert!(matches!(&follow_up[1], Dispatch::Notify(Notification::Reconnected)));
    }

    #[test]
    fn closed_fails_pending_work_and_notifies() {
        let mut state = connected_state();
        let id = state.registry.next_invocation_id();
        let _future = state.registry.add_invocation::<String>(id);

        let dispatches = state.process_closed(Some(HubError::ConnectionLost));

        assert_eq!(state.lifecycle, ConnectionState::Disconnected);
        assert!(state.registry.is_empty());
        assert!(matches!(
            dispatches.last(),
            Some(Dispatch::Notify(Notification::Closed(Some(HubError::ConnectionLost))))
        ));
    }

    #[test]
    fn ping_only_resets_the_inactivity_deadline() {
        let mut state = connected_state();
        let before = state.last_inbound;

        std::thread::sleep(Duration::from_millis(5));
        let dispatches = state.process_event(ConnectionEvent::Received(format!("{{\"type\":6}}{}", SEP)));

        assert!(dispatches.is_empty());
        assert!(state.last_inbound > before);
    }

    #[test]
    fn keepalive_decisions_follow_the_deadlines() {
        let mut state = connected_state();
        let interval = Duration::from_secs(15);
        let timeout = Duration::from_secs(30);
        let now = Instant::now();
        state.last_inbound = now;
        state.last_ping = now;

        assert!(matches!(state.keepalive_action(now, interval, timeout), KeepaliveAction::Idle));
        assert!(matches!(
            state.keepalive_action(now + Duration::from_secs(16), interval, timeout),
            KeepaliveAction::SendPing
        ));
        assert!(matches!(
            state.keepalive_action(now + Duration::from_secs(31), interval, timeout),
            KeepaliveAction::TimedOut
        ));
    }

    #[test]
    fn duplicate_completion_after_settlement_is_ignored() {
        let mut state = connected_state();
        let id = state.registry.next_invocation_id();
        let _future = state.registry.add_invocation::<String>(id.clone());

        state.registry.complete(CompletionMessage::result(id.clone(), Some(json!("first"))));

        let payload = format!("{{\"type\":3,\"invocationId\":\"{}\",\"result\":\"second\"}}{}", id, SEP);
        let dispatches = state.process_payload(&payload);

        assert!(dispatches.is_empty());
    }
}
