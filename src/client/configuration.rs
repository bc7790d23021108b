use std::sync::Arc;
use std::time::Duration;

use crate::communication::reconnection::{ReconnectionConfig, ReconnectionPolicy};
use crate::transport::TransportKind;

use super::client::HubClientDelegate;

#[derive(Clone)]
pub(crate) enum Authentication {
    None,
    Basic { user: String, password: Option<String> },
    Bearer { token: String },
}

/// Connection properties of a hub client, set through the closure passed to
/// [`HubClient::new_with`](super::HubClient::new_with).
#[derive(Clone)]
pub struct ConnectionConfiguration {
    secure: bool,
    domain: String,
    hub: String,
    port: Option<i32>,
    authentication: Authentication,
    permitted_transports: Vec<TransportKind>,
    skip_negotiation: bool,
    handshake_timeout: Duration,
    keep_alive_interval: Duration,
    server_timeout: Duration,
    reconnection: ReconnectionConfig,
    delegate: Option<Arc<dyn HubClientDelegate>>,
}

impl ConnectionConfiguration {
    pub(crate) fn new(domain: String, hub: String) -> Self {
        ConnectionConfiguration {
            secure: true,
            domain,
            hub,
            port: None,
            authentication: Authentication::None,
            permitted_transports: vec![TransportKind::WebSockets, TransportKind::LongPolling],
            skip_negotiation: false,
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            reconnection: ReconnectionConfig::default(),
            delegate: None,
        }
    }

    /// Sets the port for the connection.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let client = HubClient::new_with("localhost", "chat", |c| {
    ///     c.with_port(5220);
    /// });
    /// ```
    pub fn with_port(&mut self, port: i32) -> &ConnectionConfiguration {
        self.port = Some(port);

        self
    }

    /// Connects over HTTPS / WSS (the default).
    pub fn secure(&mut self) -> &ConnectionConfiguration {
        self.secure = true;

        self
    }

    /// Connects over plain HTTP / WS.
    pub fn unsecure(&mut self) -> &ConnectionConfiguration {
        self.secure = false;

        self
    }

    /// Uses HTTP basic authentication for negotiation and long polling.
    pub fn authenticate_basic(&mut self, user: String, password: Option<String>) -> &ConnectionConfiguration {
        self.authentication = Authentication::Basic { user, password };

        self
    }

    /// Uses a bearer token for negotiation and transport requests.
    pub fn authenticate_bearer(&mut self, token: String) -> &ConnectionConfiguration {
        self.authentication = Authentication::Bearer { token };

        self
    }

    /// Restricts which transports may be selected during negotiation. The
    /// server's preference order still decides among the permitted ones.
    pub fn with_transports(&mut self, transports: Vec<TransportKind>) -> &ConnectionConfiguration {
        self.permitted_transports = transports;

        self
    }

    /// Skips the negotiate exchange and connects the websocket directly.
    /// Only valid when the websocket transport is permitted.
    pub fn skip_negotiation(&mut self) -> &ConnectionConfiguration {
        self.skip_negotiation = true;

        self
    }

    /// How long to wait for the server to acknowledge the handshake.
    pub fn with_handshake_timeout(&mut self, timeout: Duration) -> &ConnectionConfiguration {
        self.handshake_timeout = timeout;

        self
    }

    /// Interval between client keepalive pings while connected.
    pub fn with_keep_alive_interval(&mut self, interval: Duration) -> &ConnectionConfiguration {
        self.keep_alive_interval = interval;

        self
    }

    /// How long the server may stay silent before the connection is
    /// considered dead and force-closed.
    pub fn with_server_timeout(&mut self, timeout: Duration) -> &ConnectionConfiguration {
        self.server_timeout = timeout;

        self
    }

    /// Sets the reconnection policy. The default never reconnects.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let client = HubClient::new_with("localhost", "chat", |c| {
    ///     c.with_reconnection_policy(ReconnectionConfig::automatic());
    /// });
    /// ```
    pub fn with_reconnection_policy(&mut self, config: ReconnectionConfig) -> &ConnectionConfiguration {
        self.reconnection = config;

        self
    }

    /// Reconnects automatically with the standard backoff schedule.
    pub fn with_automatic_reconnect(&mut self) -> &ConnectionConfiguration {
        self.reconnection = ReconnectionConfig::automatic();

        self
    }

    /// Installs a delegate for connection lifecycle notifications.
    pub fn with_delegate(&mut self, delegate: Arc<dyn HubClientDelegate>) -> &ConnectionConfiguration {
        self.delegate = Some(delegate);

        self
    }

    pub(crate) fn get_web_url(&self) -> String {
        format!("{}://{}/{}", self.get_http_schema(), self.get_domain(), self.hub)
    }

    fn get_http_schema(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    fn get_domain(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.domain, port),
            None => self.domain.clone(),
        }
    }

    pub(crate) fn authentication(&self) -> Authentication {
        self.authentication.clone()
    }

    pub(crate) fn permitted_transports(&self) -> &[TransportKind] {
        &self.permitted_transports
    }

    pub(crate) fn skips_negotiation(&self) -> bool {
        self.skip_negotiation
    }

    pub(crate) fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub(crate) fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
    }

    pub(crate) fn server_timeout(&self) -> Duration {
        self.server_timeout
    }

    pub(crate) fn reconnection_policy(&self) -> Arc<dyn ReconnectionPolicy> {
        self.reconnection.policy.clone()
    }

    pub(crate) fn delegate(&self) -> Option<Arc<dyn HubClientDelegate>> {
        self.delegate.clone()
    }
}
