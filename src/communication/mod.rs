pub(crate) mod common;
pub(crate) mod connection;
pub(crate) mod negotiation;
pub(crate) mod reconnectable;
pub mod reconnection;

use crate::errors::HubError;

/// Events a reconnectable connection feeds the hub client, in order.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Received(String),
    WillReconnect(HubError),
    Reconnected { connection_id: Option<String> },
    Closed(Option<HubError>),
}
