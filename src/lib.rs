mod client;
mod communication;
mod completer;
mod errors;
mod execution;
mod protocol;
mod transport;

#[cfg(test)]
mod tests;

pub use client::{
    CallbackRegistration, ConnectionConfiguration, ConnectionState, HubClient, HubClientDelegate,
    HubStream, InvocationContext, StreamHandle,
};
pub use communication::reconnection::{
    ConstantDelayPolicy, ExponentialBackoffPolicy, LinearBackoffPolicy, NoReconnectPolicy,
    ReconnectionConfig, ReconnectionPolicy, RetryContext, SteppedDelayPolicy,
};
pub use errors::HubError;
pub use execution::ArgumentConfiguration;
pub use protocol::hub_protocol::HubProtocolKind;
pub use transport::TransportKind;
