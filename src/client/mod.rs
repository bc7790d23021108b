mod client;
mod configuration;
mod context;

pub use client::{
    CallbackRegistration, ConnectionState, HubClient, HubClientDelegate, HubStream, StreamHandle,
};
pub use configuration::ConnectionConfiguration;
pub(crate) use configuration::Authentication;
pub use context::InvocationContext;
