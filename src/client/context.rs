use serde::de::DeserializeOwned;

use crate::errors::HubError;
use crate::protocol::invoke::InvocationMessage;

use super::HubClient;

/// Context handed to an `on` callback for one server invocation: the target,
/// indexed typed access to the arguments, and a client handle for calling
/// back into the hub from the handler.
pub struct InvocationContext {
    invocation: InvocationMessage,
    client: HubClient,
}

impl InvocationContext {
    pub(crate) fn new(client: HubClient, invocation: InvocationMessage) -> Self {
        InvocationContext { invocation, client }
    }

    /// The method name the server addressed.
    pub fn target(&self) -> &str {
        &self.invocation.target
    }

    /// Decodes the positional argument at `index`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// client.on("newMessage".to_string(), |ctx| {
    ///     let sender = ctx.argument::<String>(0);
    ///     let text = ctx.argument::<String>(1);
    /// });
    /// ```
    pub fn argument<T: DeserializeOwned>(&self, index: usize) -> Result<T, HubError> {
        let value = self.invocation.arguments.get(index).ok_or_else(|| {
            HubError::InvalidOperation(format!("the invocation carries no argument at index {}", index))
        })?;

        serde_json::from_value(value.clone()).map_err(HubError::serialization)
    }

    pub fn argument_count(&self) -> usize {
        self.invocation.arguments.len()
    }

    /// A clone of the client, e.g. to `send` a reply from inside a handler.
    pub fn client(&self) -> HubClient {
        self.client.clone()
    }
}
