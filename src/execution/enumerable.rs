use serde::de::DeserializeOwned;

use crate::completer::{ManualStream, ManualStreamCompleter};
use crate::errors::HubError;
use crate::protocol::invoke::CompletionMessage;

/// Type-erased continuation of a stream invocation.
pub(crate) trait StreamInvocationHandler: Send {
    /// Delivers one item; returns false when the consumer is gone so the
    /// registry can prune the entry.
    fn push(&mut self, item: serde_json::Value) -> bool;
    fn complete(self: Box<Self>, completion: CompletionMessage);
    fn fail(self: Box<Self>, error: HubError);
    /// Ends the stream without a terminal error, used by local cancellation.
    fn cancel(self: Box<Self>);
}

/// Decodes stream items into `R` as they arrive and feeds the caller's stream.
pub(crate) struct TypedStream<R: DeserializeOwned + Unpin> {
    completer: ManualStreamCompleter<Result<R, HubError>>,
}

impl<R: 'static + DeserializeOwned + Unpin + Send> TypedStream<R> {
    pub(crate) fn create() -> (Self, ManualStream<Result<R, HubError>>) {
        let (stream, completer) = ManualStream::create();

        (TypedStream { completer }, stream)
    }
}

impl<R: 'static + DeserializeOwned + Unpin + Send> StreamInvocationHandler for TypedStream<R> {
    fn push(&mut self, item: serde_json::Value) -> bool {
        match serde_json::from_value::<R>(item) {
            Ok(item) => self.completer.push(Ok(item)),
            Err(error) => self.completer.push(Err(HubError::serialization(error))),
        }
    }

    fn complete(self: Box<Self>, completion: CompletionMessage) {
        if let Some(error) = completion.error {
            self.completer.push(Err(HubError::Hub(error)));
        }

        self.completer.close();
    }

    fn fail(self: Box<Self>, error: HubError) {
        self.completer.push(Err(error));
        self.completer.close();
    }

    fn cancel(self: Box<Self>) {
        self.completer.close();
    }
}
