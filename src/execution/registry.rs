use std::collections::HashMap;

use log::debug;
use serde::de::DeserializeOwned;

use crate::completer::{ManualFuture, ManualStream};
use crate::errors::HubError;
use crate::protocol::invoke::CompletionMessage;
use crate::protocol::streaming::StreamItemMessage;

use super::enumerable::{StreamInvocationHandler, TypedStream};
use super::invocation::{SingleInvocationHandler, TypedInvocation};

enum PendingInvocation {
    Single(Box<dyn SingleInvocationHandler>),
    Stream(Box<dyn StreamInvocationHandler>),
}

/// Correlation table for outstanding invocations and streams, plus the
/// invocation-id counter. Ids are strictly increasing decimal strings, scoped
/// to one connection lifecycle and reset on every fresh start.
pub(crate) struct InvocationRegistry {
    pending: HashMap<String, PendingInvocation>,
    next_id: u64,
}

impl InvocationRegistry {
    pub(crate) fn new() -> Self {
        InvocationRegistry { pending: HashMap::new(), next_id: 0 }
    }

    pub(crate) fn next_invocation_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    /// Resets the counter for a fresh connection lifecycle. Pending entries
    /// were already failed when the previous lifecycle ended.
    pub(crate) fn reset(&mut self) {
        self.pending.clear();
        self.next_id = 0;
    }

    pub(crate) fn add_invocation<R: 'static + DeserializeOwned + Unpin + Send>(
        &mut self,
        invocation_id: String,
    ) -> ManualFuture<Result<R, HubError>> {
        let (invocation, future) = TypedInvocation::<R>::create();
        self.pending.insert(invocation_id, PendingInvocation::Single(Box::new(invocation)));

        future
    }

    pub(crate) fn add_stream<R: 'static + DeserializeOwned + Unpin + Send>(
        &mut self,
        invocation_id: String,
    ) -> ManualStream<Result<R, HubError>> {
        let (handler, stream) = TypedStream::<R>::create();
        self.pending.insert(invocation_id, PendingInvocation::Stream(Box::new(handler)));

        stream
    }

    /// Delivers the terminal event for an id. A completion for an unknown id
    /// (already settled, canceled, or foreign) is silently dropped, which is
    /// what makes terminal delivery at-most-once.
    pub(crate) fn complete(&mut self, completion: CompletionMessage) {
        match self.pending.remove(&completion.invocation_id) {
            Some(PendingInvocation::Single(handler)) => handler.complete(completion),
            Some(PendingInvocation::Stream(handler)) => handler.complete(completion),
            None => debug!("dropping completion for unknown invocation {}", completion.invocation_id),
        }
    }

    /// Delivers one stream item. Items for unknown ids are dropped; a dead
    /// consumer prunes the entry.
    pub(crate) fn push_stream_item(&mut self, item: StreamItemMessage) {
        match self.pending.get_mut(&item.invocation_id) {
            Some(PendingInvocation::Stream(handler)) => {
                if !handler.push(item.item) {
                    debug!("stream {} has no consumer anymore, pruning", item.invocation_id);
                    self.pending.remove(&item.invocation_id);
                }
            }
            Some(PendingInvocation::Single(_)) => {
                debug!("dropping stream item addressed to plain invocation {}", item.invocation_id);
            }
            None => debug!("dropping stream item for unknown invocation {}", item.invocation_id),
        }
    }

    /// Removes the entry for a locally canceled stream, ending the consumer
    /// stream without an error. Returns whether an entry existed.
    pub(crate) fn cancel(&mut self, invocation_id: &str) -> bool {
        match self.pending.remove(invocation_id) {
            Some(PendingInvocation::Stream(handler)) => {
                handler.cancel();
                true
            }
            Some(PendingInvocation::Single(handler)) => {
                handler.fail(HubError::ConnectionLost);
                true
            }
            None => false,
        }
    }

    /// Drops the entry without delivering anything, used when the caller side
    /// of an invocation future or stream has gone away.
    pub(crate) fn discard(&mut self, invocation_id: &str) {
        if let Some(PendingInvocation::Stream(handler)) = self.pending.remove(invocation_id) {
            handler.cancel();
        }
    }

    /// Fails every outstanding invocation and stream, emptying the table.
    /// Runs on every transition out of the connected state.
    pub(crate) fn fail_all(&mut self, error: HubError) {
        for (_, pending) in self.pending.drain() {
            match pending {
                PendingInvocation::Single(handler) => handler.fail(error.clone()),
                PendingInvocation::Stream(handler) => handler.fail(error.clone()),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
