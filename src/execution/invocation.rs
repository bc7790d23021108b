use serde::de::DeserializeOwned;

use crate::completer::{ManualFuture, ManualFutureCompleter};
use crate::errors::HubError;
use crate::protocol::invoke::CompletionMessage;

/// Type-erased continuation of a single-result invocation.
pub(crate) trait SingleInvocationHandler: Send {
    fn complete(self: Box<Self>, completion: CompletionMessage);
    fn fail(self: Box<Self>, error: HubError);
}

/// Decodes the completion payload into `R` and settles the caller's future.
pub(crate) struct TypedInvocation<R: DeserializeOwned + Unpin> {
    completer: ManualFutureCompleter<Result<R, HubError>>,
}

impl<R: 'static + DeserializeOwned + Unpin + Send> TypedInvocation<R> {
    pub(crate) fn create() -> (Self, ManualFuture<Result<R, HubError>>) {
        let (future, completer) = ManualFuture::new();

        (TypedInvocation { completer }, future)
    }
}

impl<R: 'static + DeserializeOwned + Unpin + Send> SingleInvocationHandler for TypedInvocation<R> {
    fn complete(self: Box<Self>, completion: CompletionMessage) {
        if let Some(error) = completion.error {
            self.completer.complete(Err(HubError::Hub(error)));
            return;
        }

        // A void completion carries no result field; decode it as JSON null so
        // `invoke::<()>` and optional results behave uniformly.
        let value = completion.result.unwrap_or(serde_json::Value::Null);
        match serde_json::from_value::<R>(value) {
            Ok(result) => self.completer.complete(Ok(result)),
            Err(error) => self.completer.complete(Err(HubError::serialization(error))),
        }
    }

    fn fail(self: Box<Self>, error: HubError) {
        self.completer.complete(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn completion_with_result_resolves() {
        let (invocation, future) = TypedInvocation::<String>::create();

        Box::new(invocation).complete(CompletionMessage::result("1".to_string(), Some(json!("hi"))));

        assert_eq!(future.await.unwrap(), "hi");
    }

    #[test_log::test(tokio::test)]
    async fn completion_with_error_fails() {
        let (invocation, future) = TypedInvocation::<String>::create();

        Box::new(invocation).complete(CompletionMessage::error("1".to_string(), "boom".to_string()));

        assert_eq!(future.await.unwrap_err(), HubError::Hub("boom".to_string()));
    }

    #[test_log::test(tokio::test)]
    async fn void_completion_resolves_a_unit_invocation() {
        let (invocation, future) = TypedInvocation::<()>::create();

        Box::new(invocation).complete(CompletionMessage::result("1".to_string(), None));

        assert!(future.await.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn undecodable_result_fails_with_serialization() {
        let (invocation, future) = TypedInvocation::<u32>::create();

        Box::new(invocation).complete(CompletionMessage::result("1".to_string(), Some(json!("nan"))));

        assert!(matches!(future.await.unwrap_err(), HubError::Serialization(_)));
    }
}
