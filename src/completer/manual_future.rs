use std::future::Future;
use std::marker::Unpin;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use log::warn;

enum State<T> {
    Incomplete,
    Waiting(Waker),
    Complete(Option<T>),
}

/// A future completed from the outside, exactly once, by its paired
/// [`ManualFutureCompleter`]. Invocation bookkeeping hands the future to the
/// caller and keeps the completer until the terminal event arrives.
pub(crate) struct ManualFuture<T: Unpin> {
    state: Arc<Mutex<State<T>>>,
}

impl<T: Unpin> ManualFuture<T> {
    pub(crate) fn new() -> (Self, ManualFutureCompleter<T>) {
        let state = Arc::new(Mutex::new(State::Incomplete));

        (Self { state: state.clone() }, ManualFutureCompleter { state })
    }
}

pub(crate) struct ManualFutureCompleter<T: Unpin> {
    state: Arc<Mutex<State<T>>>,
}

impl<T: Unpin> ManualFutureCompleter<T> {
    /// Resolves the paired future. The terminal event for an invocation is
    /// delivered at most once, so completing twice is a bug in the registry.
    pub(crate) fn complete(self, value: T) {
        let mut state = self.state.lock().unwrap();

        match std::mem::replace(&mut *state, State::Complete(Some(value))) {
            State::Incomplete => {}
            State::Waiting(waker) => waker.wake(),
            State::Complete(_) => warn!("completer fired for an already settled future"),
        }
    }
}

impl<T: Unpin> Future for ManualFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let mut state = self.state.lock().unwrap();

        match &mut *state {
            s @ State::Incomplete => *s = State::Waiting(cx.waker().clone()),
            State::Waiting(waker) if waker.will_wake(cx.waker()) => {}
            s @ State::Waiting(_) => *s = State::Waiting(cx.waker().clone()),
            State::Complete(value) => {
                if let Some(value) = value.take() {
                    return Poll::Ready(value);
                }
                warn!("settled future polled again");
            }
        }

        Poll::Pending
    }
}
