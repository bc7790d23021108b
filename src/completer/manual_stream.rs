use std::collections::VecDeque;
use std::marker::Unpin;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::Stream;

struct State<T> {
    queue: VecDeque<T>,
    waker: Option<Waker>,
    closed: bool,
}

/// A stream fed from the outside by its paired [`ManualStreamCompleter`].
/// Items are yielded in push order; the stream ends when the completer closes
/// it or is dropped.
pub(crate) struct ManualStream<T: Unpin> {
    state: Arc<Mutex<State<T>>>,
}

impl<T: Unpin> ManualStream<T> {
    pub(crate) fn create() -> (Self, ManualStreamCompleter<T>) {
        let state = Arc::new(Mutex::new(State {
            queue: VecDeque::new(),
            waker: None,
            closed: false,
        }));

        (Self { state: state.clone() }, ManualStreamCompleter { state })
    }
}

impl<T: Unpin> Stream for ManualStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<T>> {
        let mut state = self.state.lock().unwrap();

        if let Some(item) = state.queue.pop_front() {
            return Poll::Ready(Some(item));
        }

        if state.closed {
            return Poll::Ready(None);
        }

        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

pub(crate) struct ManualStreamCompleter<T: Unpin> {
    state: Arc<Mutex<State<T>>>,
}

impl<T: Unpin> ManualStreamCompleter<T> {
    /// Queues one item. Returns false when the consumer side is gone or the
    /// stream is already closed, so the registry can drop dead bookkeeping.
    pub(crate) fn push(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.closed || Arc::strong_count(&self.state) < 2 {
            return false;
        }

        state.queue.push_back(item);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }

        true
    }

    /// Ends the stream; queued items are still drained by the consumer.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();

        state.closed = true;
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }
}

impl<T: Unpin> Drop for ManualStreamCompleter<T> {
    fn drop(&mut self) {
        self.close();
    }
}
