mod manual_future;
mod manual_stream;

pub(crate) use manual_future::{ManualFuture, ManualFutureCompleter};
pub(crate) use manual_stream::{ManualStream, ManualStreamCompleter};
