// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Stream types exchanged with callers and handlers

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use futures::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::Status;

/// Request stream handed to stream-input handlers
pub type RequestStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Lazy, finite sequence of responses
///
/// Yields the messages of the call in arrival order. When the call fails, the
/// messages observed so far are followed by one `Err` and the stream ends.
/// Dropping an unfinished stream cancels its call.
pub struct ResponseStream<T> {
    inner: Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>,
    cancel: CancellationToken,
    finished: bool,
}

impl<T: Send + 'static> ResponseStream<T> {
    pub(crate) fn new<S>(inner: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = Result<T, Status>> + Send + 'static,
    {
        Self {
            inner: Box::pin(inner),
            cancel,
            finished: false,
        }
    }

    /// Cancel the underlying call. A no-op once the call is over.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain the stream, stopping at the first error.
    pub async fn collect_all(mut self) -> Result<Vec<T>, Status> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(status))) => {
                this.finished = true;
                Poll::Ready(Some(Err(status)))
            }
            other => other,
        }
    }
}

impl<T> Drop for ResponseStream<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.cancel.cancel();
        }
    }
}

impl<T> std::fmt::Debug for ResponseStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Code;
    use futures::stream;

    #[tokio::test]
    async fn test_stream_ends_after_error() {
        let items = stream::iter(vec![
            Ok(1),
            Ok(2),
            Err(Status::unavailable("gone")),
            Ok(3),
        ]);
        let token = CancellationToken::new();
        let mut responses = ResponseStream::new(items, token.clone());

        assert_eq!(responses.next().await.unwrap().unwrap(), 1);
        assert_eq!(responses.next().await.unwrap().unwrap(), 2);
        let err = responses.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        assert!(responses.next().await.is_none());

        drop(responses);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_drop_unfinished_cancels() {
        let token = CancellationToken::new();
        let responses = ResponseStream::new(stream::pending::<Result<u8, Status>>(), token.clone());
        drop(responses);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_collect_all() {
        let token = CancellationToken::new();
        let responses = ResponseStream::new(stream::iter(vec![Ok("a"), Ok("b")]), token.clone());
        assert_eq!(responses.collect_all().await.unwrap(), vec!["a", "b"]);
        assert!(!token.is_cancelled());
    }
}
