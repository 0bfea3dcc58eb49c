// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Coordination of the two directions of a bidi-stream call
//!
//! The outbound direction runs in its own task: it drains a queue of
//! requests, sends them with the configured pacing and half-closes once the
//! queue's sink is gone. The inbound direction is a lazy [`ResponseStream`].
//! The call completes only when both directions are done; [`JoinPoint`]
//! waits for that, or for the first failure of either side.

use std::time::Duration;

use async_stream::try_stream;
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::call::{Call, CallHandle, CallReceiver, CallSender, CallState, CallSummary};
use crate::codec::{Decoder, Encoder};
use crate::config::ChannelConfig;
use crate::status::Status;
use crate::stream::ResponseStream;
use crate::transport::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCoordinator {
    pacing: Duration,
    queue: usize,
}

impl StreamCoordinator {
    pub fn new(pacing: Duration, queue: usize) -> Self {
        Self {
            pacing,
            queue: queue.max(1),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.send_pacing(), config.outbound_queue())
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Start both directions of an opened bidi-stream call.
    pub fn start<Req, Res>(&self, call: Call) -> Result<BidiCall<Req, Res>, Status>
    where
        Req: Encoder + Send + 'static,
        Res: Decoder + Send + 'static,
    {
        if call.pattern() != Pattern::BidiStream {
            return Err(Status::protocol_violation(format!(
                "stream coordination needs a bidi-stream call, got {}",
                call.pattern()
            )));
        }

        let handle = call.handle();
        let (sender, receiver) = call.split();
        let (queue_tx, queue_rx) = mpsc::channel(self.queue);

        let outbound = tokio::spawn(outbound(sender, queue_rx, self.pacing));

        let cancel = CancellationToken::new();
        handle.cancel_on(cancel.clone());
        let responses = ResponseStream::new(inbound::<Res>(receiver), cancel);

        debug!(call_id = handle.id(), pacing = ?self.pacing, "bidi stream started");

        Ok(BidiCall {
            sink: RequestSink {
                tx: queue_tx,
                handle: handle.clone(),
            },
            responses,
            join: JoinPoint { handle, outbound },
        })
    }
}

async fn outbound<Req: Encoder>(
    mut sender: CallSender,
    mut queue: mpsc::Receiver<Req>,
    pacing: Duration,
) -> Result<(), Status> {
    let handle = sender.handle();
    let mut first = true;

    while let Some(request) = handle.interruptible(queue.recv()).await? {
        if !first {
            sender.pace(pacing).await?;
        }
        first = false;
        sender.send_message(request).await?;
    }

    sender.half_close().await?;
    trace!(call_id = handle.id(), "outbound direction half-closed");
    Ok(())
}

fn inbound<Res>(mut receiver: CallReceiver) -> impl Stream<Item = Result<Res, Status>> + Send
where
    Res: Decoder + Send + 'static,
{
    try_stream! {
        while let Some(message) = receiver.receive_message::<Res>().await? {
            yield message;
        }
    }
}

/// Queue feeding the outbound direction of a bidi call
///
/// Dropping the sink (or calling [`RequestSink::close`]) half-closes the
/// outbound direction once every queued request went out.
pub struct RequestSink<Req> {
    tx: mpsc::Sender<Req>,
    handle: CallHandle,
}

impl<Req> RequestSink<Req> {
    /// Queue a request. Suspends while the queue is full.
    pub async fn send(&self, request: Req) -> Result<(), Status> {
        if let CallState::Failed(status) = self.handle.state() {
            return Err(status);
        }
        self.tx
            .send(request)
            .await
            .map_err(|_| match self.handle.state() {
                CallState::Failed(status) => status,
                state => Status::protocol_violation(format!(
                    "outbound direction is closed, call is {}",
                    state
                )),
            })
    }

    pub fn close(self) {
        drop(self.tx);
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }
}

/// Joint termination of a bidi call
pub struct JoinPoint {
    handle: CallHandle,
    outbound: JoinHandle<Result<(), Status>>,
}

impl JoinPoint {
    /// Wait until the call completed or failed.
    ///
    /// Completion needs both the request sink closed and the response stream
    /// drained to its end.
    pub async fn join(self) -> Result<CallSummary, Status> {
        let state = self.handle.wait().await;

        if let Err(err) = self.outbound.await {
            return Err(self.handle.terminal_or(err.into()));
        }

        match state {
            CallState::Failed(status) => Err(status),
            _ => Ok(self.handle.summary()),
        }
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }
}

/// An active bidi-stream call
pub struct BidiCall<Req, Res> {
    sink: RequestSink<Req>,
    responses: ResponseStream<Res>,
    join: JoinPoint,
}

impl<Req, Res> BidiCall<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn handle(&self) -> CallHandle {
        self.join.handle()
    }

    pub fn split(self) -> (RequestSink<Req>, ResponseStream<Res>, JoinPoint) {
        (self.sink, self.responses, self.join)
    }

    /// Send `requests`, hand every response to `on_response` as it arrives,
    /// then wait for the call to end.
    pub async fn drive<S, F>(self, requests: S, mut on_response: F) -> Result<CallSummary, Status>
    where
        S: Stream<Item = Req>,
        F: FnMut(Res),
    {
        let (sink, mut responses, join) = self.split();

        // a failed call stops the feed even while `requests` is pending
        let feed = async move {
            let handle = sink.handle();
            futures::pin_mut!(requests);
            while let Ok(Some(request)) = handle.interruptible(requests.next()).await {
                if sink.send(request).await.is_err() {
                    break;
                }
            }
        };

        let consume = async {
            while let Some(response) = responses.next().await {
                on_response(response?);
            }
            Ok::<(), Status>(())
        };

        let ((), consumed) = tokio::join!(feed, consume);
        let joined = join.join().await;
        consumed.and(joined)
    }
}
