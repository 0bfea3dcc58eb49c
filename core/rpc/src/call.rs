// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Call lifecycle
//!
//! [`Lifecycle`] is the per-pattern state machine: it decides which send,
//! receive and half-close operations are legal and where each one leads.
//! [`Call`] binds a lifecycle to the two halves of a transport call, the
//! deadline governor and the release of the transport resource.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::{Decoder, Encoder};
use crate::deadline::{self, Deadline, DeadlineGovernor};
use crate::error::TransportError;
use crate::status::Status;
use crate::transport::{
    CallDescriptor, CallId, CallParts, Frame, FrameSink, FrameSource, Inbound, Pattern, Transport,
};

/// Lifecycle state of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Unary and server-stream: the single request went out
    Sent,
    /// Client-stream: requests sent so far; server-stream: responses received so far
    Streaming(usize),
    /// Client-stream: request stream closed, waiting for the aggregate response
    HalfClosed,
    /// Bidi-stream: at least one direction is still open
    Active,
    Completed,
    Failed(Status),
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed(_))
    }

    /// Terminal error, if the call failed
    pub fn error(&self) -> Option<&Status> {
        match self {
            CallState::Failed(status) => Some(status),
            _ => None,
        }
    }

    // transitions never lower the rank
    fn rank(&self) -> u8 {
        match self {
            CallState::Idle => 0,
            CallState::Sent => 1,
            CallState::Streaming(_) | CallState::Active => 2,
            CallState::HalfClosed => 3,
            CallState::Completed | CallState::Failed(_) => 4,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => f.write_str("idle"),
            CallState::Sent => f.write_str("sent"),
            CallState::Streaming(n) => write!(f, "streaming({})", n),
            CallState::HalfClosed => f.write_str("half-closed"),
            CallState::Active => f.write_str("active"),
            CallState::Completed => f.write_str("completed"),
            CallState::Failed(status) => write!(f, "failed({})", status.code()),
        }
    }
}

/// Operations observed by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Send,
    HalfClose,
    /// A message arrived from the peer
    Message,
    /// The peer ended its stream
    EndOfStream,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Send => "send",
            Event::HalfClose => "half-close",
            Event::Message => "receive",
            Event::EndOfStream => "end-of-stream",
        };
        f.write_str(name)
    }
}

/// Whether a receive has to reach the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    /// The inbound direction is over; the receive yields "no more messages"
    Finished,
}

/// Message counts of a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSummary {
    pub sent: usize,
    pub received: usize,
}

/// Per-pattern call state machine
#[derive(Debug, Clone)]
pub struct Lifecycle {
    pattern: Pattern,
    state: CallState,
    send_closed: bool,
    recv_ended: bool,
    summary: CallSummary,
}

impl Lifecycle {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            state: CallState::Idle,
            send_closed: false,
            recv_ended: false,
            summary: CallSummary::default(),
        }
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn summary(&self) -> CallSummary {
        self.summary
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Validate `event` without applying it.
    pub fn check(&self, event: Event) -> Result<(), Status> {
        if let CallState::Failed(status) = &self.state {
            return Err(status.clone());
        }
        self.next(event).map(|_| ())
    }

    /// Apply `event`, moving to the next state.
    pub fn apply(&mut self, event: Event) -> Result<(), Status> {
        if let CallState::Failed(status) = &self.state {
            return Err(status.clone());
        }

        let next = self.next(event)?;
        debug_assert!(next.rank() >= self.state.rank());

        match event {
            Event::Send => self.summary.sent += 1,
            Event::HalfClose => self.send_closed = true,
            Event::Message => self.summary.received += 1,
            Event::EndOfStream => self.recv_ended = true,
        }
        self.state = next;
        Ok(())
    }

    /// Decide whether a receive may proceed.
    pub fn check_receive(&self) -> Result<Readiness, Status> {
        use CallState::*;

        match (&self.state, self.pattern) {
            (Failed(status), _) => Err(status.clone()),
            (Completed, pattern) if pattern.server_streaming() => Ok(Readiness::Finished),
            (Active, Pattern::BidiStream) if self.recv_ended => Ok(Readiness::Finished),
            (Completed, _) => Err(Status::protocol_violation(format!(
                "receive on a completed {} call",
                self.pattern
            ))),
            (Idle, Pattern::Unary | Pattern::ServerStream) => Err(Status::protocol_violation(
                format!("receive before the {} request was sent", self.pattern),
            )),
            (Idle | Streaming(_), Pattern::ClientStream) => Err(Status::protocol_violation(
                "receive before the request stream was half-closed",
            )),
            _ => Ok(Readiness::Pending),
        }
    }

    /// Move to `Failed`. Returns false if the call was already terminal.
    pub fn fail(&mut self, status: Status) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = CallState::Failed(status);
        true
    }

    fn next(&self, event: Event) -> Result<CallState, Status> {
        use CallState::*;
        use Event::*;
        use Pattern::*;

        let next = match (self.pattern, &self.state, event) {
            (Unary, Idle, Send) => Some(Sent),
            (Unary, Sent, HalfClose) if !self.send_closed => Some(Sent),
            (Unary, Sent, Message) => Some(Completed),

            (ServerStream, Idle, Send) => Some(Sent),
            (ServerStream, Sent, HalfClose) if !self.send_closed => Some(Sent),
            (ServerStream, Streaming(n), HalfClose) if !self.send_closed => Some(Streaming(*n)),
            (ServerStream, Sent, Message) => Some(Streaming(1)),
            (ServerStream, Streaming(n), Message) => Some(Streaming(n + 1)),
            (ServerStream, Sent | Streaming(_) | Completed, EndOfStream) => Some(Completed),

            (ClientStream, Idle, Send) => Some(Streaming(1)),
            (ClientStream, Streaming(n), Send) => Some(Streaming(n + 1)),
            (ClientStream, Idle | Streaming(_), HalfClose) => Some(HalfClosed),
            (ClientStream, HalfClosed, Message) => Some(Completed),

            (BidiStream, Idle | Active, Send) if !self.send_closed => Some(Active),
            (BidiStream, Idle | Active, HalfClose) if !self.send_closed => {
                Some(if self.recv_ended { Completed } else { Active })
            }
            (BidiStream, Idle | Active, Message) if !self.recv_ended => Some(Active),
            (BidiStream, Idle | Active, EndOfStream) => {
                Some(if self.send_closed { Completed } else { Active })
            }
            (BidiStream, Completed, EndOfStream) => Some(Completed),

            _ => None,
        };

        next.ok_or_else(|| {
            Status::protocol_violation(format!(
                "{} is not legal on a {} call in state {}",
                event, self.pattern, self.state
            ))
        })
    }
}

/// State shared by every handle of one call
pub(crate) struct CallCore {
    id: CallId,
    method: String,
    deadline: Option<Deadline>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<CallState>,
    /// cancelled when the call fails
    abort: CancellationToken,
    /// cancelled when the call reaches any terminal state
    done: CancellationToken,
    transport: Arc<dyn Transport>,
    released: AtomicBool,
}

impl CallCore {
    pub(crate) fn id(&self) -> CallId {
        self.id
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    fn pattern(&self) -> Pattern {
        self.lifecycle.lock().pattern()
    }

    fn state(&self) -> CallState {
        self.lifecycle.lock().state().clone()
    }

    fn check(&self, event: Event) -> Result<(), Status> {
        self.guard(|lifecycle| lifecycle.check(event))
    }

    fn apply(&self, event: Event) -> Result<(), Status> {
        self.guard(|lifecycle| lifecycle.apply(event))
    }

    fn check_receive(&self) -> Result<Readiness, Status> {
        self.guard(|lifecycle| lifecycle.check_receive())
    }

    // Run a lifecycle operation. An illegal operation on a live call fails it.
    fn guard<R>(
        &self,
        op: impl FnOnce(&mut Lifecycle) -> Result<R, Status>,
    ) -> Result<R, Status> {
        let mut lifecycle = self.lifecycle.lock();
        let was_terminal = lifecycle.is_terminal();
        let before = lifecycle.state().clone();

        match op(&mut *lifecycle) {
            Ok(value) => {
                let changed = *lifecycle.state() != before;
                self.settle(lifecycle, changed);
                Ok(value)
            }
            Err(status) => {
                if !was_terminal && lifecycle.fail(status.clone()) {
                    debug!(
                        call_id = self.id,
                        method = %self.method,
                        code = %status.code(),
                        "call failed: {}",
                        status.message()
                    );
                    self.settle(lifecycle, true);
                }
                Err(status)
            }
        }
    }

    /// Fail the call. Returns the terminal error the call ends up with.
    pub(crate) fn fail(&self, status: Status) -> Status {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.fail(status.clone()) {
            debug!(
                call_id = self.id,
                method = %self.method,
                code = %status.code(),
                "call failed: {}",
                status.message()
            );
            self.settle(lifecycle, true);
            return status;
        }

        match lifecycle.state() {
            CallState::Failed(existing) => existing.clone(),
            _ => status,
        }
    }

    fn cancel(&self) {
        self.fail(Status::cancelled(format!(
            "call to {} cancelled by its owner",
            self.method
        )));
    }

    // Publish while still holding the lifecycle lock so watchers never see
    // states out of order.
    fn settle(&self, lifecycle: MutexGuard<'_, Lifecycle>, changed: bool) {
        if !changed {
            return;
        }

        let state = lifecycle.state().clone();
        let terminal = state.is_terminal();
        let failed = state.error().is_some();
        trace!(call_id = self.id, %state, "call state changed");
        self.state_tx.send_replace(state);
        drop(lifecycle);

        if terminal {
            if failed {
                self.abort.cancel();
            }
            self.done.cancel();
            self.release();
        }
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.transport.close(self.id);
            trace!(call_id = self.id, "transport call released");
        }
    }

    fn terminal_status(&self) -> Status {
        match self.lifecycle.lock().state() {
            CallState::Failed(status) => status.clone(),
            state => Status::protocol_violation(format!("call is {}", state)),
        }
    }

    /// Run `fut` unless the call fails first.
    async fn interruptible<F: Future>(&self, fut: F) -> Result<F::Output, Status> {
        tokio::select! {
            biased;
            _ = self.abort.cancelled() => Err(self.terminal_status()),
            output = fut => Ok(output),
        }
    }

    /// Run a transport operation; a transport error fails the call.
    async fn governed<T, F>(&self, fut: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        match self.interruptible(fut).await? {
            Ok(value) => Ok(value),
            Err(err) => Err(self.fail(err.into())),
        }
    }
}

impl Drop for CallCore {
    fn drop(&mut self) {
        self.done.cancel();
        self.release();
    }
}

/// One invocation, owned by the side that opened it
pub struct Call {
    core: Arc<CallCore>,
    sender: CallSender,
    receiver: CallReceiver,
}

impl Call {
    pub(crate) async fn open(
        transport: Arc<dyn Transport>,
        descriptor: CallDescriptor,
        deadline: Option<Deadline>,
    ) -> Result<Call, Status> {
        if deadline.is_some_and(|d| d.is_expired()) {
            return Err(Status::deadline_exceeded(format!(
                "deadline expired before {} was opened",
                descriptor.method
            )));
        }

        let method = descriptor.method.clone();
        let pattern = descriptor.pattern;
        let CallParts { id, sink, source } =
            deadline::bounded(deadline, transport.open(descriptor), "opening the call").await??;

        let (state_tx, _) = watch::channel(CallState::Idle);
        let core = Arc::new(CallCore {
            id,
            method,
            deadline,
            lifecycle: Mutex::new(Lifecycle::new(pattern)),
            state_tx,
            abort: CancellationToken::new(),
            done: CancellationToken::new(),
            transport,
            released: AtomicBool::new(false),
        });

        if let Some(deadline) = deadline {
            DeadlineGovernor::arm(Arc::downgrade(&core), deadline, core.done.clone());
        }

        debug!(call_id = id, method = %core.method, %pattern, "call opened");

        Ok(Call {
            sender: CallSender {
                core: core.clone(),
                sink,
            },
            receiver: CallReceiver {
                core: core.clone(),
                source,
            },
            core,
        })
    }

    pub fn id(&self) -> CallId {
        self.core.id
    }

    pub fn method(&self) -> &str {
        &self.core.method
    }

    pub fn pattern(&self) -> Pattern {
        self.core.pattern()
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.core.deadline
    }

    pub fn state(&self) -> CallState {
        self.core.state()
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            core: self.core.clone(),
        }
    }

    pub async fn send(&mut self, payload: Vec<u8>) -> Result<(), Status> {
        self.sender.send(payload).await
    }

    pub async fn half_close(&mut self) -> Result<(), Status> {
        self.sender.half_close().await
    }

    pub async fn receive(&mut self) -> Result<Option<Frame>, Status> {
        self.receiver.receive().await
    }

    /// Separate the two directions so they can run concurrently.
    pub fn split(self) -> (CallSender, CallReceiver) {
        (self.sender, self.receiver)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.core.id)
            .field("method", &self.core.method)
            .field("state", &self.core.state())
            .finish()
    }
}

/// Cloneable control handle of a call
#[derive(Clone)]
pub struct CallHandle {
    core: Arc<CallCore>,
}

impl CallHandle {
    pub fn id(&self) -> CallId {
        self.core.id
    }

    pub fn state(&self) -> CallState {
        self.core.state()
    }

    pub fn summary(&self) -> CallSummary {
        self.core.lifecycle.lock().summary()
    }

    pub fn is_terminal(&self) -> bool {
        self.core.state().is_terminal()
    }

    /// Cancel the call. A no-op once the call is terminal.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    /// Suspend until the call reaches a terminal state.
    pub async fn wait(&self) -> CallState {
        let mut state_rx = self.core.state_tx.subscribe();
        match state_rx.wait_for(CallState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.core.state(),
        }
    }

    /// Cancel the call when `token` is cancelled.
    pub fn cancel_on(&self, token: CancellationToken) {
        let call = Arc::downgrade(&self.core);
        let done = self.core.done.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = done.cancelled() => {}
                _ = token.cancelled() => {
                    if let Some(call) = call.upgrade() {
                        call.cancel();
                    }
                }
            }
        });
    }

    pub(crate) async fn interruptible<F: Future>(&self, fut: F) -> Result<F::Output, Status> {
        self.core.interruptible(fut).await
    }

    /// The call's terminal error if it failed, otherwise `status`
    pub(crate) fn terminal_or(&self, status: Status) -> Status {
        match self.core.state() {
            CallState::Failed(existing) => existing,
            _ => status,
        }
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.core.id)
            .field("state", &self.core.state())
            .finish()
    }
}

/// Outbound direction of a call
pub struct CallSender {
    core: Arc<CallCore>,
    sink: Box<dyn FrameSink>,
}

impl CallSender {
    pub async fn send(&mut self, payload: Vec<u8>) -> Result<(), Status> {
        self.core.check(Event::Send)?;
        self.core
            .governed(self.sink.send(Frame::message(payload)))
            .await?;
        self.core.apply(Event::Send)
    }

    pub async fn send_message<M: Encoder>(&mut self, message: M) -> Result<(), Status> {
        let payload = message.encode().map_err(|status| self.core.fail(status))?;
        self.send(payload).await
    }

    pub async fn half_close(&mut self) -> Result<(), Status> {
        self.core.check(Event::HalfClose)?;
        self.core.governed(self.sink.half_close()).await?;
        self.core.apply(Event::HalfClose)
    }

    /// Wait between two sends; interrupted if the call fails meanwhile.
    pub async fn pace(&mut self, delay: Duration) -> Result<(), Status> {
        if delay.is_zero() {
            return Ok(());
        }
        self.core.interruptible(tokio::time::sleep(delay)).await
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            core: self.core.clone(),
        }
    }
}

/// Inbound direction of a call
pub struct CallReceiver {
    core: Arc<CallCore>,
    source: Box<dyn FrameSource>,
}

impl CallReceiver {
    /// Receive the next frame. `Ok(None)` once the inbound direction ended.
    pub async fn receive(&mut self) -> Result<Option<Frame>, Status> {
        if self.core.check_receive()? == Readiness::Finished {
            return Ok(None);
        }

        match self.core.governed(self.source.receive()).await? {
            Inbound::Frame(frame) => {
                if let Some(status) = Status::from_frame(&frame) {
                    return Err(self.core.fail(status));
                }
                self.core.apply(Event::Message)?;
                Ok(Some(frame))
            }
            Inbound::EndOfStream => {
                self.core.apply(Event::EndOfStream)?;
                Ok(None)
            }
        }
    }

    pub async fn receive_message<M: Decoder>(&mut self) -> Result<Option<M>, Status> {
        match self.receive().await? {
            Some(frame) => M::decode(&frame.payload)
                .map(Some)
                .map_err(|status| self.core.fail(status)),
            None => Ok(None),
        }
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            core: self.core.clone(),
        }
    }
}
