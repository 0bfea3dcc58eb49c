// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! In-process multiplexed transport
//!
//! [`connect`] returns the two ends of one logical connection. Every call
//! gets a bounded queue per direction, so a send suspends until the peer has
//! room for the frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::{
    CallDescriptor, CallId, CallParts, Frame, FrameSink, FrameSource, IncomingCall, Inbound,
    Listener, Transport,
};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct MemoryConfig {
    /// frames buffered per direction of a call
    #[serde(default = "default_buffer")]
    buffer: usize,

    /// calls waiting to be accepted by the listener
    #[serde(default = "default_backlog")]
    backlog: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            buffer: default_buffer(),
            backlog: default_backlog(),
        }
    }
}

fn default_buffer() -> usize {
    32
}

fn default_backlog() -> usize {
    128
}

impl MemoryConfig {
    pub fn with_buffer(self, buffer: usize) -> Self {
        MemoryConfig { buffer, ..self }
    }

    pub fn with_backlog(self, backlog: usize) -> Self {
        MemoryConfig { backlog, ..self }
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    pub fn backlog(&self) -> usize {
        self.backlog
    }
}

enum Envelope {
    Frame(Frame),
    End,
}

struct Shared {
    buffer: usize,
    connection: CancellationToken,
    next_id: AtomicU64,
    incoming: mpsc::Sender<IncomingCall>,
    client_calls: Mutex<HashMap<CallId, CancellationToken>>,
    server_calls: Mutex<HashMap<CallId, CancellationToken>>,
}

/// Create both ends of an in-memory connection.
pub fn connect(config: MemoryConfig) -> (MemoryTransport, MemoryListener) {
    let (incoming_tx, incoming_rx) = mpsc::channel(config.backlog.max(1));
    let shared = Arc::new(Shared {
        buffer: config.buffer.max(1),
        connection: CancellationToken::new(),
        next_id: AtomicU64::new(1),
        incoming: incoming_tx,
        client_calls: Mutex::new(HashMap::new()),
        server_calls: Mutex::new(HashMap::new()),
    });

    (
        MemoryTransport {
            shared: shared.clone(),
        },
        MemoryListener {
            shared,
            incoming: tokio::sync::Mutex::new(incoming_rx),
        },
    )
}

/// Client end of the connection
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    /// Drop the connection: every open call fails and new calls are refused.
    pub fn sever(&self) {
        debug!("severing in-memory connection");
        self.shared.connection.cancel();
    }

    pub fn is_severed(&self) -> bool {
        self.shared.connection.is_cancelled()
    }

    /// Calls opened by this end and not yet released
    pub fn open_calls(&self) -> usize {
        self.shared.client_calls.lock().len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, descriptor: CallDescriptor) -> Result<CallParts, TransportError> {
        let shared = &self.shared;
        if shared.connection.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let client_closed = shared.connection.child_token();
        let server_closed = shared.connection.child_token();
        let (to_server, from_client) = mpsc::channel(shared.buffer);
        let (to_client, from_server) = mpsc::channel(shared.buffer);

        let server_end = Endpoint {
            closed: server_closed.clone(),
            aborted: client_closed.clone(),
            connection: shared.connection.clone(),
        };
        let client_end = Endpoint {
            closed: client_closed.clone(),
            aborted: shared.connection.clone(),
            connection: shared.connection.clone(),
        };

        let method = descriptor.method.clone();
        let incoming = IncomingCall {
            descriptor,
            parts: CallParts {
                id,
                sink: Box::new(MemorySink::new(to_client, server_end.clone())),
                source: Box::new(MemorySource::new(from_client, server_end)),
            },
            abandoned: client_closed.clone(),
        };

        shared.server_calls.lock().insert(id, server_closed);
        let delivered = tokio::select! {
            _ = shared.connection.cancelled() => Err(TransportError::ConnectionClosed),
            res = shared.incoming.send(incoming) => {
                res.map_err(|_| TransportError::Refused("no listener is accepting calls".to_string()))
            }
        };
        if let Err(e) = delivered {
            shared.server_calls.lock().remove(&id);
            return Err(e);
        }

        shared.client_calls.lock().insert(id, client_closed);
        trace!(call_id = id, %method, "in-memory call opened");

        Ok(CallParts {
            id,
            sink: Box::new(MemorySink::new(to_server, client_end.clone())),
            source: Box::new(MemorySource::new(from_server, client_end)),
        })
    }

    fn close(&self, id: CallId) {
        if let Some(closed) = self.shared.client_calls.lock().remove(&id) {
            closed.cancel();
            trace!(call_id = id, "in-memory call closed by client");
        }
    }
}

/// Server end of the connection
pub struct MemoryListener {
    shared: Arc<Shared>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<IncomingCall>>,
}

impl MemoryListener {
    /// Calls accepted by this end and not yet released
    pub fn open_calls(&self) -> usize {
        self.shared.server_calls.lock().len()
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Option<IncomingCall> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.shared.connection.cancelled() => None,
            call = incoming.recv() => call,
        }
    }

    fn close(&self, id: CallId) {
        if let Some(closed) = self.shared.server_calls.lock().remove(&id) {
            closed.cancel();
            trace!(call_id = id, "in-memory call closed by server");
        }
    }
}

#[derive(Clone)]
struct Endpoint {
    /// this side released the call
    closed: CancellationToken,
    /// the peer abandoned the call or the connection dropped
    aborted: CancellationToken,
    connection: CancellationToken,
}

impl Endpoint {
    async fn interrupted(&self) {
        tokio::select! {
            _ = self.closed.cancelled() => {}
            _ = self.aborted.cancelled() => {}
        }
    }

    fn error(&self) -> TransportError {
        if self.connection.is_cancelled() {
            TransportError::Severed("connection severed".to_string())
        } else if self.closed.is_cancelled() {
            TransportError::Closed
        } else {
            TransportError::Severed("call abandoned by peer".to_string())
        }
    }
}

struct MemorySink {
    tx: Option<mpsc::Sender<Envelope>>,
    endpoint: Endpoint,
}

impl MemorySink {
    fn new(tx: mpsc::Sender<Envelope>, endpoint: Endpoint) -> Self {
        Self {
            tx: Some(tx),
            endpoint,
        }
    }

    async fn push(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::HalfClosed)?;
        tokio::select! {
            biased;
            _ = self.endpoint.interrupted() => Err(self.endpoint.error()),
            res = tx.send(envelope) => {
                if res.is_err() {
                    // the peer stopped reading; it reports its own outcome
                    trace!("peer no longer reading, frame discarded");
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.push(Envelope::Frame(frame)).await
    }

    async fn half_close(&mut self) -> Result<(), TransportError> {
        self.push(Envelope::End).await?;
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::Receiver<Envelope>,
    ended: bool,
    endpoint: Endpoint,
}

impl MemorySource {
    fn new(rx: mpsc::Receiver<Envelope>, endpoint: Endpoint) -> Self {
        Self {
            rx,
            ended: false,
            endpoint,
        }
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        if self.ended {
            return Ok(Inbound::EndOfStream);
        }

        tokio::select! {
            biased;
            _ = self.endpoint.interrupted() => Err(self.endpoint.error()),
            envelope = self.rx.recv() => match envelope {
                Some(Envelope::Frame(frame)) => Ok(Inbound::Frame(frame)),
                Some(Envelope::End) => {
                    self.ended = true;
                    Ok(Inbound::EndOfStream)
                }
                None => Err(TransportError::Severed(
                    "peer dropped the stream without ending it".to_string(),
                )),
            },
        }
    }
}
