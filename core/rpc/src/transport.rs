// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Transport capability consumed by the call engine
//!
//! A transport carries many logical calls over one connection. Each call is a
//! pair of ordered frame streams, one per direction. End of stream is a
//! regular outcome of `receive`, distinct from a transport fault.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Metadata key carrying the status code of an error frame
pub const STATUS_CODE_KEY: &str = "greetrpc-status-code";

/// Metadata key carrying the remaining call budget in milliseconds
pub const DEADLINE_KEY: &str = "greetrpc-timeout";

/// Logical call identifier, unique per transport
pub type CallId = u64;

/// Interaction pattern of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// One request, one response
    Unary,
    /// One request, a stream of responses
    ServerStream,
    /// A stream of requests, one response
    ClientStream,
    /// Streams in both directions
    BidiStream,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Unary => "unary",
            Pattern::ServerStream => "server-stream",
            Pattern::ClientStream => "client-stream",
            Pattern::BidiStream => "bidi-stream",
        }
    }

    /// Whether the caller sends a stream of requests
    pub fn client_streaming(&self) -> bool {
        matches!(self, Pattern::ClientStream | Pattern::BidiStream)
    }

    /// Whether the server answers with a stream of responses
    pub fn server_streaming(&self) -> bool {
        matches!(self, Pattern::ServerStream | Pattern::BidiStream)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asks the transport to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    /// Method path, `service/method`
    pub method: String,
    pub pattern: Pattern,
    pub metadata: HashMap<String, String>,
}

impl CallDescriptor {
    pub fn new(method: impl Into<String>, pattern: Pattern) -> Self {
        Self {
            method: method.into(),
            pattern,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One unit on the wire: an opaque payload plus string metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
}

impl Frame {
    /// A regular message frame
    pub fn message(payload: Vec<u8>) -> Self {
        Self {
            payload,
            metadata: HashMap::new(),
        }
    }
}

/// Successful outcome of a receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    /// The peer half-closed its direction; no more frames will arrive
    EndOfStream,
}

/// Sending half of a logical call
#[async_trait]
pub trait FrameSink: Send {
    /// Suspends until the transport accepted the frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Signal that no more frames will be sent in this direction.
    async fn half_close(&mut self) -> Result<(), TransportError>;
}

/// Receiving half of a logical call
#[async_trait]
pub trait FrameSource: Send {
    /// Suspends until a frame arrives or the peer ends the stream.
    async fn receive(&mut self) -> Result<Inbound, TransportError>;
}

/// Both halves of an opened call
pub struct CallParts {
    pub id: CallId,
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl fmt::Debug for CallParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallParts").field("id", &self.id).finish()
    }
}

/// Client side of a multiplexed connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new logical call.
    async fn open(&self, descriptor: CallDescriptor) -> Result<CallParts, TransportError>;

    /// Release a logical call. Unknown or already released ids are ignored.
    fn close(&self, id: CallId);
}

/// A call opened by a remote caller
#[derive(Debug)]
pub struct IncomingCall {
    pub descriptor: CallDescriptor,
    pub parts: CallParts,
    /// Cancelled when the caller releases the call or the connection drops
    pub abandoned: CancellationToken,
}

/// Server side of a multiplexed connection
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next incoming call. `None` once the connection is gone.
    async fn accept(&self) -> Option<IncomingCall>;

    /// Release the server side of a call. Unknown ids are ignored.
    fn close(&self, id: CallId);
}

/// Build the `service/method` path used to route calls.
pub fn method_path(service_name: &str, method_name: &str) -> String {
    format!("{}/{}", service_name, method_name)
}
