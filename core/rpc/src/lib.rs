// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! RPC interaction patterns over a multiplexed transport
//!
//! Calls come in four shapes: unary, server-stream, client-stream and
//! bidi-stream. Every call runs a state machine that rejects operations the
//! pattern does not allow, is bounded by an optional deadline and ends with
//! either a result or a classified [`Status`].

mod call;
mod channel;
mod codec;
mod config;
mod context;
mod coordinator;
mod deadline;
mod error;
pub mod memory;
mod server;
mod status;
mod stream;
mod transport;

pub use call::{
    Call, CallHandle, CallReceiver, CallSender, CallState, CallSummary, Event, Lifecycle,
    Readiness,
};
pub use channel::Channel;
pub use codec::{Codec, Decoder, Encoder};
pub use config::ChannelConfig;
pub use context::Context;
pub use coordinator::{BidiCall, JoinPoint, RequestSink, StreamCoordinator};
pub use deadline::{Deadline, bounded, expired};
pub use error::TransportError;
pub use server::{HandlerResponse, RpcHandler, Server, ServiceRegistry, StreamRpcHandler};
pub use status::{Code, Status};
pub use stream::{RequestStream, ResponseStream};
pub use transport::{
    CallDescriptor, CallId, CallParts, DEADLINE_KEY, Frame, FrameSink, FrameSource, Inbound,
    IncomingCall, Listener, Pattern, STATUS_CODE_KEY, Transport, method_path,
};
