// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Client-side RPC channel implementation
//!
//! Provides a Channel type for making RPC calls over a shared transport.
//! Supports the four interaction patterns; every call gets its own logical
//! stream on the transport and its own deadline.

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures::StreamExt;
use futures::stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::call::Call;
use crate::codec::{Decoder, Encoder};
use crate::config::ChannelConfig;
use crate::coordinator::{BidiCall, StreamCoordinator};
use crate::deadline::Deadline;
use crate::status::Status;
use crate::stream::ResponseStream;
use crate::transport::{CallDescriptor, DEADLINE_KEY, Pattern, Transport, method_path};

struct ChannelInner {
    transport: Arc<dyn Transport>,
    config: ChannelConfig,
    coordinator: StreamCoordinator,
}

/// Client-side channel for making RPC calls
///
/// Cheap to clone; all clones share the transport.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Create a new channel over `transport`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ChannelConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: ChannelConfig) -> Self {
        let coordinator = StreamCoordinator::from_config(&config);
        Self {
            inner: Arc::new(ChannelInner {
                transport,
                config,
                coordinator,
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Open a call and hand back its state machine.
    ///
    /// `timeout` falls back to the channel default; with neither the call is
    /// unbounded.
    pub async fn open_call(
        &self,
        service_name: &str,
        method_name: &str,
        pattern: Pattern,
        timeout: Option<Duration>,
    ) -> Result<Call, Status> {
        // a timeout beyond the clock's range leaves the call unbounded
        let deadline = timeout
            .or(self.inner.config.default_timeout())
            .and_then(Deadline::checked_after);

        let mut descriptor = CallDescriptor::new(method_path(service_name, method_name), pattern);
        if let Some(deadline) = deadline {
            descriptor = descriptor.with_metadata(DEADLINE_KEY, deadline.to_header());
        }

        Call::open(self.inner.transport.clone(), descriptor, deadline).await
    }

    /// Make a unary call
    ///
    /// Sends a single request and receives a single response.
    ///
    /// # Arguments
    /// * `service_name` - The name of the service (e.g., "greet.GreetService")
    /// * `method_name` - The name of the method (e.g., "Greet")
    /// * `request` - The request message
    /// * `timeout` - Optional deadline for the whole call
    pub async fn unary<Req, Res>(
        &self,
        service_name: &str,
        method_name: &str,
        request: Req,
        timeout: Option<Duration>,
    ) -> Result<Res, Status>
    where
        Req: Encoder,
        Res: Decoder,
    {
        tracing::debug!(%service_name, %method_name, "starting unary call");

        let call = self
            .open_call(service_name, method_name, Pattern::Unary, timeout)
            .await?;
        let (mut sender, mut receiver) = call.split();

        sender.send_message(request).await?;
        sender.half_close().await?;

        receiver
            .receive_message()
            .await?
            .ok_or_else(|| Status::protocol_violation("unary call ended without a response"))
    }

    /// Make a server-streaming call
    ///
    /// Sends a single request. The call is opened lazily, on the first poll of
    /// the returned stream.
    pub fn unary_stream<Req, Res>(
        &self,
        service_name: &str,
        method_name: &str,
        request: Req,
        timeout: Option<Duration>,
    ) -> ResponseStream<Res>
    where
        Req: Encoder + Send + 'static,
        Res: Decoder + Send + 'static,
    {
        let channel = self.clone();
        let service_name = service_name.to_string();
        let method_name = method_name.to_string();
        let cancel = CancellationToken::new();
        let cancel_on = cancel.clone();

        let responses = try_stream! {
            tracing::debug!(%service_name, %method_name, "starting server-stream call");

            let call = channel
                .open_call(&service_name, &method_name, Pattern::ServerStream, timeout)
                .await?;
            call.handle().cancel_on(cancel_on);
            let (mut sender, mut receiver) = call.split();

            sender.send_message(request).await?;
            sender.half_close().await?;

            while let Some(response) = receiver.receive_message::<Res>().await? {
                yield response;
            }
        };

        ResponseStream::new(responses, cancel)
    }

    /// Make a client-streaming call
    ///
    /// Sends every request of `requests`, paced by the channel configuration,
    /// half-closes and waits for the aggregate response.
    pub async fn stream_unary<Req, Res, S>(
        &self,
        service_name: &str,
        method_name: &str,
        requests: S,
        timeout: Option<Duration>,
    ) -> Result<Res, Status>
    where
        Req: Encoder,
        Res: Decoder,
        S: Stream<Item = Req>,
    {
        tracing::debug!(%service_name, %method_name, "starting client-stream call");

        let call = self
            .open_call(service_name, method_name, Pattern::ClientStream, timeout)
            .await?;
        let handle = call.handle();
        let (mut sender, mut receiver) = call.split();
        let pacing = self.inner.config.send_pacing();

        futures::pin_mut!(requests);
        let mut first = true;
        while let Some(request) = handle.interruptible(requests.next()).await? {
            if !first {
                sender.pace(pacing).await?;
            }
            first = false;
            sender.send_message(request).await?;
        }
        sender.half_close().await?;

        receiver.receive_message().await?.ok_or_else(|| {
            Status::protocol_violation("client-stream call ended without a response")
        })
    }

    /// Make a bidi-streaming call
    ///
    /// Returns the request sink, the lazy response stream and the join point
    /// of the call. Requests go out from a dedicated task, paced by the
    /// channel configuration.
    pub async fn stream_stream<Req, Res>(
        &self,
        service_name: &str,
        method_name: &str,
        timeout: Option<Duration>,
    ) -> Result<BidiCall<Req, Res>, Status>
    where
        Req: Encoder + Send + 'static,
        Res: Decoder + Send + 'static,
    {
        tracing::debug!(%service_name, %method_name, "starting bidi-stream call");

        let call = self
            .open_call(service_name, method_name, Pattern::BidiStream, timeout)
            .await?;
        self.inner.coordinator.start(call)
    }
}
