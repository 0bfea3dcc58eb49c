// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Server-side RPC handling implementation
//!
//! Provides a Server type that accepts incoming calls from a [`Listener`] and
//! dispatches them to the handlers of a [`ServiceRegistry`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use futures::stream::Stream;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::codec::{Decoder, Encoder};
use crate::context::Context;
use crate::deadline;
use crate::status::Status;
use crate::stream::RequestStream;
use crate::transport::{
    CallParts, Frame, FrameSink, FrameSource, IncomingCall, Inbound, Listener, Pattern,
    method_path,
};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerResponse, Status>> + Send>>;

/// Handler function type for single-request methods
pub type RpcHandler = Arc<dyn Fn(Vec<u8>, Context) -> HandlerFuture + Send + Sync>;

/// Handler function type for stream-request methods
pub type StreamRpcHandler =
    Arc<dyn Fn(RequestStream<Vec<u8>>, Context) -> HandlerFuture + Send + Sync>;

/// Response from an RPC handler
pub enum HandlerResponse {
    /// Single response message
    Unary(Vec<u8>),
    /// Stream of response messages
    Stream(Pin<Box<dyn Stream<Item = Result<Vec<u8>, Status>> + Send>>),
}

#[derive(Clone)]
enum MethodHandler {
    Single(RpcHandler),
    Streaming(StreamRpcHandler),
}

#[derive(Clone)]
struct MethodEntry {
    pattern: Pattern,
    handler: MethodHandler,
}

/// Registry for RPC service methods
pub struct ServiceRegistry {
    methods: RwLock<HashMap<String, MethodEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, service_name: &str, method_name: &str, entry: MethodEntry) {
        // stream-request handlers serve exactly the client-streaming patterns
        debug_assert_eq!(
            matches!(entry.handler, MethodHandler::Streaming(_)),
            entry.pattern.client_streaming()
        );

        let path = method_path(service_name, method_name);
        tracing::debug!(method = %path, pattern = %entry.pattern, "registering method");
        self.methods.write().insert(path, entry);
    }

    /// Register a unary handler
    pub fn register_unary_unary<F, Req, Res, Fut>(
        &self,
        service_name: &str,
        method_name: &str,
        handler: F,
    ) where
        F: Fn(Req, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper: RpcHandler = Arc::new(move |bytes: Vec<u8>, ctx: Context| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request = Req::decode(&bytes)?;
                let response = handler(request, ctx).await?;
                Ok(HandlerResponse::Unary(response.encode()?))
            }) as HandlerFuture
        });

        self.insert(
            service_name,
            method_name,
            MethodEntry {
                pattern: Pattern::Unary,
                handler: MethodHandler::Single(wrapper),
            },
        );
    }

    /// Register a server-stream handler
    pub fn register_unary_stream<F, Req, Res, S, Fut>(
        &self,
        service_name: &str,
        method_name: &str,
        handler: F,
    ) where
        F: Fn(Req, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Res, Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper: RpcHandler = Arc::new(move |bytes: Vec<u8>, ctx: Context| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request = Req::decode(&bytes)?;
                let responses = handler(request, ctx).await?;
                let encoded = responses.map(|res| res.and_then(|r| r.encode()));
                Ok(HandlerResponse::Stream(Box::pin(encoded)))
            }) as HandlerFuture
        });

        self.insert(
            service_name,
            method_name,
            MethodEntry {
                pattern: Pattern::ServerStream,
                handler: MethodHandler::Single(wrapper),
            },
        );
    }

    /// Register a client-stream handler
    pub fn register_stream_unary<F, Req, Res, Fut>(
        &self,
        service_name: &str,
        method_name: &str,
        handler: F,
    ) where
        F: Fn(RequestStream<Req>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper: StreamRpcHandler =
            Arc::new(move |requests: RequestStream<Vec<u8>>, ctx: Context| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let decoded: RequestStream<Req> =
                        Box::pin(requests.map(|res| res.and_then(|bytes| Req::decode(&bytes))));
                    let response = handler(decoded, ctx).await?;
                    Ok(HandlerResponse::Unary(response.encode()?))
                }) as HandlerFuture
            });

        self.insert(
            service_name,
            method_name,
            MethodEntry {
                pattern: Pattern::ClientStream,
                handler: MethodHandler::Streaming(wrapper),
            },
        );
    }

    /// Register a bidi-stream handler
    ///
    /// The handler gets the request stream and returns the response stream;
    /// responses go out as the handler yields them, while requests may still
    /// be arriving.
    pub fn register_stream_stream<F, Req, Res, S, Fut>(
        &self,
        service_name: &str,
        method_name: &str,
        handler: F,
    ) where
        F: Fn(RequestStream<Req>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, Status>> + Send + 'static,
        S: Stream<Item = Result<Res, Status>> + Send + 'static,
        Req: Decoder + Send + 'static,
        Res: Encoder + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapper: StreamRpcHandler =
            Arc::new(move |requests: RequestStream<Vec<u8>>, ctx: Context| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let decoded: RequestStream<Req> =
                        Box::pin(requests.map(|res| res.and_then(|bytes| Req::decode(&bytes))));
                    let responses = handler(decoded, ctx).await?;
                    let encoded = responses.map(|res| res.and_then(|r| r.encode()));
                    Ok(HandlerResponse::Stream(Box::pin(encoded)))
                }) as HandlerFuture
            });

        self.insert(
            service_name,
            method_name,
            MethodEntry {
                pattern: Pattern::BidiStream,
                handler: MethodHandler::Streaming(wrapper),
            },
        );
    }

    fn lookup(&self, method_path: &str) -> Option<MethodEntry> {
        self.methods.read().get(method_path).cloned()
    }

    /// Registered method paths with their pattern, sorted by path
    pub fn methods(&self) -> Vec<(String, Pattern)> {
        let mut methods: Vec<(String, Pattern)> = self
            .methods
            .read()
            .iter()
            .map(|(path, entry)| (path.clone(), entry.pattern))
            .collect();
        methods.sort_by(|a, b| a.0.cmp(&b.0));
        methods
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal server state shared across clones
struct ServerInner {
    registry: ServiceRegistry,
    /// Stops the accept loop
    cancellation_token: CancellationToken,
    /// Drain signal for graceful shutdown
    drain_signal: RwLock<Option<drain::Signal>>,
    /// Drain watch cloned by every call handler
    drain_watch: RwLock<Option<drain::Watch>>,
}

/// RPC Server
///
/// Accepts calls from a listener and runs every call in its own task.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn new() -> Self {
        Self::with_registry(ServiceRegistry::new())
    }

    pub fn with_registry(registry: ServiceRegistry) -> Self {
        let (drain_signal, drain_watch) = drain::channel();

        Self {
            inner: Arc::new(ServerInner {
                registry,
                cancellation_token: CancellationToken::new(),
                drain_signal: RwLock::new(Some(drain_signal)),
                drain_watch: RwLock::new(Some(drain_watch)),
            }),
        }
    }

    /// Get the service registry for manual registration
    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    /// Accept calls until the connection goes away or the server shuts down.
    pub async fn serve(&self, listener: Arc<dyn Listener>) -> Result<(), Status> {
        tracing::info!(
            methods = self.inner.registry.methods().len(),
            "rpc server starting"
        );

        loop {
            tokio::select! {
                _ = self.inner.cancellation_token.cancelled() => {
                    tracing::info!("server received shutdown signal");
                    return Ok(());
                }
                incoming = listener.accept() => {
                    let Some(incoming) = incoming else {
                        tracing::info!("listener closed, server stopping");
                        return Ok(());
                    };

                    let server = self.clone();
                    let listener = listener.clone();
                    tokio::spawn(async move {
                        server.handle_call(listener, incoming).await;
                    });
                }
            }
        }
    }

    /// Shutdown the server gracefully
    ///
    /// Stops accepting calls, aborts the running handlers with `Unavailable`
    /// and waits until every call handler is gone.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down rpc server");

        self.inner.cancellation_token.cancel();

        let drain_signal = self.inner.drain_signal.write().take();
        let drain_watch = self.inner.drain_watch.write().take();
        drop(drain_watch);

        if let Some(signal) = drain_signal {
            tracing::debug!("draining active calls");
            signal.drain().await;
            tracing::info!("all calls drained");
        }
    }

    async fn handle_call(&self, listener: Arc<dyn Listener>, incoming: IncomingCall) {
        let IncomingCall {
            descriptor,
            parts,
            abandoned,
        } = incoming;
        let CallParts { id, mut sink, source } = parts;
        let ctx = Context::from_descriptor(id, &descriptor);
        let deadline = ctx.deadline();

        tracing::debug!(
            call_id = id,
            method = %descriptor.method,
            pattern = %descriptor.pattern,
            "incoming call"
        );

        let drain_watch = self.inner.drain_watch.read().clone();

        let outcome = match drain_watch {
            None => Err(Status::unavailable("server is shutting down")),
            Some(_) if ctx.is_deadline_exceeded() => Err(Status::deadline_exceeded(format!(
                "deadline expired before {} started",
                descriptor.method
            ))),
            Some(watch) => {
                tokio::select! {
                    result = self.dispatch(descriptor.pattern, &descriptor.method, ctx, sink.as_mut(), source) => result,
                    _ = deadline::expired(deadline) => Err(Status::deadline_exceeded(format!(
                        "deadline exceeded while handling {}",
                        descriptor.method
                    ))),
                    _ = abandoned.cancelled() => {
                        Err(Status::cancelled(format!("caller abandoned {}", descriptor.method)))
                    }
                    _ = watch.signaled() => {
                        tracing::debug!(call_id = id, "call handler terminated due to server shutdown");
                        Err(Status::unavailable("server is shutting down"))
                    }
                }
            }
        };

        if let Err(status) = &outcome {
            tracing::debug!(
                call_id = id,
                code = %status.code(),
                "call ended with error: {}",
                status.message()
            );
            if let Err(e) = sink.send(status.to_frame()).await {
                tracing::trace!(call_id = id, "error frame not delivered: {}", e);
            }
        }

        if let Err(e) = sink.half_close().await {
            tracing::trace!(call_id = id, "half-close not delivered: {}", e);
        }
        listener.close(id);
    }

    async fn dispatch(
        &self,
        pattern: Pattern,
        method: &str,
        ctx: Context,
        sink: &mut dyn FrameSink,
        mut source: Box<dyn FrameSource>,
    ) -> Result<(), Status> {
        let entry = self
            .inner
            .registry
            .lookup(method)
            .ok_or_else(|| Status::unknown(format!("method not found: {}", method)))?;

        if entry.pattern != pattern {
            return Err(Status::protocol_violation(format!(
                "{} is a {} method, called as {}",
                method, entry.pattern, pattern
            )));
        }

        let response = match entry.handler {
            MethodHandler::Single(handler) => {
                let request = receive_single(source.as_mut()).await?;
                handler(request, ctx).await?
            }
            MethodHandler::Streaming(handler) => handler(request_stream(source), ctx).await?,
        };

        match response {
            HandlerResponse::Unary(bytes) => send(sink, bytes).await,
            HandlerResponse::Stream(mut responses) => {
                while let Some(response) = responses.next().await {
                    send(sink, response?).await?;
                }
                Ok(())
            }
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

async fn send(sink: &mut dyn FrameSink, bytes: Vec<u8>) -> Result<(), Status> {
    sink.send(Frame::message(bytes)).await.map_err(Status::from)
}

async fn receive_single(source: &mut dyn FrameSource) -> Result<Vec<u8>, Status> {
    match source.receive().await? {
        Inbound::Frame(frame) => Ok(frame.payload),
        Inbound::EndOfStream => Err(Status::protocol_violation(
            "request stream ended before the request",
        )),
    }
}

fn request_stream(mut source: Box<dyn FrameSource>) -> RequestStream<Vec<u8>> {
    Box::pin(stream! {
        loop {
            match source.receive().await {
                Ok(Inbound::Frame(frame)) => yield Ok(frame.payload),
                Ok(Inbound::EndOfStream) => break,
                Err(e) => {
                    yield Err(Status::from(e));
                    break;
                }
            }
        }
    })
}
