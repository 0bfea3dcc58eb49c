// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests for the call engine
//!
//! Client and server talk over the in-memory transport. The tests cover the
//! four interaction patterns, deadlines, cancellation, protocol violations
//! and connection loss.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use greet_rpc::memory::{self, MemoryConfig, MemoryListener, MemoryTransport};
use greet_rpc::{
    CallState, CallSummary, Channel, ChannelConfig, Code, Context, Listener, Pattern,
    RequestStream, Server, Status, Transport,
};

const SERVICE: &str = "test.Echo";

// ============================================================================
// Test Helpers
// ============================================================================

struct TestEnv {
    transport: Arc<MemoryTransport>,
    listener: Arc<MemoryListener>,
    server: Server,
    server_handle: Option<tokio::task::JoinHandle<()>>,
    channel: Channel,
}

impl TestEnv {
    fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    fn with_config(config: ChannelConfig) -> Self {
        let (transport, listener) = memory::connect(MemoryConfig::default());
        let transport = Arc::new(transport);
        let listener = Arc::new(listener);

        let server = Server::new();
        register_echo(&server);

        let server_clone = server.clone();
        let serve_listener: Arc<dyn Listener> = listener.clone();
        let server_handle = tokio::spawn(async move {
            let _ = server_clone.serve(serve_listener).await;
        });

        let channel_transport: Arc<dyn Transport> = transport.clone();
        let channel = Channel::with_config(channel_transport, config);

        Self {
            transport,
            listener,
            server,
            server_handle: Some(server_handle),
            channel,
        }
    }

    /// Wait until the server released every call it accepted.
    async fn server_drained(&self) {
        for _ in 0..100 {
            if self.listener.open_calls() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server still holds {} calls", self.listener.open_calls());
    }

    async fn shutdown(&mut self) {
        self.server.shutdown().await;
        if let Some(handle) = self.server_handle.take() {
            handle.await.unwrap();
        }
    }
}

fn register_echo(server: &Server) {
    let registry = server.registry();

    registry.register_unary_unary(SERVICE, "Say", |request: String, _ctx: Context| async move {
        Ok(format!("echo {}", request))
    });

    registry.register_unary_unary(SERVICE, "Reject", |request: String, _ctx: Context| async move {
        Err::<String, _>(Status::invalid_argument(format!("rejected {}", request)))
    });

    registry.register_unary_unary(SERVICE, "Slow", |request: String, _ctx: Context| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(request)
    });

    registry.register_unary_stream(SERVICE, "Repeat", |request: String, _ctx: Context| async move {
        let responses = (1..=3).map(move |i| Ok::<_, Status>(format!("{} #{}", request, i)));
        Ok(stream::iter(responses))
    });

    registry.register_unary_stream(SERVICE, "Ticks", |_request: String, _ctx: Context| async move {
        let first = stream::iter(vec![
            Ok::<_, Status>("one".to_string()),
            Ok("two".to_string()),
        ]);
        Ok(first.chain(stream::pending()))
    });

    registry.register_stream_unary(
        SERVICE,
        "Count",
        |mut requests: RequestStream<String>, _ctx: Context| async move {
            let mut count = 0;
            while let Some(request) = requests.next().await {
                request?;
                count += 1;
            }
            Ok::<_, Status>(format!("{} requests", count))
        },
    );

    registry.register_stream_stream(
        SERVICE,
        "Chat",
        |requests: RequestStream<String>, _ctx: Context| async move {
            Ok(requests.map(|request| request.map(|name| format!("hello {}", name))))
        },
    );
}

fn names() -> Vec<String> {
    vec!["ada".to_string(), "grace".to_string(), "linus".to_string()]
}

// ============================================================================
// Unary
// ============================================================================

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unary_call() {
    let mut env = TestEnv::new();

    let response: String = env
        .channel
        .unary(SERVICE, "Say", "hi".to_string(), None)
        .await
        .unwrap();
    assert_eq!(response, "echo hi");
    assert_eq!(env.transport.open_calls(), 0);
    env.server_drained().await;

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unary_handler_error_is_classified() {
    let mut env = TestEnv::new();

    let err = env
        .channel
        .unary::<String, String>(SERVICE, "Reject", "me".to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "rejected me");

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_unknown_method() {
    let mut env = TestEnv::new();

    let err = env
        .channel
        .unary::<String, String>(SERVICE, "Missing", "hi".to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unknown);

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_pattern_mismatch_is_a_protocol_violation() {
    let mut env = TestEnv::new();

    let mut responses = env
        .channel
        .unary_stream::<String, String>(SERVICE, "Say", "hi".to_string(), None);
    let err = responses.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::ProtocolViolation);
    assert!(responses.next().await.is_none());

    env.shutdown().await;
}

// ============================================================================
// Server streaming
// ============================================================================

#[tokio::test]
#[tracing_test::traced_test]
async fn test_server_stream_call() {
    let mut env = TestEnv::new();

    let responses = env
        .channel
        .unary_stream::<String, String>(SERVICE, "Repeat", "tick".to_string(), None)
        .collect_all()
        .await
        .unwrap();
    assert_eq!(responses, vec!["tick #1", "tick #2", "tick #3"]);
    assert_eq!(env.transport.open_calls(), 0);

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_severed_connection_mid_stream() {
    let mut env = TestEnv::new();

    let mut responses = env
        .channel
        .unary_stream::<String, String>(SERVICE, "Ticks", "go".to_string(), None);
    assert_eq!(responses.next().await.unwrap().unwrap(), "one");
    assert_eq!(responses.next().await.unwrap().unwrap(), "two");

    env.transport.sever();

    let err = responses.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert!(responses.next().await.is_none());

    // new calls are refused as well
    let err = env
        .channel
        .unary::<String, String>(SERVICE, "Say", "hi".to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);

    env.shutdown().await;
}

// ============================================================================
// Client streaming
// ============================================================================

#[tokio::test]
#[tracing_test::traced_test]
async fn test_client_stream_call() {
    let mut env = TestEnv::new();

    let response: String = env
        .channel
        .stream_unary(SERVICE, "Count", stream::iter(names()), None)
        .await
        .unwrap();
    assert_eq!(response, "3 requests");

    let response: String = env
        .channel
        .stream_unary(SERVICE, "Count", stream::iter(Vec::<String>::new()), None)
        .await
        .unwrap();
    assert_eq!(response, "0 requests");

    env.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_client_stream_pacing() {
    let mut env =
        TestEnv::with_config(ChannelConfig::new().with_send_pacing(Duration::from_millis(100)));

    let start = tokio::time::Instant::now();
    let response: String = env
        .channel
        .stream_unary(SERVICE, "Count", stream::iter(names()), None)
        .await
        .unwrap();
    assert_eq!(response, "3 requests");
    assert!(start.elapsed() >= Duration::from_millis(200));

    env.shutdown().await;
}

// ============================================================================
// Bidi streaming
// ============================================================================

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bidi_stream_call() {
    let mut env = TestEnv::new();

    let call = env
        .channel
        .stream_stream::<String, String>(SERVICE, "Chat", None)
        .await
        .unwrap();

    let mut received = Vec::new();
    let summary = call
        .drive(stream::iter(names()), |response| received.push(response))
        .await
        .unwrap();

    assert_eq!(received, vec!["hello ada", "hello grace", "hello linus"]);
    assert_eq!(summary, CallSummary { sent: 3, received: 3 });
    assert_eq!(env.transport.open_calls(), 0);

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bidi_split_directions() {
    let mut env = TestEnv::new();

    let call = env
        .channel
        .stream_stream::<String, String>(SERVICE, "Chat", None)
        .await
        .unwrap();
    let (sink, mut responses, join) = call.split();

    sink.send("ada".to_string()).await.unwrap();
    assert_eq!(responses.next().await.unwrap().unwrap(), "hello ada");

    sink.send("grace".to_string()).await.unwrap();
    assert_eq!(responses.next().await.unwrap().unwrap(), "hello grace");

    sink.close();
    assert!(responses.next().await.is_none());

    let summary = join.join().await.unwrap();
    assert_eq!(summary, CallSummary { sent: 2, received: 2 });

    env.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_bidi_pacing() {
    let mut env =
        TestEnv::with_config(ChannelConfig::new().with_send_pacing(Duration::from_millis(100)));

    let call = env
        .channel
        .stream_stream::<String, String>(SERVICE, "Chat", None)
        .await
        .unwrap();

    let start = tokio::time::Instant::now();
    let mut received = 0;
    call.drive(stream::iter(names()), |_| received += 1)
        .await
        .unwrap();

    assert_eq!(received, 3);
    assert!(start.elapsed() >= Duration::from_millis(200));

    env.shutdown().await;
}

// ============================================================================
// Deadlines and cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_deadline_exceeded() {
    let mut env = TestEnv::new();

    let start = tokio::time::Instant::now();
    let err = env
        .channel
        .unary::<String, String>(SERVICE, "Slow", "hi".to_string(), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(env.transport.open_calls(), 0);
    env.server_drained().await;

    env.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_default_timeout_applies() {
    let mut env = TestEnv::with_config(
        ChannelConfig::new().with_default_timeout(Some(Duration::from_millis(500))),
    );

    let err = env
        .channel
        .unary::<String, String>(SERVICE, "Slow", "hi".to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    env.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_oversized_timeout_is_unbounded() {
    let mut env = TestEnv::new();

    let response: String = env
        .channel
        .unary(SERVICE, "Say", "hi".to_string(), Some(Duration::MAX))
        .await
        .unwrap();
    assert_eq!(response, "echo hi");

    env.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_server_stream_deadline_keeps_received_messages() {
    let mut env = TestEnv::new();

    let mut responses = env.channel.unary_stream::<String, String>(
        SERVICE,
        "Ticks",
        "go".to_string(),
        Some(Duration::from_secs(1)),
    );
    assert_eq!(responses.next().await.unwrap().unwrap(), "one");
    assert_eq!(responses.next().await.unwrap().unwrap(), "two");

    let err = responses.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(responses.next().await.is_none());
    assert_eq!(env.transport.open_calls(), 0);
    env.server_drained().await;

    env.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_bidi_deadline_unblocks_join() {
    let mut env = TestEnv::new();

    let call = env
        .channel
        .stream_stream::<String, String>(SERVICE, "Chat", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    let (sink, mut responses, join) = call.split();

    sink.send("ada".to_string()).await.unwrap();
    assert_eq!(responses.next().await.unwrap().unwrap(), "hello ada");

    // the sink stays open, only the deadline can end the call
    let err = join.join().await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    let err = responses.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(sink.send("grace".to_string()).await.is_err());
    assert_eq!(env.transport.open_calls(), 0);
    env.server_drained().await;

    env.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_bidi_drive_with_stalled_requests() {
    let mut env = TestEnv::new();

    let call = env
        .channel
        .stream_stream::<String, String>(SERVICE, "Chat", Some(Duration::from_secs(1)))
        .await
        .unwrap();

    let requests = stream::iter(vec!["ada".to_string()]).chain(stream::pending());
    let mut received = Vec::new();
    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        call.drive(requests, |response| received.push(response)),
    )
    .await
    .expect("drive must return once the call failed");

    assert_eq!(outcome.unwrap_err().code(), Code::DeadlineExceeded);
    assert_eq!(received, vec!["hello ada"]);
    assert_eq!(env.transport.open_calls(), 0);

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bidi_severed_connection() {
    let mut env = TestEnv::new();

    let call = env
        .channel
        .stream_stream::<String, String>(SERVICE, "Chat", None)
        .await
        .unwrap();
    let (sink, mut responses, join) = call.split();

    sink.send("ada".to_string()).await.unwrap();
    assert_eq!(responses.next().await.unwrap().unwrap(), "hello ada");

    env.transport.sever();

    let err = responses.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert!(responses.next().await.is_none());

    let err = join.join().await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    drop(sink);

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_bidi_cancel() {
    let mut env = TestEnv::new();

    let call = env
        .channel
        .stream_stream::<String, String>(SERVICE, "Chat", None)
        .await
        .unwrap();
    let handle = call.handle();
    let (sink, mut responses, join) = call.split();

    sink.send("ada".to_string()).await.unwrap();
    assert_eq!(responses.next().await.unwrap().unwrap(), "hello ada");

    handle.cancel();
    handle.cancel();

    let err = responses.next().await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::Cancelled);

    let err = join.join().await.unwrap_err();
    assert_eq!(err.code(), Code::Cancelled);
    assert_eq!(env.transport.open_calls(), 0);
    env.server_drained().await;
    drop(sink);

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_cancel_is_idempotent() {
    let mut env = TestEnv::new();

    let mut call = env
        .channel
        .open_call(SERVICE, "Ticks", Pattern::ServerStream, None)
        .await
        .unwrap();
    call.send(b"go".to_vec()).await.unwrap();
    call.half_close().await.unwrap();
    assert!(call.receive().await.unwrap().is_some());

    let handle = call.handle();
    handle.cancel();
    handle.cancel();

    assert_eq!(
        call.state().error().map(|status| status.code()),
        Some(Code::Cancelled)
    );
    assert_eq!(call.receive().await.unwrap_err().code(), Code::Cancelled);
    assert_eq!(env.transport.open_calls(), 0);
    env.server_drained().await;

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_cancel_after_completion_is_noop() {
    let mut env = TestEnv::new();

    let mut call = env
        .channel
        .open_call(SERVICE, "Say", Pattern::Unary, None)
        .await
        .unwrap();
    call.send(b"hi".to_vec()).await.unwrap();
    call.half_close().await.unwrap();
    let frame = call.receive().await.unwrap().unwrap();
    assert_eq!(frame.payload, b"echo hi");
    assert_eq!(call.state(), CallState::Completed);

    call.handle().cancel();
    assert_eq!(call.state(), CallState::Completed);

    env.shutdown().await;
}

// ============================================================================
// Protocol violations
// ============================================================================

#[tokio::test]
#[tracing_test::traced_test]
async fn test_receive_before_send() {
    let mut env = TestEnv::new();

    let mut call = env
        .channel
        .open_call(SERVICE, "Say", Pattern::Unary, None)
        .await
        .unwrap();
    let err = call.receive().await.unwrap_err();
    assert_eq!(err.code(), Code::ProtocolViolation);

    // the violation ends the call
    assert!(call.state().is_terminal());
    assert_eq!(
        call.send(b"late".to_vec()).await.unwrap_err().code(),
        Code::ProtocolViolation
    );
    assert_eq!(env.transport.open_calls(), 0);
    env.server_drained().await;

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_send_after_half_close() {
    let mut env = TestEnv::new();

    let mut call = env
        .channel
        .open_call(SERVICE, "Count", Pattern::ClientStream, None)
        .await
        .unwrap();
    call.send(b"one".to_vec()).await.unwrap();
    call.half_close().await.unwrap();

    let err = call.send(b"two".to_vec()).await.unwrap_err();
    assert_eq!(err.code(), Code::ProtocolViolation);

    env.shutdown().await;
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_client_stream_receive_before_half_close() {
    let mut env = TestEnv::new();

    let mut call = env
        .channel
        .open_call(SERVICE, "Count", Pattern::ClientStream, None)
        .await
        .unwrap();
    call.send(b"one".to_vec()).await.unwrap();

    let err = call.receive().await.unwrap_err();
    assert_eq!(err.code(), Code::ProtocolViolation);

    env.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
#[tracing_test::traced_test]
async fn test_shutdown_aborts_running_calls() {
    let mut env = TestEnv::new();

    let channel = env.channel.clone();
    let pending = tokio::spawn(async move {
        channel
            .unary::<String, String>(SERVICE, "Slow", "hi".to_string(), None)
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    env.shutdown().await;

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}
