// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{Instrument, debug, info, info_span, warn};

use greet_rpc::memory;
use greet_rpc::{Channel, Server};

use crate::args::Args;
use crate::client::GreetClient;
use crate::config::ConfigLoader;
use crate::demo::{Demo, DemoRunner};
use crate::runtime;
use crate::service::GreetService;

/// Async body: server and client over an in-memory connection, the demo,
/// then a graceful shutdown bounded by the drain timeout.
pub async fn run_demo(mut config: ConfigLoader, demo: Demo) -> Result<()> {
    let drain_timeout = config.runtime().drain_timeout();

    let (transport, listener) = memory::connect(config.transport().clone());

    let server = Server::new();
    GreetService::new(config.greet().clone()).register(server.registry());
    debug!(methods = ?server.registry().methods(), "greet service registered");

    let serve_handle = tokio::spawn({
        let server = server.clone();
        async move { server.serve(Arc::new(listener)).await }
    });

    let channel = Channel::with_config(Arc::new(transport), config.client().clone());
    let runner = DemoRunner::new(GreetClient::new(channel), config.demo().clone());

    let result = runner
        .run(demo)
        .instrument(info_span!("demo", ?demo))
        .await;

    match tokio::time::timeout(drain_timeout, server.shutdown()).await {
        Ok(()) => info!("server stopped"),
        Err(_) => {
            warn!(timeout = ?drain_timeout, "server shutdown timed out");
            anyhow::bail!("server shutdown timed out after {:?}", drain_timeout);
        }
    }

    serve_handle
        .await
        .context("server task failed")?
        .context("server stopped with an error")?;

    result.context("demo failed")
}

/// Load the configuration, set up tracing, build the runtime and block
/// until the selected demo completes.
pub fn run(args: &Args) -> Result<()> {
    let mut config = match args.config() {
        Some(path) => ConfigLoader::new(path).context("failed to load configuration")?,
        None => ConfigLoader::empty(),
    };

    let tracing_conf = config.tracing().clone();
    tracing_conf
        .setup_tracing_subscriber()
        .context("failed to set up tracing")?;
    debug!(?tracing_conf);

    let greet_runtime =
        runtime::build(config.runtime()).context("invalid runtime configuration")?;
    greet_runtime
        .runtime
        .block_on(run_demo(config, args.demo()))
}
