// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Greet service, typed client and demo runner on top of `greet-rpc`

pub mod args;
pub mod client;
pub mod config;
pub mod demo;
pub mod messages;
pub mod runner;
pub mod runtime;
pub mod service;

pub use client::GreetClient;
pub use service::{GreetConfig, GreetService};
