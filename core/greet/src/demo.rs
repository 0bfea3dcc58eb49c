// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Demo scenarios exercising every interaction pattern
//!
//! Each scenario talks to the greet service through [`GreetClient`], logs what
//! it observes and branches on the status code of failed calls.

use std::time::Duration;

use clap::ValueEnum;
use duration_str::deserialize_duration;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use greet_rpc::{Code, Status};

use crate::client::GreetClient;
use crate::messages::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Demo {
    Unary,
    ServerStream,
    ClientStream,
    Bidi,
    Deadline,
    ErrorHandling,
    All,
}

impl Demo {
    /// Scenarios to run, in order
    pub fn scenarios(&self) -> Vec<Demo> {
        match self {
            Demo::All => vec![
                Demo::Unary,
                Demo::ServerStream,
                Demo::ClientStream,
                Demo::Bidi,
                Demo::Deadline,
                Demo::ErrorHandling,
            ],
            demo => vec![*demo],
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DemoConfig {
    /// deadline the deadline demo expects to miss
    #[serde(
        default = "default_short_deadline",
        deserialize_with = "deserialize_duration"
    )]
    short_deadline: Duration,

    /// deadline the deadline demo expects to meet
    #[serde(
        default = "default_long_deadline",
        deserialize_with = "deserialize_duration"
    )]
    long_deadline: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        DemoConfig {
            short_deadline: default_short_deadline(),
            long_deadline: default_long_deadline(),
        }
    }
}

fn default_short_deadline() -> Duration {
    Duration::from_secs(2)
}

fn default_long_deadline() -> Duration {
    Duration::from_secs(5)
}

impl DemoConfig {
    pub fn with_short_deadline(self, short_deadline: Duration) -> Self {
        DemoConfig {
            short_deadline,
            ..self
        }
    }

    pub fn with_long_deadline(self, long_deadline: Duration) -> Self {
        DemoConfig {
            long_deadline,
            ..self
        }
    }

    pub fn short_deadline(&self) -> Duration {
        self.short_deadline
    }

    pub fn long_deadline(&self) -> Duration {
        self.long_deadline
    }
}

fn people() -> Vec<Greeting> {
    vec![
        Greeting::new("Ada", "Lovelace"),
        Greeting::new("Alan", "Turing"),
        Greeting::new("Grace", "Hopper"),
        Greeting::new("Edsger", "Dijkstra"),
    ]
}

fn report(what: &str, status: &Status) {
    match status.code() {
        Code::DeadlineExceeded => warn!(%what, "deadline exceeded: {}", status.message()),
        Code::InvalidArgument => warn!(%what, "invalid argument: {}", status.message()),
        Code::Unavailable => error!(%what, "service unavailable: {}", status.message()),
        code => error!(%what, %code, "call failed: {}", status.message()),
    }
}

pub struct DemoRunner {
    client: GreetClient,
    config: DemoConfig,
}

impl DemoRunner {
    pub fn new(client: GreetClient, config: DemoConfig) -> Self {
        Self { client, config }
    }

    /// Run one scenario. Expected failures are reported, not returned.
    pub async fn run(&self, demo: Demo) -> Result<(), Status> {
        for scenario in demo.scenarios() {
            info!(?scenario, "running demo");
            match scenario {
                Demo::Unary => self.unary().await?,
                Demo::ServerStream => self.server_stream().await?,
                Demo::ClientStream => self.client_stream().await?,
                Demo::Bidi => self.bidi().await?,
                Demo::Deadline => self.deadline().await?,
                Demo::ErrorHandling => self.error_handling().await?,
                Demo::All => {}
            }
        }
        Ok(())
    }

    pub async fn unary(&self) -> Result<(), Status> {
        let response = self
            .client
            .greet(Greeting::new("John", "Doe"), None)
            .await?;
        info!(result = %response.result, "Greet");
        Ok(())
    }

    pub async fn server_stream(&self) -> Result<(), Status> {
        let mut responses = self
            .client
            .greet_many_times(Greeting::new("John", "Doe"), None);
        while let Some(response) = responses.next().await {
            let response = response?;
            info!(result = %response.result, "GreetManyTimes");
        }
        Ok(())
    }

    pub async fn client_stream(&self) -> Result<(), Status> {
        let requests = stream::iter(people().into_iter().map(LongGreetRequest::new));
        let response = self.client.long_greet(requests, None).await?;
        info!(result = %response.result, "LongGreet");
        Ok(())
    }

    pub async fn bidi(&self) -> Result<(), Status> {
        let call = self.client.greet_everyone(None).await?;
        let requests = stream::iter(people().into_iter().map(GreetEveryoneRequest::new));
        let summary = call
            .drive(requests, |response| {
                info!(result = %response.result, "GreetEveryone");
            })
            .await?;
        info!(
            sent = summary.sent,
            received = summary.received,
            "GreetEveryone completed"
        );
        Ok(())
    }

    /// One call that cannot meet its deadline, one that can.
    pub async fn deadline(&self) -> Result<(), Status> {
        for deadline in [self.config.short_deadline, self.config.long_deadline] {
            match self
                .client
                .greet_with_deadline(Greeting::new("John", "Doe"), Some(deadline))
                .await
            {
                Ok(response) => info!(?deadline, result = %response.result, "GreetWithDeadline"),
                Err(status) if status.code() == Code::DeadlineExceeded => {
                    report("GreetWithDeadline", &status)
                }
                Err(status) => return Err(status),
            }
        }
        Ok(())
    }

    /// One valid request, one the handler rejects.
    pub async fn error_handling(&self) -> Result<(), Status> {
        for greeting in [Greeting::new("John", "Doe"), Greeting::new("Same", "Same")] {
            match self.client.greet_with_error_handling(greeting, None).await {
                Ok(response) => info!(result = %response.result, "GreetWithErrorHandling"),
                Err(status) if status.code() == Code::InvalidArgument => {
                    report("GreetWithErrorHandling", &status)
                }
                Err(status) => return Err(status),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_expands_to_every_scenario() {
        let scenarios = Demo::All.scenarios();
        assert_eq!(scenarios.len(), 6);
        assert!(!scenarios.contains(&Demo::All));
        assert_eq!(Demo::Bidi.scenarios(), vec![Demo::Bidi]);
    }

    #[test]
    fn test_demo_config_defaults() {
        let config = DemoConfig::default();
        assert_eq!(config.short_deadline(), Duration::from_secs(2));
        assert_eq!(config.long_deadline(), Duration::from_secs(5));
    }
}
