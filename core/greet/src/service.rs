// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Server-side handlers of the greet service

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use duration_str::deserialize_duration;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use greet_rpc::{Context, RequestStream, ServiceRegistry, Status};

use crate::messages::*;

pub const SERVICE_NAME: &str = "greet.GreetService";

pub const GREET: &str = "Greet";
pub const GREET_MANY_TIMES: &str = "GreetManyTimes";
pub const LONG_GREET: &str = "LongGreet";
pub const GREET_EVERYONE: &str = "GreetEveryone";
pub const GREET_WITH_DEADLINE: &str = "GreetWithDeadline";
pub const GREET_WITH_ERROR_HANDLING: &str = "GreetWithErrorHandling";

/// Response stream produced by the streaming handlers
pub type Responses<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GreetConfig {
    /// responses sent by GreetManyTimes
    #[serde(default = "default_many_times_count")]
    many_times_count: usize,

    /// pause before each GreetManyTimes response
    #[serde(
        default = "default_many_times_interval",
        deserialize_with = "deserialize_duration"
    )]
    many_times_interval: Duration,

    /// simulated processing time of GreetWithDeadline
    #[serde(
        default = "default_deadline_work",
        deserialize_with = "deserialize_duration"
    )]
    deadline_work: Duration,
}

impl Default for GreetConfig {
    fn default() -> Self {
        GreetConfig {
            many_times_count: default_many_times_count(),
            many_times_interval: default_many_times_interval(),
            deadline_work: default_deadline_work(),
        }
    }
}

fn default_many_times_count() -> usize {
    10
}

fn default_many_times_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_deadline_work() -> Duration {
    Duration::from_secs(3)
}

impl GreetConfig {
    pub fn new() -> Self {
        GreetConfig::default()
    }

    pub fn with_many_times_count(self, many_times_count: usize) -> Self {
        GreetConfig {
            many_times_count,
            ..self
        }
    }

    pub fn with_many_times_interval(self, many_times_interval: Duration) -> Self {
        GreetConfig {
            many_times_interval,
            ..self
        }
    }

    pub fn with_deadline_work(self, deadline_work: Duration) -> Self {
        GreetConfig {
            deadline_work,
            ..self
        }
    }

    pub fn many_times_count(&self) -> usize {
        self.many_times_count
    }

    pub fn many_times_interval(&self) -> Duration {
        self.many_times_interval
    }

    pub fn deadline_work(&self) -> Duration {
        self.deadline_work
    }
}

/// Implementation of the greet service
#[derive(Clone, Debug, Default)]
pub struct GreetService {
    config: Arc<GreetConfig>,
}

impl GreetService {
    pub fn new(config: GreetConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &GreetConfig {
        &self.config
    }

    /// Register every method of the service.
    pub fn register(&self, registry: &ServiceRegistry) {
        let svc = self.clone();
        registry.register_unary_unary(
            SERVICE_NAME,
            GREET,
            move |req: GreetRequest, ctx: Context| {
                let svc = svc.clone();
                async move { svc.greet(req, ctx).await }
            },
        );

        let svc = self.clone();
        registry.register_unary_stream(
            SERVICE_NAME,
            GREET_MANY_TIMES,
            move |req: GreetManyTimesRequest, ctx: Context| {
                let svc = svc.clone();
                async move { svc.greet_many_times(req, ctx).await }
            },
        );

        let svc = self.clone();
        registry.register_stream_unary(
            SERVICE_NAME,
            LONG_GREET,
            move |requests: RequestStream<LongGreetRequest>, ctx: Context| {
                let svc = svc.clone();
                async move { svc.long_greet(requests, ctx).await }
            },
        );

        let svc = self.clone();
        registry.register_stream_stream(
            SERVICE_NAME,
            GREET_EVERYONE,
            move |requests: RequestStream<GreetEveryoneRequest>, ctx: Context| {
                let svc = svc.clone();
                async move { svc.greet_everyone(requests, ctx).await }
            },
        );

        let svc = self.clone();
        registry.register_unary_unary(
            SERVICE_NAME,
            GREET_WITH_DEADLINE,
            move |req: GreetWithDeadlineRequest, ctx: Context| {
                let svc = svc.clone();
                async move { svc.greet_with_deadline(req, ctx).await }
            },
        );

        let svc = self.clone();
        registry.register_unary_unary(
            SERVICE_NAME,
            GREET_WITH_ERROR_HANDLING,
            move |req: GreetWithErrorHandlingRequest, ctx: Context| {
                let svc = svc.clone();
                async move { svc.greet_with_error_handling(req, ctx).await }
            },
        );

        info!(service = SERVICE_NAME, "greet service registered");
    }

    pub async fn greet(
        &self,
        request: GreetRequest,
        ctx: Context,
    ) -> Result<GreetResponse, Status> {
        debug!(call_id = ctx.call_id(), "Greet invoked");
        let Greeting {
            first_name,
            last_name,
        } = request.greeting;

        Ok(GreetResponse {
            result: format!("Hello {} {}", first_name, last_name),
        })
    }

    pub async fn greet_many_times(
        &self,
        request: GreetManyTimesRequest,
        ctx: Context,
    ) -> Result<Responses<GreetManyTimesResponse>, Status> {
        debug!(call_id = ctx.call_id(), "GreetManyTimes invoked");
        let count = self.config.many_times_count;
        let interval = self.config.many_times_interval;
        let Greeting {
            first_name,
            last_name,
        } = request.greeting;

        Ok(Box::pin(stream! {
            for i in 0..count {
                tokio::time::sleep(interval).await;
                yield Ok::<_, Status>(GreetManyTimesResponse {
                    result: format!(
                        "Hey There!, My name is {} {} and my id is #{}",
                        first_name, last_name, i
                    ),
                });
            }
        }))
    }

    pub async fn long_greet(
        &self,
        mut requests: RequestStream<LongGreetRequest>,
        ctx: Context,
    ) -> Result<LongGreetResponse, Status> {
        debug!(call_id = ctx.call_id(), "LongGreet invoked");
        let mut result = String::new();
        while let Some(request) = requests.next().await {
            let Greeting {
                first_name,
                last_name,
            } = request?.greeting;
            result.push_str(&format!("\nHello {} {} !", first_name, last_name));
        }

        Ok(LongGreetResponse { result })
    }

    pub async fn greet_everyone(
        &self,
        requests: RequestStream<GreetEveryoneRequest>,
        ctx: Context,
    ) -> Result<Responses<GreetEveryoneResponse>, Status> {
        debug!(call_id = ctx.call_id(), "GreetEveryone invoked");
        Ok(Box::pin(requests.map(|request| {
            request.map(|request| GreetEveryoneResponse {
                result: format!(
                    "Hello {} {} !",
                    request.greeting.first_name, request.greeting.last_name
                ),
            })
        })))
    }

    /// Simulate slow processing; give up early when the caller's deadline
    /// cannot be met.
    pub async fn greet_with_deadline(
        &self,
        request: GreetWithDeadlineRequest,
        ctx: Context,
    ) -> Result<GreetWithDeadlineResponse, Status> {
        let work = self.config.deadline_work;
        debug!(
            call_id = ctx.call_id(),
            remaining = ?ctx.remaining_time(),
            "GreetWithDeadline invoked"
        );

        if ctx.remaining_time().is_some_and(|remaining| remaining < work) {
            return Err(Status::deadline_exceeded(format!(
                "processing takes {:?}, the caller allows {:?}",
                work,
                ctx.remaining_time().unwrap_or_default()
            )));
        }

        tokio::time::sleep(work).await;
        let Greeting {
            first_name,
            last_name,
        } = request.greeting;

        Ok(GreetWithDeadlineResponse {
            result: format!("Hello {} {} !", first_name, last_name),
        })
    }

    pub async fn greet_with_error_handling(
        &self,
        request: GreetWithErrorHandlingRequest,
        ctx: Context,
    ) -> Result<GreetWithErrorHandlingResponse, Status> {
        debug!(call_id = ctx.call_id(), "GreetWithErrorHandling invoked");
        let Greeting {
            first_name,
            last_name,
        } = request.greeting;

        if first_name == last_name {
            return Err(Status::invalid_argument(format!(
                "first name and last name must differ, both are {:?}",
                first_name
            )));
        }

        Ok(GreetWithErrorHandlingResponse {
            result: format!("Hello {} {}", first_name, last_name),
        })
    }
}
