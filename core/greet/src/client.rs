// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Typed client of the greet service

use std::time::Duration;

use futures::stream::Stream;

use greet_rpc::{BidiCall, Channel, ResponseStream, Status};

use crate::messages::*;
use crate::service::{
    GREET, GREET_EVERYONE, GREET_MANY_TIMES, GREET_WITH_DEADLINE, GREET_WITH_ERROR_HANDLING,
    LONG_GREET, SERVICE_NAME,
};

#[derive(Clone)]
pub struct GreetClient {
    channel: Channel,
}

impl GreetClient {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub async fn greet(
        &self,
        greeting: Greeting,
        timeout: Option<Duration>,
    ) -> Result<GreetResponse, Status> {
        self.channel
            .unary(SERVICE_NAME, GREET, GreetRequest::new(greeting), timeout)
            .await
    }

    pub fn greet_many_times(
        &self,
        greeting: Greeting,
        timeout: Option<Duration>,
    ) -> ResponseStream<GreetManyTimesResponse> {
        self.channel.unary_stream(
            SERVICE_NAME,
            GREET_MANY_TIMES,
            GreetManyTimesRequest::new(greeting),
            timeout,
        )
    }

    pub async fn long_greet<S>(
        &self,
        greetings: S,
        timeout: Option<Duration>,
    ) -> Result<LongGreetResponse, Status>
    where
        S: Stream<Item = LongGreetRequest>,
    {
        self.channel
            .stream_unary(SERVICE_NAME, LONG_GREET, greetings, timeout)
            .await
    }

    pub async fn greet_everyone(
        &self,
        timeout: Option<Duration>,
    ) -> Result<BidiCall<GreetEveryoneRequest, GreetEveryoneResponse>, Status> {
        self.channel
            .stream_stream(SERVICE_NAME, GREET_EVERYONE, timeout)
            .await
    }

    pub async fn greet_with_deadline(
        &self,
        greeting: Greeting,
        timeout: Option<Duration>,
    ) -> Result<GreetWithDeadlineResponse, Status> {
        self.channel
            .unary(
                SERVICE_NAME,
                GREET_WITH_DEADLINE,
                GreetWithDeadlineRequest::new(greeting),
                timeout,
            )
            .await
    }

    pub async fn greet_with_error_handling(
        &self,
        greeting: Greeting,
        timeout: Option<Duration>,
    ) -> Result<GreetWithErrorHandlingResponse, Status> {
        self.channel
            .unary(
                SERVICE_NAME,
                GREET_WITH_ERROR_HANDLING,
                GreetWithErrorHandlingRequest::new(greeting),
                timeout,
            )
            .await
    }
}
