// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::{Deserialize, Serialize};

/// Client channel settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ChannelConfig {
    /// deadline applied to calls that do not carry their own
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    default_timeout: Option<Duration>,

    /// delay between two consecutive sends of a request stream
    #[serde(
        default = "default_send_pacing",
        deserialize_with = "deserialize_duration"
    )]
    send_pacing: Duration,

    /// requests queued for the outbound task of a bidi call
    #[serde(default = "default_outbound_queue")]
    outbound_queue: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            default_timeout: None,
            send_pacing: default_send_pacing(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

fn default_send_pacing() -> Duration {
    Duration::ZERO
}

fn default_outbound_queue() -> usize {
    16
}

impl ChannelConfig {
    pub fn new() -> Self {
        ChannelConfig::default()
    }

    pub fn with_default_timeout(self, default_timeout: Option<Duration>) -> Self {
        ChannelConfig {
            default_timeout,
            ..self
        }
    }

    pub fn with_send_pacing(self, send_pacing: Duration) -> Self {
        ChannelConfig {
            send_pacing,
            ..self
        }
    }

    pub fn with_outbound_queue(self, outbound_queue: usize) -> Self {
        ChannelConfig {
            outbound_queue,
            ..self
        }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    pub fn send_pacing(&self) -> Duration {
        self.send_pacing
    }

    pub fn outbound_queue(&self) -> usize {
        self.outbound_queue
    }
}
