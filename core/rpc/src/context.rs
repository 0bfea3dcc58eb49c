// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Per-call context handed to server handlers

use std::collections::HashMap;
use std::time::Duration;

use crate::deadline::Deadline;
use crate::transport::{CallDescriptor, CallId, DEADLINE_KEY, Pattern};

#[derive(Debug, Clone)]
pub struct Context {
    call_id: CallId,
    method: String,
    pattern: Pattern,
    metadata: HashMap<String, String>,
    deadline: Option<Deadline>,
}

impl Context {
    /// Build the handler context of an incoming call.
    ///
    /// The deadline is rebuilt from the remaining budget the caller attached
    /// when it opened the call.
    pub fn from_descriptor(call_id: CallId, descriptor: &CallDescriptor) -> Self {
        let deadline = descriptor
            .metadata
            .get(DEADLINE_KEY)
            .and_then(|value| Deadline::from_header(value));

        Self {
            call_id,
            method: descriptor.method.clone(),
            pattern: descriptor.pattern,
            metadata: descriptor.metadata.clone(),
            deadline,
        }
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Method path, `service/method`
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    /// Time left before the caller gives up, `None` without a deadline
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline.map(|d| d.remaining())
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| d.is_expired())
    }
}
