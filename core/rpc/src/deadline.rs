// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Call deadlines on the monotonic clock
//!
//! A deadline is fixed when the call is created. It can elapse or be made
//! irrelevant by the call ending, never extended. The governor races a timer
//! against the call and fails it when the timer wins.

use std::future::Future;
use std::sync::Weak;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::call::CallCore;
use crate::status::Status;

// roughly 30 years, as far ahead as tokio timers are meant to reach
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Absolute expiry instant of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline `timeout` from now, capped to a far future instant when the
    /// sum does not fit the clock.
    pub fn after(timeout: Duration) -> Self {
        Self::checked_after(timeout).unwrap_or_else(|| Self {
            at: Instant::now() + FAR_FUTURE,
        })
    }

    /// Deadline `timeout` from now, `None` when the sum does not fit the clock.
    pub fn checked_after(timeout: Duration) -> Option<Self> {
        Instant::now().checked_add(timeout).map(|at| Self { at })
    }

    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Remaining budget as carried in call metadata
    pub fn to_header(&self) -> String {
        self.remaining().as_millis().to_string()
    }

    /// Rebuild a deadline from a remaining budget received in call metadata
    pub fn from_header(value: &str) -> Option<Self> {
        value
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|ms| Deadline::checked_after(Duration::from_millis(ms)))
    }
}

/// Resolves when the deadline elapses, never when there is none.
pub async fn expired(deadline: Option<Deadline>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.instant()).await,
        None => futures::future::pending::<()>().await,
    }
}

/// Run `fut` bounded by `deadline`.
pub async fn bounded<F: Future>(
    deadline: Option<Deadline>,
    fut: F,
    what: &str,
) -> Result<F::Output, Status> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.instant(), fut)
            .await
            .map_err(|_| Status::deadline_exceeded(format!("deadline exceeded while {}", what))),
        None => Ok(fut.await),
    }
}

pub(crate) struct DeadlineGovernor;

impl DeadlineGovernor {
    /// Arm the timer of a call.
    ///
    /// The timer holds only a weak reference to the call and stops as soon as
    /// the call reaches a terminal state.
    pub(crate) fn arm(call: Weak<CallCore>, deadline: Deadline, done: CancellationToken) {
        tokio::spawn(async move {
            tokio::select! {
                _ = done.cancelled() => {}
                _ = tokio::time::sleep_until(deadline.instant()) => {
                    if let Some(call) = call.upgrade() {
                        debug!(call_id = call.id(), method = %call.method(), "deadline exceeded");
                        call.fail(Status::deadline_exceeded(format!(
                            "deadline exceeded for {}",
                            call.method()
                        )));
                    }
                }
            }
        });
    }
}
