// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Retry policy for transient network failure.
//!
//! Fixed 30 second interval, unbounded by default. Only a terminal job state or
//! cancellation ends retrying. Failures of the submission call are never retried.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Default wait between attempts (in seconds).
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 30;

/// Which call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// The initiating `POST /clips`.
    Submission,
    /// A `GET /clips/{id}` status query.
    StatusQuery,
}

/// Outcome of consulting the policy after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS))
    }
}

impl RetryPolicy {
    /// Fixed interval, never gives up.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: None,
        }
    }

    /// Cap the number of retries. `None` restores unbounded retrying.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Whether a failure in this phase may be retried at all.
    pub fn is_retryable(&self, phase: RequestPhase, _error: &TransportError) -> bool {
        match phase {
            RequestPhase::Submission => false,
            RequestPhase::StatusQuery => true,
        }
    }

    /// Decide what to do after `retries_so_far` retries already happened.
    pub fn decide(
        &self,
        phase: RequestPhase,
        retries_so_far: u32,
        error: &TransportError,
    ) -> RetryDecision {
        if !self.is_retryable(phase, error) {
            return RetryDecision::GiveUp;
        }
        match self.max_retries {
            Some(max) if retries_so_far >= max => RetryDecision::GiveUp,
            _ => RetryDecision::RetryAfter(self.interval),
        }
    }
}

/// Sleep for `duration` unless cancelled first.
///
/// Returns `false` if the token fired before the timer.
pub async fn cancellable_sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
