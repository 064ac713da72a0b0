// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Follows an existing job by querying its status on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{ObservationSink, ObserverOutcome};
use crate::decoder::Frame;
use crate::error::{MonitorError, TransportError};
use crate::retry::{cancellable_sleep, RequestPhase, RetryDecision, RetryPolicy};
use crate::state::JobStateMachine;
use crate::transport::ClipsTransport;
use crate::types::JobId;

pub struct PollingObserver<T: ClipsTransport> {
    transport: Arc<T>,
    job_id: JobId,
    machine: JobStateMachine,
    retry: RetryPolicy,
    poll_interval: Duration,
    cancel: CancellationToken,
    checks: u64,
}

impl<T: ClipsTransport> PollingObserver<T> {
    pub fn new(
        transport: Arc<T>,
        job_id: JobId,
        retry: RetryPolicy,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            machine: JobStateMachine::for_job(job_id.clone()),
            job_id,
            retry,
            poll_interval,
            cancel,
            checks: 0,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Status queries issued so far, including failed ones.
    pub fn checks(&self) -> u64 {
        self.checks
    }

    /// Poll until a terminal observation is delivered or the run is cancelled.
    ///
    /// Query failures are retried per the [`RetryPolicy`]; they only end the run
    /// if the policy has a retry cap and it is reached.
    pub async fn observe(
        &mut self,
        sink: &ObservationSink,
    ) -> Result<ObserverOutcome, MonitorError> {
        let mut consecutive_failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(ObserverOutcome::Cancelled);
            }

            self.checks += 1;
            tracing::debug!("Check #{} for job {}", self.checks, self.job_id);

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(ObserverOutcome::Cancelled),
                result = self.transport.fetch_status(&self.job_id) => result,
            };

            let frame = result.and_then(|value| {
                let raw = value.to_string();
                Frame::from_value(value, raw).ok_or_else(|| {
                    TransportError::Decode("status response is not a JSON object".to_string())
                })
            });

            let wait = match frame {
                Ok(frame) => {
                    consecutive_failures = 0;
                    if let Some(observation) = self.machine.apply(&frame) {
                        let state = observation.state;
                        if !sink.deliver(observation).await {
                            return Ok(ObserverOutcome::Cancelled);
                        }
                        if state.is_terminal() {
                            return Ok(ObserverOutcome::Terminal(state));
                        }
                    }
                    self.poll_interval
                }
                Err(err) => match self
                    .retry
                    .decide(RequestPhase::StatusQuery, consecutive_failures, &err)
                {
                    RetryDecision::RetryAfter(delay) => {
                        consecutive_failures += 1;
                        tracing::warn!(
                            "Status query for job {} failed ({}), retry #{} in {}s",
                            self.job_id,
                            err,
                            consecutive_failures,
                            delay.as_secs()
                        );
                        delay
                    }
                    RetryDecision::GiveUp => {
                        tracing::error!(
                            "Giving up on job {} after {} failed queries",
                            self.job_id,
                            consecutive_failures + 1
                        );
                        return Err(MonitorError::RetriesExhausted {
                            job_id: self.job_id.clone(),
                            attempts: consecutive_failures + 1,
                            last_error: err,
                        });
                    }
                },
            };

            if !cancellable_sleep(wait, &self.cancel).await {
                return Ok(ObserverOutcome::Cancelled);
            }
        }
    }
}
