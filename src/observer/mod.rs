// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Observers that drive a [`JobStateMachine`](crate::state::JobStateMachine).
//!
//! ```text
//! ┌───────────────────┐  frames  ┌─────────────────┐  observations  ┌─────────────────┐
//! │ StreamingObserver │─────────▶│                 │───────────────▶│                 │
//! │ (one connection)  │          │ JobStateMachine │                │ ObservationSink │──▶ Subscription
//! ├───────────────────┤  frames  │                 │                │ (mpsc, ordered) │
//! │ PollingObserver   │─────────▶│                 │───────────────▶│                 │
//! │ (GET every 30s)   │          └─────────────────┘                └─────────────────┘
//! └───────────────────┘
//! ```
//!
//! Every suspension point (socket read, HTTP query, timer, channel send) is
//! raced against the subscription's cancellation token.

pub mod polling;
pub mod streaming;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::types::{JobState, Observation};

pub use polling::PollingObserver;
pub use streaming::StreamingObserver;

/// One item of a subscription: an observation, or the final error signal.
pub type MonitorEvent = Result<Observation, MonitorError>;

/// How an observer run ended when it did not end with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverOutcome {
    /// The terminal observation was delivered.
    Terminal(JobState),
    /// Cancelled, or the receiving side went away.
    Cancelled,
    /// An error signal was delivered as the last event.
    Errored,
}

/// Ordered, cancellation-aware delivery channel owned by one subscription.
#[derive(Debug, Clone)]
pub struct ObservationSink {
    tx: mpsc::Sender<MonitorEvent>,
    cancel: CancellationToken,
}

impl ObservationSink {
    pub fn new(tx: mpsc::Sender<MonitorEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Deliver an observation. Returns `false` if the subscription is gone.
    pub async fn deliver(&self, observation: Observation) -> bool {
        self.send(Ok(observation)).await
    }

    /// Deliver the final error signal.
    pub async fn fail(&self, error: MonitorError) -> bool {
        self.send(Err(error)).await
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    async fn send(&self, event: MonitorEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}
