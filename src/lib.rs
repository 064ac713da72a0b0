// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! clipwatch - follow remote clip rendering jobs to completion
//!
//! A job is submitted once and then observed until it is `completed` or
//! `failed`, over one of two transports:
//!
//! **Event stream** (opened by the submission) -> **Status polling** (any time later)
//!
//! Both feed the same state machine, so callers see one ordered sequence of
//! [`Observation`]s regardless of where the updates came from.
//!
//! # Core Modules
//!
//! - [`decoder`] - `data: {json}` line framing with duplicate suppression
//! - [`state`] - canonical job state and transition rules
//! - [`retry`] - fixed-interval retry policy for transient failures
//! - [`observer`] - streaming and polling observers
//! - [`monitor`] - facade handing out cancellable subscriptions
//! - [`transport`] - clips API seam and the reqwest implementation
//! - [`config`] - config file and environment loading
//! - [`error`] - error taxonomy and consistent error formatting

pub mod config;
pub mod decoder;
pub mod error;
pub mod monitor;
pub mod observer;
pub mod render;
pub mod retry;
pub mod state;
pub mod transport;
pub mod types;

pub use types::{ClipResult, JobId, JobParameters, JobState, Observation};

pub use decoder::{Frame, FrameDecoder, FrameStream, EVENT_PREFIX};
pub use state::{JobStateMachine, DEFAULT_ERROR_MESSAGE};
pub use retry::{RequestPhase, RetryDecision, RetryPolicy};
pub use observer::{MonitorEvent, ObserverOutcome, PollingObserver, StreamingObserver};
pub use monitor::{JobMonitor, MonitorSettings, Subscription};
pub use transport::{ByteStream, ClipsTransport, HttpTransport, SubmitResponse};
pub use config::{load_config, Config};
pub use error::{format_error, ErrorBuilder, MonitorError, TransportError};
pub use render::{Renderer, TerminalRenderer};
