// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Job monitor facade.
//!
//! # Usage
//!
//! ```rust,no_run
//! use clipwatch::{HttpTransport, JobMonitor, JobParameters, MonitorSettings};
//! use futures_util::StreamExt;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let transport = HttpTransport::from_config(&clipwatch::config::load_config()?)?;
//! let monitor = JobMonitor::new(transport, MonitorSettings::default());
//!
//! let mut subscription = monitor
//!     .start_and_monitor(JobParameters::for_video("https://www.youtube.com/watch?v=..."))
//!     .await?;
//!
//! while let Some(event) = subscription.next().await {
//!     match event {
//!         Ok(observation) => println!("{}", observation.status),
//!         Err(err) => match monitor.resume_polling(&err) {
//!             Some(polling) => subscription = polling,
//!             None => return Err(err.into()),
//!         },
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::MonitorError;
use crate::observer::{
    MonitorEvent, ObservationSink, ObserverOutcome, PollingObserver, StreamingObserver,
};
use crate::retry::{RetryPolicy, DEFAULT_RETRY_INTERVAL_SECS};
use crate::transport::{ClipsTransport, SubmitResponse};
use crate::types::{JobId, JobParameters};

/// Buffered observations per subscription before the observer waits for the reader.
const DEFAULT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub channel_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            retry: RetryPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retry: config.retry_policy(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Starts jobs and hands out one cancellable [`Subscription`] per observed job.
pub struct JobMonitor<T: ClipsTransport> {
    transport: Arc<T>,
    settings: MonitorSettings,
    shutdown: CancellationToken,
}

impl<T: ClipsTransport> JobMonitor<T> {
    pub fn new(transport: T, settings: MonitorSettings) -> Self {
        Self::with_shared(Arc::new(transport), settings)
    }

    pub fn with_shared(transport: Arc<T>, settings: MonitorSettings) -> Self {
        Self {
            transport,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that cancels every subscription of this monitor, including an
    /// in-flight submission.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Submit a job and follow it over the event stream.
    ///
    /// A failed submission is returned immediately as
    /// [`MonitorError::FatalSubmission`] and never retried. If the monitor's
    /// shutdown token fires first the in-flight request is dropped.
    pub async fn start_and_monitor(
        &self,
        params: JobParameters,
    ) -> Result<Subscription, MonitorError> {
        let submitted = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(MonitorError::SubmissionCancelled),
            submitted = self.transport.submit(&params) => submitted,
        };

        let response = submitted.map_err(|err| {
            tracing::error!("Job submission failed: {}", err);
            MonitorError::FatalSubmission(err)
        })?;
        tracing::debug!("Submission accepted: {:?}", response);

        Ok(self.spawn(move |cancel, sink| async move {
            let mut observer = StreamingObserver::new(cancel);
            match response {
                SubmitResponse::Stream(body) => observer.observe(body, &sink).await,
                SubmitResponse::Document(body) => observer.observe_document(&body, &sink).await,
            }
        }))
    }

    /// Follow an existing job by polling its status.
    pub fn monitor_existing(&self, job_id: JobId) -> Subscription {
        tracing::info!("Polling job {} every {}s", job_id, self.settings.poll_interval.as_secs());
        let transport = Arc::clone(&self.transport);
        let settings = self.settings;

        self.spawn(move |cancel, sink| async move {
            let mut observer = PollingObserver::new(
                transport,
                job_id,
                settings.retry,
                settings.poll_interval,
                cancel,
            );
            observer.observe(&sink).await
        })
    }

    /// Polling subscription for a stream that ended early, when its job id is known.
    pub fn resume_polling(&self, error: &MonitorError) -> Option<Subscription> {
        match error {
            MonitorError::IncompleteStream { job_id: Some(job_id) } => {
                tracing::info!("Event stream ended early, falling back to polling job {}", job_id);
                Some(self.monitor_existing(job_id.clone()))
            }
            _ => None,
        }
    }

    fn spawn<F, Fut>(&self, run: F) -> Subscription
    where
        F: FnOnce(CancellationToken, ObservationSink) -> Fut,
        Fut: Future<Output = Result<ObserverOutcome, MonitorError>> + Send + 'static,
    {
        let cancel = self.shutdown.child_token();
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let sink = ObservationSink::new(tx, cancel.clone());
        let observe = run(cancel.clone(), sink.clone());

        let task = tokio::spawn(async move {
            match observe.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    sink.fail(err).await;
                    ObserverOutcome::Errored
                }
            }
        });

        Subscription {
            events: ReceiverStream::new(rx),
            cancel,
            task: Some(task),
        }
    }
}

/// A running observation of one job.
///
/// Yields observations in decode order, then ends after the terminal
/// observation, after a single error item, or after cancellation. Dropping the
/// subscription cancels it.
#[derive(Debug)]
pub struct Subscription {
    events: ReceiverStream<MonitorEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<ObserverOutcome>>,
}

impl Subscription {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A handle that cancels this subscription, e.g. from a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next_event(&mut self) -> Option<MonitorEvent> {
        self.events.next().await
    }

    /// Cancel and wait until the observer task has released its connection.
    pub async fn shutdown(mut self) -> ObserverOutcome {
        self.cancel.cancel();
        self.join_task().await
    }

    /// Wait for the observer task to end on its own.
    ///
    /// Keep consuming events first; a full channel holds the task back.
    pub async fn finished(mut self) -> ObserverOutcome {
        self.join_task().await
    }

    async fn join_task(&mut self) -> ObserverOutcome {
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|err| {
                tracing::error!("Observer task ended abnormally: {}", err);
                ObserverOutcome::Cancelled
            }),
            None => ObserverOutcome::Cancelled,
        }
    }
}

impl Stream for Subscription {
    type Item = MonitorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
