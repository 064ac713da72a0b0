// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory clips service shared by the integration tests.
//!
//! Every connection (event stream or status query) bumps `opened` when it is
//! created and `closed` when its future or stream is dropped, so tests can
//! assert nothing is left hanging after cancellation.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;

use clipwatch::{
    ByteStream, ClipsTransport, JobId, JobParameters, MonitorSettings, RetryPolicy, SubmitResponse,
    TransportError,
};

pub const INTERVAL: Duration = Duration::from_secs(30);

pub fn settings() -> MonitorSettings {
    MonitorSettings {
        poll_interval: INTERVAL,
        retry: RetryPolicy::fixed(INTERVAL),
        channel_capacity: 8,
    }
}

/// One `data: {json}\n` event line.
pub fn event(payload: Value) -> Vec<u8> {
    format!("data: {}\n", payload).into_bytes()
}

#[derive(Debug, Default)]
pub struct Counters {
    pub submits: AtomicUsize,
    pub fetches: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Counters {
    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn open(self: &Arc<Self>) -> ConnectionGuard {
        self.opened.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard(Arc::clone(self))
    }
}

struct ConnectionGuard(Arc<Counters>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A body stream that reports its own release.
struct GuardedStream {
    inner: ByteStream,
    _guard: ConnectionGuard,
}

impl Stream for GuardedStream {
    type Item = Result<Vec<u8>, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

/// Scripted answer to the submission call.
pub enum Submission {
    /// Event body made of these chunks. `hold_open` keeps the connection
    /// open after the last chunk instead of closing it.
    Stream { chunks: Vec<Vec<u8>>, hold_open: bool },
    /// Chunks followed by a read error.
    Broken { chunks: Vec<Vec<u8>>, error: TransportError },
    Document(Value),
    Reject(TransportError),
    /// Never answers.
    Hang,
}

/// Scripted answer to one status query.
#[derive(Debug, Clone)]
pub enum Step {
    Status(Value),
    Fail(TransportError),
    Hang,
}

pub struct MockTransport {
    pub counters: Arc<Counters>,
    submission: Mutex<Option<Submission>>,
    steps: Mutex<VecDeque<Step>>,
}

impl MockTransport {
    pub fn new(submission: Submission, steps: Vec<Step>) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            submission: Mutex::new(Some(submission)),
            steps: Mutex::new(steps.into()),
        }
    }

    pub fn polling(steps: Vec<Step>) -> Self {
        let unscripted = TransportError::Connect("no submission scripted".into());
        Self::new(Submission::Reject(unscripted), steps)
    }

    /// Next step; the last one repeats forever.
    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps.front().cloned().unwrap_or(Step::Hang)
        }
    }
}

#[async_trait]
impl ClipsTransport for MockTransport {
    async fn submit(&self, _params: &JobParameters) -> Result<SubmitResponse, TransportError> {
        self.counters.submits.fetch_add(1, Ordering::SeqCst);
        let submission = self
            .submission
            .lock()
            .unwrap()
            .take()
            .unwrap_or(Submission::Reject(TransportError::Connect("already submitted".into())));

        let body: ByteStream = match submission {
            Submission::Reject(err) => return Err(err),
            Submission::Document(value) => {
                return Ok(SubmitResponse::Document(value.to_string().into_bytes()))
            }
            Submission::Hang => {
                let _guard = self.counters.open();
                return std::future::pending().await;
            }
            Submission::Stream { chunks, hold_open } => {
                let chunks = stream::iter(chunks.into_iter().map(Ok::<_, TransportError>));
                if hold_open {
                    chunks.chain(stream::pending()).boxed()
                } else {
                    chunks.boxed()
                }
            }
            Submission::Broken { chunks, error } => {
                stream::iter(chunks.into_iter().map(Ok::<_, TransportError>))
                    .chain(stream::once(async move { Err(error) }))
                    .boxed()
            }
        };

        Ok(SubmitResponse::Stream(Box::pin(GuardedStream {
            inner: body,
            _guard: self.counters.open(),
        })))
    }

    async fn fetch_status(&self, _job_id: &JobId) -> Result<Value, TransportError> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        let _guard = self.counters.open();

        match self.next_step() {
            Step::Status(value) => Ok(value),
            Step::Fail(err) => Err(err),
            Step::Hang => std::future::pending().await,
        }
    }
}
