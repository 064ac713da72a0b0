// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Follows a job over the event stream opened at submission time.
//!
//! The stream is never reconnected. If it ends before a terminal frame the
//! observer reports [`MonitorError::IncompleteStream`] with whatever job id it
//! learned, so the caller can switch to polling.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{ObservationSink, ObserverOutcome};
use crate::decoder::{decode_document, Frame, FrameStream};
use crate::error::MonitorError;
use crate::state::JobStateMachine;
use crate::transport::ByteStream;
use crate::types::JobId;

#[derive(Debug)]
pub struct StreamingObserver {
    machine: JobStateMachine,
    cancel: CancellationToken,
}

impl StreamingObserver {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            machine: JobStateMachine::new(),
            cancel,
        }
    }

    /// Job id learned from the stream so far.
    pub fn job_id(&self) -> Option<&JobId> {
        self.machine.job_id()
    }

    /// Consume one connection's body until a terminal state, end of stream, or cancellation.
    ///
    /// The body is dropped before this returns, on every path.
    pub async fn observe(
        &mut self,
        body: ByteStream,
        sink: &ObservationSink,
    ) -> Result<ObserverOutcome, MonitorError> {
        let mut frames = FrameStream::new(body);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Streaming observer cancelled");
                    return Ok(ObserverOutcome::Cancelled);
                }
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    if let Some(outcome) = self.forward(&frame, sink).await {
                        return Ok(outcome);
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!("Event stream interrupted: {}", err);
                    break;
                }
                None => break,
            }
        }

        let decoder = frames.decoder();
        tracing::warn!(
            "Event stream closed without a terminal state (job={:?}, noise={}, duplicates={})",
            self.machine.job_id().map(JobId::as_str),
            decoder.noise_lines(),
            decoder.duplicates()
        );
        Err(MonitorError::IncompleteStream {
            job_id: self.machine.job_id().cloned(),
        })
    }

    /// Handle a non-streamed submission response holding a single JSON object.
    pub async fn observe_document(
        &mut self,
        body: &[u8],
        sink: &ObservationSink,
    ) -> Result<ObserverOutcome, MonitorError> {
        if self.cancel.is_cancelled() {
            return Ok(ObserverOutcome::Cancelled);
        }
        match decode_document(body) {
            Some(frame) => {
                if let Some(outcome) = self.forward(&frame, sink).await {
                    return Ok(outcome);
                }
            }
            None => tracing::warn!(
                "Submission response was not a JSON object ({} bytes)",
                body.len()
            ),
        }
        Err(MonitorError::IncompleteStream {
            job_id: self.machine.job_id().cloned(),
        })
    }

    /// Apply a frame and deliver its observation. `Some` means stop observing.
    async fn forward(&mut self, frame: &Frame, sink: &ObservationSink) -> Option<ObserverOutcome> {
        let observation = self.machine.apply(frame)?;
        let state = observation.state;

        if !sink.deliver(observation).await {
            return Some(ObserverOutcome::Cancelled);
        }
        if state.is_terminal() {
            return Some(ObserverOutcome::Terminal(state));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::types::JobState;
    use futures_util::stream;
    use tokio::sync::mpsc;

    fn body(chunks: Vec<Result<&'static str, TransportError>>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| c.map(|s| s.as_bytes().to_vec())),
        ))
    }

    #[tokio::test]
    async fn test_stream_to_completion() {
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let sink = ObservationSink::new(tx, token.clone());
        let mut observer = StreamingObserver::new(token);

        let outcome = observer
            .observe(
                body(vec![
                    Ok("data: {\"id\":\"j1\",\"status\":\"submitted\"}\n"),
                    Ok("data: {\"id\":\"j1\",\"status\":\"running\"}\n"),
                    Ok("data: {\"id\":\"j1\",\"status\":\"running\"}\n"),
                    Ok(concat!(
                        "data: {\"id\":\"j1\",\"status\":\"completed\",",
                        "\"output\":[{\"title\":\"A\"}]}\n"
                    )),
                    Ok("data: {\"id\":\"j1\",\"status\":\"failed\"}\n"),
                ]),
                &sink,
            )
            .await
            .unwrap();
        drop(sink);

        assert_eq!(outcome, ObserverOutcome::Terminal(JobState::Completed));
        let mut states = Vec::new();
        while let Some(event) = rx.recv().await {
            states.push(event.unwrap().state);
        }
        assert_eq!(states, vec![JobState::Submitted, JobState::Running, JobState::Completed]);
    }

    #[tokio::test]
    async fn test_stream_closing_after_submitted_is_incomplete() {
        let (tx, _rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let sink = ObservationSink::new(tx, token.clone());
        let mut observer = StreamingObserver::new(token);

        let err = observer
            .observe(body(vec![Ok("data: {\"id\":\"j5\",\"status\":\"submitted\"}\n")]), &sink)
            .await
            .unwrap_err();

        assert_eq!(err, MonitorError::IncompleteStream { job_id: Some(JobId::new("j5")) });
    }

    #[tokio::test]
    async fn test_read_error_is_incomplete_not_retried() {
        let (tx, _rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let sink = ObservationSink::new(tx, token.clone());
        let mut observer = StreamingObserver::new(token);

        let err = observer
            .observe(
                body(vec![
                    Ok("data: {\"id\":\"j6\",\"status\":\"running\"}\n"),
                    Err(TransportError::Body("connection reset".to_string())),
                ]),
                &sink,
            )
            .await
            .unwrap_err();

        assert_eq!(err.job_id(), Some(&JobId::new("j6")));
    }

    #[tokio::test]
    async fn test_document_response() {
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let sink = ObservationSink::new(tx, token.clone());
        let mut observer = StreamingObserver::new(token);

        let err = observer
            .observe_document(br#"{"id":"j7","status":"queued"}"#, &sink)
            .await
            .unwrap_err();
        assert_eq!(err, MonitorError::IncompleteStream { job_id: Some(JobId::new("j7")) });

        let first = rx.recv().await.unwrap().unwrap();
        assert!(first.newly_identified);
        assert_eq!(first.state, JobState::Submitted);
    }
}
