// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Incremental event frame decoding.
//!
//! The submission response is a line-oriented body where every meaningful line
//! looks like `data: {"id": "...", "status": "running"}`. Everything else
//! (blank keep-alives, comments, truncated JSON) is noise and is dropped.
//!
//! ```text
//! bytes ──▶ FrameDecoder::push ──▶ complete lines ──▶ prefix? ──▶ JSON? ──▶ same as last? ──▶ Frame
//!              │                                        no │       no │         yes │
//!              └─ partial line held                        └─ drop ───┴─ drop ──────┘
//! ```
//!
//! A decoder is owned by exactly one connection; a new connection starts a new
//! decoder, so duplicate suppression never leaks between subscriptions.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use serde_json::Value;

use crate::error::TransportError;
use crate::types::JobId;

/// Sentinel that marks a line as an event frame.
pub const EVENT_PREFIX: &str = "data: ";

/// Longest line held while waiting for its terminator. Longer lines are dropped as noise.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Status reported when a frame carries none.
pub const MISSING_STATUS: &str = "unknown";

/// One decoded unit of remote-reported job state.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Value of the `status` field, or [`MISSING_STATUS`].
    pub status: String,
    /// The full JSON object.
    pub payload: Value,
    /// Text the frame was parsed from.
    pub raw: String,
}

impl Frame {
    /// Build a frame from a JSON object. Returns `None` for non-object JSON.
    pub fn from_value(payload: Value, raw: impl Into<String>) -> Option<Self> {
        if !payload.is_object() {
            return None;
        }
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or(MISSING_STATUS)
            .to_string();
        Some(Self {
            status,
            payload,
            raw: raw.into(),
        })
    }

    /// Parse a frame from JSON text.
    pub fn parse(text: &str) -> Option<Self> {
        let payload: Value = serde_json::from_str(text).ok()?;
        Self::from_value(payload, text)
    }

    /// The `id` field, if the service included one.
    pub fn job_id(&self) -> Option<JobId> {
        match self.payload.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Some(JobId::new(id.as_str())),
            Some(Value::Number(n)) => Some(JobId::new(n.to_string())),
            _ => None,
        }
    }

    /// Canonical re-serialization used for duplicate detection.
    ///
    /// Object keys are written in sorted order, so whitespace and key order
    /// differences between two sends of the same state compare equal.
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(self.raw.len());
        write_canonical(&self.payload, &mut out);
        out
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(item) = map.get(key.as_str()) {
                    write_canonical(item, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Splits a byte stream into deduplicated [`Frame`]s.
#[derive(Debug)]
pub struct FrameDecoder {
    prefix: String,
    buffer: Vec<u8>,
    max_line_bytes: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    last_canonical: Option<String>,
    noise_lines: u64,
    duplicates: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_prefix(EVENT_PREFIX)
    }

    /// Use a different line sentinel.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            buffer: Vec::new(),
            max_line_bytes: MAX_LINE_BYTES,
            discarding: false,
            last_canonical: None,
            noise_lines: 0,
            duplicates: 0,
        }
    }

    /// Cap on the bytes held for one unterminated line.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Feed one read from the transport and return every frame it completed.
    ///
    /// A trailing partial line stays buffered until the next call, up to the
    /// line cap. A line that outgrows the cap is dropped through its newline.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = self.buffer[start..end].to_vec();
            start = end + 1;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(frame) = self.decode_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line_bytes {
            if !self.discarding {
                self.noise_lines += 1;
                tracing::warn!("Dropping event line longer than {} bytes", self.max_line_bytes);
            }
            self.buffer.clear();
            self.discarding = true;
        }

        frames
    }

    /// Flush at end of stream. A held line without a trailing newline is decoded once.
    pub fn finish(&mut self) -> Option<Frame> {
        if std::mem::take(&mut self.discarding) {
            self.buffer.clear();
            return None;
        }
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Lines dropped as noise so far.
    pub fn noise_lines(&self) -> u64 {
        self.noise_lines
    }

    /// Frames suppressed as consecutive duplicates so far.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<Frame> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        let Ok(text) = std::str::from_utf8(line) else {
            self.noise_lines += 1;
            tracing::debug!("Dropping non UTF-8 event line ({} bytes)", line.len());
            return None;
        };

        let Some(body) = text.strip_prefix(self.prefix.as_str()) else {
            self.noise_lines += 1;
            tracing::trace!("Dropping unprefixed line: {}", text);
            return None;
        };

        let Some(frame) = Frame::parse(body) else {
            self.noise_lines += 1;
            tracing::debug!("Dropping malformed event frame: {}", body);
            return None;
        };

        let canonical = frame.canonical();
        if self.last_canonical.as_deref() == Some(canonical.as_str()) {
            self.duplicates += 1;
            tracing::debug!("Suppressing duplicate frame (status={})", frame.status);
            return None;
        }
        self.last_canonical = Some(canonical);

        Some(frame)
    }
}

/// Decode a non-streamed response body holding one JSON object.
pub fn decode_document(body: &[u8]) -> Option<Frame> {
    let text = std::str::from_utf8(body).ok()?;
    Frame::parse(text.trim())
}

/// Lazy frame sequence over one connection's byte stream.
///
/// Ends after the underlying stream ends, or after yielding the first
/// transport error.
pub struct FrameStream<S> {
    inner: S,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
    finished: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self::with_decoder(inner, FrameDecoder::new())
    }

    pub fn with_decoder(inner: S, decoder: FrameDecoder) -> Self {
        Self {
            inner,
            decoder,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl<S> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Vec<u8>, TransportError>> + Unpin,
{
    type Item = Result<Frame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(frame) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(chunk)) => {
                    let frames = this.decoder.push(&chunk);
                    this.ready.extend(frames);
                }
                Some(Err(err)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finished = true;
                    if let Some(frame) = this.decoder.finish() {
                        this.ready.push_back(frame);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn statuses(frames: &[Frame]) -> Vec<&str> {
        frames.iter().map(|f| f.status.as_str()).collect()
    }

    #[test]
    fn test_frames_and_noise_interleaved() {
        let body = concat!(
            ": keep-alive\n",
            "data: {\"id\":\"j1\",\"status\":\"submitted\"}\n",
            "\n",
            "data: {not json\n",
            "event: ping\n",
            "data: {\"id\":\"j1\",\"status\":\"running\"}\n",
            "data: [DONE]\n",
            "data: {\"id\":\"j1\",\"status\":\"completed\",\"output\":[]}\n",
        );
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(body.as_bytes());

        assert_eq!(statuses(&frames), vec!["submitted", "running", "completed"]);
        assert_eq!(decoder.noise_lines(), 4);
    }

    #[test]
    fn test_shuffled_noise_and_random_splits_keep_every_frame_in_order() {
        const NOISE: &[&str] = &[
            ": keep-alive",
            "",
            "   ",
            "event: progress",
            "data: {broken",
            "data: [DONE]",
            "data: 42",
            "retry: 3000",
            "dat",
            "data:{\"status\":\"running\"}",
        ];

        for seed in 0..200u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let frame_count = rng.gen_range(1..=8);
            let noise_count = rng.gen_range(0..=12);

            // `None` marks a frame slot; slots are numbered after shuffling so each
            // frame carries its position and adjacent frames never collapse.
            let mut lines: Vec<Option<&str>> = vec![None; frame_count];
            for _ in 0..noise_count {
                lines.push(Some(NOISE[rng.gen_range(0..NOISE.len())]));
            }
            lines.shuffle(&mut rng);

            let mut next = 0;
            let lines: Vec<String> = lines
                .into_iter()
                .map(|line| match line {
                    Some(noise) => noise.to_string(),
                    None => {
                        next += 1;
                        format!(
                            "data: {{\"id\":\"j1\",\"seq\":{},\"status\":\"running\"}}",
                            next - 1
                        )
                    }
                })
                .collect();

            let mut body = Vec::new();
            for line in &lines {
                body.extend_from_slice(line.as_bytes());
                let ending: &[u8] = if rng.gen_bool(0.3) { b"\r\n" } else { b"\n" };
                body.extend_from_slice(ending);
            }

            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            let mut rest = body.as_slice();
            while !rest.is_empty() {
                let take = rng.gen_range(1..=rest.len().min(17));
                frames.extend(decoder.push(&rest[..take]));
                rest = &rest[take..];
            }
            frames.extend(decoder.finish());

            let seqs: Vec<u64> = frames
                .iter()
                .map(|f| f.payload["seq"].as_u64().unwrap())
                .collect();
            let expected: Vec<u64> = (0..frame_count as u64).collect();
            assert_eq!(seqs, expected, "seed {}", seed);
            assert_eq!(decoder.pending_bytes(), 0, "seed {}", seed);
        }
    }

    #[test]
    fn test_oversized_line_is_dropped_as_noise() {
        let mut decoder = FrameDecoder::new().with_max_line_bytes(16);

        assert!(decoder.push(b"data: {\"status\":").is_empty());
        assert!(decoder.push(b"\"running\", \"padding\": \"xxxxxxxx").is_empty());
        assert_eq!(decoder.pending_bytes(), 0);
        assert_eq!(decoder.noise_lines(), 1);

        // The tail of the oversized line is skipped, later lines decode normally.
        assert!(decoder.push(b"xxxxxxxxxxxxxxxxxxxxxxxxx").is_empty());
        let frames = decoder.push(b"\"}\ndata: {\"status\":\"ok\"}\n");
        assert_eq!(statuses(&frames), vec!["ok"]);
        assert_eq!(decoder.noise_lines(), 1);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_oversized_trailing_line_is_not_flushed() {
        let mut decoder = FrameDecoder::new().with_max_line_bytes(8);
        decoder.push(b"data: {\"status\":\"completed\"}");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_split_frame_matches_single_read() {
        let line = "data: {\"id\":\"j1\",\"status\":\"running\",\"progress\":0.5}\n";
        let whole = FrameDecoder::new().push(line.as_bytes());

        for split in 1..line.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.push(&line.as_bytes()[..split]);
            assert!(frames.is_empty(), "split at {} produced a frame early", split);
            frames.extend(decoder.push(&line.as_bytes()[split..]));
            assert_eq!(frames, whole, "split at {}", split);
        }
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let line = "data: {\"status\":\"running\",\"note\":\"caf\u{e9}\"}\n".as_bytes();
        let cut = line.iter().position(|b| *b == 0xc3).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&line[..cut]).is_empty());
        let frames = decoder.push(&line[cut..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload["note"], "caf\u{e9}");
    }

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let body = concat!(
            "data: {\"id\":\"j1\",\"status\":\"running\"}\n",
            "data: {\"status\": \"running\", \"id\": \"j1\"}\n",
            "data: {\"id\":\"j1\",\"status\":\"running\"}\n",
        );
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(body.as_bytes());
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.duplicates(), 2);
    }

    #[test]
    fn test_non_adjacent_repeats_are_kept() {
        let body = concat!(
            "data: {\"status\":\"running\"}\n",
            "data: {\"status\":\"submitted\"}\n",
            "data: {\"status\":\"running\"}\n",
        );
        let frames = FrameDecoder::new().push(body.as_bytes());
        assert_eq!(statuses(&frames), vec!["running", "submitted", "running"]);
    }

    #[test]
    fn test_duplicate_separated_by_noise_is_still_duplicate() {
        let body = concat!(
            "data: {\"status\":\"running\"}\n",
            "data: garbage\n",
            "\n",
            "data: {\"status\":\"running\"}\n",
        );
        let frames = FrameDecoder::new().push(body.as_bytes());
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_crlf_line_endings() {
        let body = "data: {\"status\":\"submitted\"}\r\ndata: {\"status\":\"running\"}\r\n";
        let frames = FrameDecoder::new().push(body.as_bytes());
        assert_eq!(statuses(&frames), vec!["submitted", "running"]);
    }

    #[test]
    fn test_trailing_partial_line_is_held_then_flushed() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(b"data: {\"status\":\"completed\"}");
        assert!(frames.is_empty());
        assert!(decoder.pending_bytes() > 0);

        let frame = decoder.finish().unwrap();
        assert_eq!(frame.status, "completed");
        assert_eq!(decoder.pending_bytes(), 0);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_missing_status_and_non_object_json() {
        let body = "data: {\"id\":\"j9\"}\ndata: 42\ndata: \"text\"\n";
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(body.as_bytes());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].status, MISSING_STATUS);
        assert_eq!(frames[0].job_id(), Some(JobId::new("j9")));
        assert_eq!(decoder.noise_lines(), 2);
    }

    #[test]
    fn test_custom_prefix() {
        let mut decoder = FrameDecoder::with_prefix("event> ");
        let frames =
            decoder.push(b"data: {\"status\":\"running\"}\nevent> {\"status\":\"failed\"}\n");
        assert_eq!(statuses(&frames), vec!["failed"]);
    }

    #[test]
    fn test_decode_document() {
        let frame = decode_document(b"  {\"id\":\"j2\",\"status\":\"queued\"}\n").unwrap();
        assert_eq!(frame.status, "queued");
        assert!(decode_document(b"<html>").is_none());
    }

    #[tokio::test]
    async fn test_frame_stream_over_chunks() {
        let chunks: Vec<Result<Vec<u8>, TransportError>> = vec![
            Ok(b"data: {\"id\":\"j1\",\"sta".to_vec()),
            Ok(b"tus\":\"running\"}\ndata: {\"id\":\"j1\",\"status\":\"running\"}\n".to_vec()),
            Ok(b"data: {\"id\":\"j1\",\"status\":\"completed\"}".to_vec()),
        ];
        let frames: Vec<_> = FrameStream::new(stream::iter(chunks)).collect().await;

        let statuses: Vec<_> = frames
            .into_iter()
            .map(|f| f.unwrap().status)
            .collect();
        assert_eq!(statuses, vec!["running", "completed"]);
    }

    #[tokio::test]
    async fn test_frame_stream_stops_after_error() {
        let chunks: Vec<Result<Vec<u8>, TransportError>> = vec![
            Ok(b"data: {\"status\":\"running\"}\n".to_vec()),
            Err(TransportError::Body("reset".to_string())),
            Ok(b"data: {\"status\":\"completed\"}\n".to_vec()),
        ];
        let mut frames = FrameStream::new(stream::iter(chunks));

        assert!(frames.next().await.unwrap().is_ok());
        assert!(frames.next().await.unwrap().is_err());
        assert!(frames.next().await.is_none());
    }
}
