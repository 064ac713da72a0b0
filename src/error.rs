// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy and consistent error formatting for clipwatch.
//!
//! Transport failures are split from what a subscription finally surfaces:
//!
//! - [`TransportError`] - one failed HTTP attempt. Retryable during status
//!   queries, fatal during submission.
//! - [`MonitorError`] - the error signals a subscription hands to its caller.
//!
//! Malformed event lines never become errors; the decoder drops them.
//! A remote `failed` status is not an error either, it is a terminal
//! [`Observation`](crate::types::Observation).

use std::fmt;

use crate::types::JobId;

/// Hint appended to every formatted error.
pub const HELP_HINT: &str = "Run `clipwatch --help` for usage.";

/// Formats an error message with title, causes, fixes, and help hint.
///
/// # Example
///
/// ```
/// use clipwatch::error::format_error;
///
/// let error = format_error(
///     "Could not submit job",
///     &["API key rejected"],
///     &["Check REKA_API_KEY"],
/// );
/// assert!(error.contains("[✗] Could not submit job"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = String::new();

    output.push_str(&format!("[✗] {}\n\n", title));

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(HELP_HINT);

    output
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(&self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

impl std::error::Error for ErrorBuilder {}

/// A single failed HTTP attempt against the clips API.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection refused, DNS failure, TLS failure.
    Connect(String),
    /// Request or read timed out.
    Timeout(String),
    /// Non-2xx response.
    Http { status: u16, body: String },
    /// Connection dropped while reading a response body.
    Body(String),
    /// Response body was not the JSON we expected.
    Decode(String),
}

impl TransportError {
    /// Build from a reqwest error, classifying timeouts and connect failures.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_body() {
            Self::Body(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "connection failed: {}", msg),
            Self::Timeout(msg) => write!(f, "request timed out: {}", msg),
            Self::Http { status, body } if body.is_empty() => write!(f, "HTTP {}", status),
            Self::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            Self::Body(msg) => write!(f, "response body interrupted: {}", msg),
            Self::Decode(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(&err)
    }
}

/// Error signals a subscription surfaces to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorError {
    /// The submission call failed. Never retried.
    FatalSubmission(TransportError),
    /// The event stream closed before a terminal state was observed.
    IncompleteStream { job_id: Option<JobId> },
    /// Status queries kept failing past the configured retry limit.
    RetriesExhausted { job_id: JobId, attempts: u32, last_error: TransportError },
    /// Cancelled while the submission call was still in flight.
    SubmissionCancelled,
}

impl MonitorError {
    /// Job id known at the time of the error, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::FatalSubmission(_) | Self::SubmissionCancelled => None,
            Self::IncompleteStream { job_id } => job_id.as_ref(),
            Self::RetriesExhausted { job_id, .. } => Some(job_id),
        }
    }
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::FatalSubmission(TransportError::Http { status, body }) => {
                let title = format!("Job submission rejected (HTTP {})", status);
                let detail = if body.is_empty() {
                    "no response body".to_string()
                } else {
                    body.clone()
                };
                format_error(
                    &title,
                    &[detail.as_str(), "Invalid or missing API key", "Malformed video URL"],
                    &[
                        "Verify the key: echo $REKA_API_KEY",
                        "Check the video URL is publicly reachable",
                    ],
                )
            }
            Self::FatalSubmission(err) => {
                let detail = err.to_string();
                format_error(
                    "Could not connect to the clips API",
                    &[detail.as_str(), "No internet connection", "Wrong base URL in config"],
                    &[
                        "Check your internet connection",
                        "Verify CLIPWATCH_BASE_URL or the base_url config value",
                    ],
                )
            }
            Self::IncompleteStream { job_id: Some(id) } => {
                let fix = format!("Resume with: clipwatch status {}", id);
                format_error(
                    "Event stream ended before the job finished",
                    &["Connection dropped", "Server closed the stream early"],
                    &[fix.as_str()],
                )
            }
            Self::IncompleteStream { job_id: None } => format_error(
                "Event stream ended before a job id was received",
                &["Connection dropped during submission"],
                &["Submit the job again"],
            ),
            Self::RetriesExhausted {
                job_id,
                attempts,
                last_error,
            } => {
                let title = format!("Gave up checking job {} after {} attempts", job_id, attempts);
                let detail = last_error.to_string();
                let fix = format!("Retry later with: clipwatch status {}", job_id);
                format_error(&title, &[detail.as_str()], &[fix.as_str()])
            }
            Self::SubmissionCancelled => {
                "Submission cancelled before the service answered".to_string()
            }
        };
        f.write_str(&text)
    }
}

impl std::error::Error for MonitorError {}
