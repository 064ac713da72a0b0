// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport-agnostic job state machine.
//!
//! Both observers feed frames here and forward whatever comes out. The machine
//! owns the rules that must hold no matter where a frame came from:
//!
//! - state never moves backwards (`submitted` after `running` is reported as running)
//! - exactly one terminal [`Observation`] per job, later frames are ignored
//! - unrecognized statuses are surfaced as `Unknown` and never end observation

use chrono::Utc;
use serde_json::Value;

use crate::decoder::Frame;
use crate::types::{ClipResult, JobId, JobState, Observation};

/// Error message used when a failed job reports none.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";

/// Canonical state for one job run.
#[derive(Debug, Clone)]
pub struct JobStateMachine {
    job_id: Option<JobId>,
    state: JobState,
    terminal_emitted: bool,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    /// Machine for a job whose id is not known yet (fresh submission).
    pub fn new() -> Self {
        Self {
            job_id: None,
            state: JobState::Unknown,
            terminal_emitted: false,
        }
    }

    /// Machine for an existing job the caller already identified.
    pub fn for_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            state: JobState::Unknown,
            terminal_emitted: false,
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// True once the terminal observation has been emitted.
    pub fn is_finished(&self) -> bool {
        self.terminal_emitted
    }

    /// Apply one frame.
    ///
    /// Returns `None` when the frame is ignored: after the terminal observation,
    /// or when it belongs to a different job than the one already bound.
    pub fn apply(&mut self, frame: &Frame) -> Option<Observation> {
        if self.terminal_emitted {
            tracing::debug!("Ignoring frame after terminal state (status={})", frame.status);
            return None;
        }

        let mut newly_identified = false;
        match (frame.job_id(), &self.job_id) {
            (Some(incoming), Some(bound)) if &incoming != bound => {
                tracing::warn!("Ignoring frame for job {} while observing {}", incoming, bound);
                return None;
            }
            (Some(incoming), None) => {
                tracing::info!("Job id assigned: {}", incoming);
                self.job_id = Some(incoming);
                newly_identified = true;
            }
            _ => {}
        }

        let reported = JobState::from_status(&frame.status);
        let state = match reported {
            JobState::Unknown => {
                tracing::debug!("Unrecognized job status '{}', still {}", frame.status, self.state);
                self.state
            }
            _ if reported.rank() < self.state.rank() => self.state,
            _ => {
                if reported != self.state {
                    tracing::info!("Job state {} -> {}", self.state, reported);
                }
                self.state = reported;
                reported
            }
        };

        let (clips, error_message) = match state {
            JobState::Completed => (Some(extract_clips(&frame.payload)), None),
            JobState::Failed => (None, Some(extract_error_message(&frame.payload))),
            _ => (None, None),
        };

        if state.is_terminal() {
            self.terminal_emitted = true;
        }

        Some(Observation {
            job_id: self.job_id.clone(),
            state,
            status: frame.status.clone(),
            newly_identified,
            clips,
            error_message,
            observed_at: Utc::now(),
        })
    }
}

/// Read the `output` array of a completed frame. Missing or empty means zero clips.
fn extract_clips(payload: &Value) -> Vec<ClipResult> {
    let Some(items) = payload.get("output").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| {
            let text = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);
            ClipResult {
                title: text("title"),
                video_url: text("video_url"),
                caption: text("caption"),
                hashtags: item
                    .get("hashtags")
                    .and_then(Value::as_array)
                    .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
            }
        })
        .collect()
}

fn extract_error_message(payload: &Value) -> String {
    payload
        .get("error_message")
        .and_then(Value::as_str)
        .filter(|msg| !msg.trim().is_empty())
        .unwrap_or(DEFAULT_ERROR_MESSAGE)
        .to_string()
}
