// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across clipwatch.
//!
//! This module provides the job data model shared by both transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job identifier assigned by the remote rendering service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a rendering job.
///
/// Ordered by progress: Unknown < Submitted < Running < Completed/Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// No recognized status reported yet
    Unknown,
    /// Accepted by the service, not yet rendering
    Submitted,
    /// Rendering in progress
    Running,
    /// Finished with zero or more clips
    Completed,
    /// Finished with an error
    Failed,
}

impl JobState {
    /// Map a remote status string onto a state.
    ///
    /// Unrecognized strings map to `Unknown`; they are informational and never terminal.
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "submitted" | "queued" | "pending" | "created" => Self::Submitted,
            "running" | "processing" | "in_progress" | "rendering" => Self::Running,
            _ => Self::Unknown,
        }
    }

    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Progress rank used to keep transitions non-regressive.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Submitted => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered clip from a completed job's `output` array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

/// State-machine-normalized unit delivered to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Job identifier, once known
    pub job_id: Option<JobId>,
    /// Canonical state after applying the frame
    pub state: JobState,
    /// Raw status string as reported by the service
    pub status: String,
    /// True on the first observation that carried the job id
    pub newly_identified: bool,
    /// Clips, present only when `state == Completed`
    pub clips: Option<Vec<ClipResult>>,
    /// Error message, present only when `state == Failed`
    pub error_message: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Clip generation settings sent with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub template: String,
    pub num_generations: u32,
    pub min_duration_seconds: u32,
    pub max_duration_seconds: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            template: "moments".to_string(),
            num_generations: 1,
            min_duration_seconds: 0,
            max_duration_seconds: 30,
        }
    }
}

/// Output rendering settings sent with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderingConfig {
    pub subtitles: bool,
    pub aspect_ratio: String,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            subtitles: true,
            aspect_ratio: "9:16".to_string(),
        }
    }
}

/// Default prompt used when the caller supplies none.
pub const DEFAULT_PROMPT: &str = "Create an engaging video clip highlighting the best moments";

/// Request body of the job submission call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub video_urls: Vec<String>,
    pub prompt: String,
    pub generation_config: GenerationConfig,
    pub rendering_config: RenderingConfig,
    pub stream: bool,
}

impl JobParameters {
    /// Default parameters for a single source video.
    pub fn for_video(video_url: impl Into<String>) -> Self {
        Self {
            video_urls: vec![video_url.into()],
            prompt: DEFAULT_PROMPT.to_string(),
            generation_config: GenerationConfig::default(),
            rendering_config: RenderingConfig::default(),
            stream: true,
        }
    }
}
