// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal presentation of observations.

use std::io::{self, Write};

use colored::Colorize;

use crate::types::{ClipResult, JobState, Observation};

/// Receives every observation a subscription yields.
pub trait Renderer {
    fn render(&mut self, observation: &Observation) -> io::Result<()>;
}

/// Prints job id, status lines and the final clip listing.
pub struct TerminalRenderer<W: Write> {
    out: W,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn render_clips(&mut self, clips: &[ClipResult]) -> io::Result<()> {
        writeln!(self.out)?;
        writeln!(self.out, "{}", "=".repeat(40))?;
        writeln!(self.out, "  {}", "CLIP(S) READY!".green().bold())?;
        writeln!(self.out, "{}", "=".repeat(40))?;

        if clips.is_empty() {
            writeln!(self.out, "No clips in output.")?;
            return Ok(());
        }

        for (i, clip) in clips.iter().enumerate() {
            writeln!(self.out)?;
            writeln!(self.out, "--- Clip {} ---", i + 1)?;
            writeln!(self.out, "Title: {}", clip.title.as_deref().unwrap_or("N/A"))?;
            writeln!(self.out, "URL: {}", clip.video_url.as_deref().unwrap_or("N/A"))?;
            writeln!(self.out, "Caption: {}", clip.caption.as_deref().unwrap_or("N/A"))?;
            if !clip.hashtags.is_empty() {
                writeln!(self.out, "Hashtags: {}", clip.hashtags.join(" "))?;
            }
        }
        Ok(())
    }
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn render(&mut self, observation: &Observation) -> io::Result<()> {
        if observation.newly_identified {
            if let Some(job_id) = &observation.job_id {
                writeln!(self.out, "Job ID: {}", job_id.to_string().cyan().bold())?;
                writeln!(self.out, "(Save this ID to retrieve results if interrupted)")?;
                writeln!(self.out, "{}", "-".repeat(40))?;
            }
        }

        writeln!(self.out, "Status: {}", observation.status)?;

        match observation.state {
            JobState::Completed => {
                let clips = observation.clips.as_deref().unwrap_or(&[]);
                self.render_clips(clips)?;
            }
            JobState::Failed => {
                let message = observation.error_message.as_deref().unwrap_or_default();
                writeln!(self.out, "{} {}", "Job failed:".red().bold(), message)?;
            }
            _ => {}
        }

        self.out.flush()
    }
}
