// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading.
//!
//! Values come from `<config dir>/clipwatch/config.json` when it exists, then
//! the environment overrides them:
//!
//! - `REKA_API_KEY` - API key sent as `X-Api-Key`
//! - `CLIPWATCH_BASE_URL` - API base, e.g. `https://vision-agent.api.reka.ai/v1`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ErrorBuilder;
use crate::retry::{RetryPolicy, DEFAULT_RETRY_INTERVAL_SECS};

pub const DEFAULT_BASE_URL: &str = "https://vision-agent.api.reka.ai/v1";
pub const API_KEY_ENV: &str = "REKA_API_KEY";
pub const BASE_URL_ENV: &str = "CLIPWATCH_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Wait between status queries while the job is not finished
    #[serde(default = "default_interval_secs")]
    pub poll_interval_secs: u64,
    /// Wait between attempts after a transient failure
    #[serde(default = "default_interval_secs")]
    pub retry_interval_secs: u64,
    /// `None` retries forever
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Timeout for a single status query
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Give up on an event stream that sends nothing for this long. `null` disables it.
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_interval_secs() -> u64 {
    DEFAULT_RETRY_INTERVAL_SECS
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_stream_idle_timeout_secs() -> Option<u64> {
    Some(300)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            poll_interval_secs: default_interval_secs(),
            retry_interval_secs: default_interval_secs(),
            max_retries: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_secs(self.retry_interval_secs))
            .with_max_retries(self.max_retries)
    }

    /// The API key, or a formatted configuration error.
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ErrorBuilder::new(format!("{} is not set", API_KEY_ENV))
                .cause("The environment variable was never exported")
                .cause("No api_key in the clipwatch config file")
                .fix(format!("Set it with: export {}=your_api_key", API_KEY_ENV))
                .into()),
        }
    }

    /// Apply environment overrides from any key lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(key.trim().to_string());
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
    }
}

/// Directory holding `config.json`.
pub fn get_config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .context("Could not determine the user config directory")?
        .join("clipwatch");
    Ok(dir)
}

/// Read a config file, falling back to defaults when it does not exist.
pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

/// Load the config file and apply environment overrides.
pub fn load_config() -> Result<Config> {
    let path = get_config_dir()?.join("config.json");
    let mut config = load_config_from(&path)?;
    config.apply_env(|key| std::env::var(key).ok());

    tracing::debug!(
        "Loaded config: base_url={}, api_key={}",
        config.base_url,
        config
            .api_key
            .as_deref()
            .map(|k| mask_sensitive(k, 6))
            .unwrap_or_else(|| "<unset>".to_string())
    );

    Ok(config)
}

/// Mask a sensitive string (like API keys) for logging.
///
/// ```
/// use clipwatch::config::mask_sensitive;
///
/// assert_eq!(mask_sensitive("rk-abcdef123456", 3), "rk-...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}
