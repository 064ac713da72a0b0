// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! reqwest-backed clips API client.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use super::{ByteStream, ClipsTransport, SubmitResponse};
use crate::config::{mask_sensitive, Config};
use crate::error::TransportError;
use crate::types::{JobId, JobParameters};

const API_KEY_HEADER: &str = "X-Api-Key";
const USER_AGENT: &str = concat!("clipwatch/", env!("CARGO_PKG_VERSION"));

/// Client for the clips endpoints.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    stream_idle_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Build a transport. `request_timeout` bounds status queries and the wait
    /// for the submission's response headers; the event stream itself is only
    /// bounded by the idle timeout, if one is set.
    /// only status queries are bounded by `request_timeout`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Connect(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_timeout,
            stream_idle_timeout: None,
        })
    }

    /// End the event stream with a timeout error when no bytes arrive for this long.
    pub fn with_stream_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.stream_idle_timeout = idle;
        self
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.require_api_key()?;
        let transport = Self::new(
            config.base_url.clone(),
            api_key,
            config.connect_timeout(),
            config.request_timeout(),
        )?
        .with_stream_idle_timeout(config.stream_idle_timeout());
        Ok(transport)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn clips_url(&self) -> String {
        format!("{}/clips", self.base_url)
    }

    fn status_url(&self, job_id: &JobId) -> String {
        format!("{}/clips/{}", self.base_url, job_id)
    }

    fn submission_timeout(&self) -> TransportError {
        TransportError::Timeout(format!(
            "no response to job submission within {}s",
            self.request_timeout.as_secs()
        ))
    }
}

/// Turn a non-2xx response into an error, keeping the body for the message.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Http {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl ClipsTransport for HttpTransport {
    async fn submit(&self, params: &JobParameters) -> Result<SubmitResponse, TransportError> {
        tracing::info!(
            "Submitting clip job ({} video(s), key {})",
            params.video_urls.len(),
            mask_sensitive(&self.api_key, 6)
        );

        let request = self
            .client
            .post(self.clips_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(params)
            .send();
        let response = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| self.submission_timeout())??;
        let response = check_status(response).await?;

        if !params.stream {
            let body = tokio::time::timeout(self.request_timeout, response.bytes())
                .await
                .map_err(|_| self.submission_timeout())??;
            return Ok(SubmitResponse::Document(body.to_vec()));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
        let body: ByteStream = match self.stream_idle_timeout {
            Some(idle) => Box::pin(tokio_stream::StreamExt::timeout(chunks, idle).map(move |item| {
                item.unwrap_or_else(|_| {
                    Err(TransportError::Timeout(format!(
                        "event stream idle for {}s",
                        idle.as_secs()
                    )))
                })
            })),
            None => Box::pin(chunks),
        };
        Ok(SubmitResponse::Stream(body))
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(self.status_url(job_id))
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
