// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport seam between the observers and the clips API.
//!
//! The observers only see [`ClipsTransport`]; [`HttpTransport`] is the real
//! implementation, tests plug in an in-memory one.

pub mod http;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;

use crate::error::TransportError;
use crate::types::{JobId, JobParameters};

pub use http::HttpTransport;

/// Raw body of one connection, chunk by chunk.
///
/// Dropping the stream releases the connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// What the service answered to a submission.
pub enum SubmitResponse {
    /// `stream: true` - incremental event body.
    Stream(ByteStream),
    /// `stream: false` - a single JSON document.
    Document(Vec<u8>),
}

impl std::fmt::Debug for SubmitResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("SubmitResponse::Stream(..)"),
            Self::Document(body) => write!(f, "SubmitResponse::Document({} bytes)", body.len()),
        }
    }
}

#[async_trait]
pub trait ClipsTransport: Send + Sync + 'static {
    /// Create a job. Any error here is fatal to the caller.
    async fn submit(&self, params: &JobParameters) -> Result<SubmitResponse, TransportError>;

    /// Point-in-time status of an existing job.
    async fn fetch_status(&self, job_id: &JobId) -> Result<Value, TransportError>;
}
