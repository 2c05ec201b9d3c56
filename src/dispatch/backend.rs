//! Chunk backends
//!
//! Where a page chunk gets partitioned: in-process through the engine, or on a
//! sibling instance of this gateway reached over HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::engine::{partition_form, ElementRecord, PartitionEngine, PartitionError, PartitionInput, PartitionOptions};

/// Header carrying the client's API key
pub const API_KEY_HEADER: &str = "unstructured-api-key";

/// Per-request values forwarded with every chunk call
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub api_key: Option<String>,
}

/// Chunk backend trait
///
/// Page numbers in the returned elements are relative to the chunk; the
/// dispatcher adds the chunk offset.
#[async_trait]
pub trait ChunkBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn partition_chunk(
        &self,
        input: &PartitionInput,
        options: &PartitionOptions,
        context: &DispatchContext,
    ) -> Result<Vec<ElementRecord>, PartitionError>;
}

// ============================================================================
// Local
// ============================================================================

/// Partitions chunks with the engine in this process
pub struct LocalBackend {
    engine: Arc<dyn PartitionEngine>,
}

impl LocalBackend {
    pub fn new(engine: Arc<dyn PartitionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ChunkBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn partition_chunk(
        &self,
        input: &PartitionInput,
        options: &PartitionOptions,
        _context: &DispatchContext,
    ) -> Result<Vec<ElementRecord>, PartitionError> {
        self.engine.partition(input, options).await
    }
}

// ============================================================================
// Remote
// ============================================================================

#[derive(Debug, Deserialize)]
struct RemoteFailure {
    detail: Option<String>,
}

/// Sends chunks to a sibling gateway's `/general` endpoint
pub struct RemoteBackend {
    client: reqwest::Client,
    url: String,
}

impl RemoteBackend {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PartitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PartitionError::Engine(format!("Failed to build dispatch client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ChunkBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn partition_chunk(
        &self,
        input: &PartitionInput,
        options: &PartitionOptions,
        context: &DispatchContext,
    ) -> Result<Vec<ElementRecord>, PartitionError> {
        // The sibling must answer with JSON whatever the client asked for
        let form = partition_form(input, options)?.text("output_format", "application/json");

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &context.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PartitionError::Transport(format!("Failed to reach {}: {}", self.url, e)))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<RemoteFailure>(&body)
                .ok()
                .and_then(|failure| failure.detail)
                .unwrap_or(body);
            return Err(PartitionError::Remote {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .json::<Vec<ElementRecord>>()
            .await
            .map_err(|e| PartitionError::Transport(format!("Invalid response from {}: {}", self.url, e)))
    }
}
