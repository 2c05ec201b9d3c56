//! Partition Engine providers
//!
//! Defines the engine trait and the HTTP adapter that talks to an engine
//! sidecar.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::error::PartitionError;
use super::types::{ElementRecord, PartitionInput, PartitionOptions};

/// Partition Engine trait
///
/// Converts one file into an ordered sequence of elements. Element ids must be
/// unique within one invocation (content hash or random ids); the gateway never
/// rewrites them.
#[async_trait]
pub trait PartitionEngine: Send + Sync {
    async fn partition(
        &self,
        input: &PartitionInput,
        options: &PartitionOptions,
    ) -> Result<Vec<ElementRecord>, PartitionError>;
}

/// Build the multipart body shared by engine and sibling calls
pub(crate) fn partition_form(
    input: &PartitionInput,
    options: &PartitionOptions,
) -> Result<Form, PartitionError> {
    let mut part = Part::bytes(input.data.to_vec()).file_name(input.filename.clone());
    if let Some(content_type) = &input.content_type {
        part = part
            .mime_str(content_type)
            .map_err(|e| PartitionError::Transport(format!("Invalid content type: {}", e)))?;
    }

    let form = options
        .to_form_fields()
        .into_iter()
        .fold(Form::new().part("files", part), |form, (name, value)| {
            form.text(name, value)
        });

    Ok(form)
}

#[derive(Debug, Deserialize)]
struct EngineFailure {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    detail: String,
}

/// Engine sidecar reached over HTTP
pub struct HttpPartitionEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPartitionEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PartitionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PartitionError::Engine(format!("Failed to build engine client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PartitionEngine for HttpPartitionEngine {
    async fn partition(
        &self,
        input: &PartitionInput,
        options: &PartitionOptions,
    ) -> Result<Vec<ElementRecord>, PartitionError> {
        let url = format!("{}/partition", self.base_url);
        let form = partition_form(input, options)?;

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PartitionError::Engine(format!("Failed to call partition engine: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<EngineFailure>(&body) {
                Ok(failure) => PartitionError::from_engine_kind(&failure.kind, failure.detail),
                Err(_) => PartitionError::Engine(format!(
                    "Partition engine returned {}: {}",
                    status, body
                )),
            });
        }

        response
            .json::<Vec<ElementRecord>>()
            .await
            .map_err(|e| PartitionError::Engine(format!("Failed to parse engine response: {}", e)))
    }
}
