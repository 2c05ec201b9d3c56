//! Partition endpoint
//!
//! Endpoints:
//! - POST /general/v0/general - Partition one or more uploaded files
//! - POST /general/v0.0.68/general - Same handler under the pinned version

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, ConnectInfo, Multipart, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};

use crate::dispatch::{DispatchContext, API_KEY_HEADER};
use crate::error::{ApiError, Result};
use crate::options::{FormFields, RequestParams};
use crate::orchestrator::UploadedFile;
use crate::response::ResponseAssembler;
use crate::state::AppState;

const MULTIPART_MIXED: &str = "multipart/mixed";

/// `Accept` values allowed when more than one file is uploaded
const MULTI_FILE_ACCEPT: [&str; 4] = ["*/*", MULTIPART_MIXED, "application/json", "text/csv"];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/general/v0/general", post(partition).get(reject_get))
        .route("/general/v0.0.68/general", post(partition).get(reject_get))
}

async fn reject_get() -> ApiError {
    ApiError::MethodNotAllowed
}

/// POST /general/v0/general
///
/// Multipart form with repeated `files` parts plus partition options.
async fn partition(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let permit = state.gate().admit()?;
    check_api_key(state.config().server.api_key.as_deref(), &headers)?;

    let multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let (files, fields) = read_form(multipart).await?;

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);
    if let Some(accept) = accept {
        if files.len() > 1 && !MULTI_FILE_ACCEPT.contains(&accept) {
            return Err(ApiError::NotAcceptable(accept.to_string()));
        }
    }
    if files.is_empty() {
        return Err(ApiError::MissingFiles);
    }

    let params = RequestParams::from_fields(&fields)?;
    if !is_internal_request(&headers, peer.map(|ConnectInfo(addr)| addr)) {
        tracing::debug!(files = files.len(), params = ?params, "Partition request");
    }

    let context = DispatchContext {
        api_key: header_value(&headers, API_KEY_HEADER),
    };
    let assembler = ResponseAssembler::new(params.output_format);

    if accept == Some(MULTIPART_MIXED) {
        let encoder = assembler.multipart();
        let content_type = encoder.content_type();
        let payloads = state
            .orchestrator()
            .clone()
            .payload_stream(files, params, context, permit);
        let body = Body::from_stream(encoder.stream(payloads));
        return Ok(([(header::CONTENT_TYPE, content_type)], body).into_response());
    }

    let body = state.orchestrator().process_batch(files, &params, &context).await?;
    drop(permit);

    Ok(([(header::CONTENT_TYPE, assembler.format().mime())], body).into_response())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn check_api_key(expected: Option<&str>, headers: &HeaderMap) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = header_value(headers, API_KEY_HEADER);
    if provided.as_deref() == Some(expected) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized(provided))
    }
}

/// Calls from sibling instances arrive from the private 10.x range
fn is_internal_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> bool {
    let origin = header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next().map(|first| first.trim().to_string()))
        .or_else(|| peer.map(|addr| addr.ip().to_string()));
    origin.is_some_and(|origin| origin.starts_with("10."))
}

/// Split the form into uploaded files and text fields
async fn read_form(mut multipart: Multipart) -> Result<(Vec<UploadedFile>, FormFields)> {
    let mut files = Vec::new();
    let mut fields = FormFields::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name == "files" || name == "files[]" {
            let filename = field.file_name().unwrap_or("").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read file data: {}", e)))?;

            tracing::debug!(
                filename = %filename,
                content_type = ?content_type,
                size = data.len(),
                "Received file"
            );
            files.push(UploadedFile::new(filename, content_type, data));
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read field {}: {}", name, e)))?;
            fields.push(&name, value);
        }
    }

    Ok((files, fields))
}
