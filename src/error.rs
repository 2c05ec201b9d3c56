//! Error types for the partition gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::engine::PartitionError;
use crate::options::ParamError;
use crate::response::AssemblyError;

/// Handler result type
pub type Result<T> = std::result::Result<T, ApiError>;

/// Any failure that ends a partition request
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("API key {} is invalid", .0.as_deref().unwrap_or("None"))]
    Unauthorized(Option<String>),

    #[error("Conflict in media type {0} with response type 'multipart/mixed'.\n")]
    NotAcceptable(String),

    #[error("Request parameter \"files\" is required.")]
    MissingFiles,

    #[error("File type {0} is not supported.")]
    UnsupportedMimeType(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("File {filename} exceeds the upload limit of {limit} bytes once decompressed.")]
    UploadTooLarge { filename: String, limit: usize },

    #[error("Only POST requests are supported.")]
    MethodNotAllowed,

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Params(#[from] ParamError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::MissingFiles | Self::UnsupportedMimeType(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Admission(e) => e.status_code(),
            Self::Params(e) => e.status_code(),
            Self::Partition(e) => e.status_code(),
            Self::Assembly(e) => e.status_code(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && !matches!(self, ApiError::Admission(_)) {
            tracing::error!(status = status.as_u16(), "Request failed: {}", self);
        } else {
            tracing::debug!(status = status.as_u16(), "Request rejected: {}", self);
        }

        let body = Json(ErrorResponse {
            detail: self.to_string(),
        });

        (status, body).into_response()
    }
}
