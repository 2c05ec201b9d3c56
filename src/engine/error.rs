//! Partition error taxonomy
//!
//! The status code is part of the contract: retry classification and the
//! HTTP response both read it from here.

use axum::http::StatusCode;
use thiserror::Error;

/// Failure of a partition call, local or remote
#[derive(Debug, Clone, Error)]
pub enum PartitionError {
    #[error("File is encrypted. Please decrypt it with password.")]
    EncryptedFile,

    #[error("File does not appear to be a valid PDF")]
    InvalidPdf,

    #[error("{0}")]
    MalformedFile(String),

    #[error("{0} not currently supported")]
    UnsupportedFileType(String),

    #[error("Unknown model type: {0}")]
    UnknownModel(String),

    #[error("Json schema does not match the Unstructured schema")]
    SchemaMismatch,

    #[error("{0}")]
    PageCountExceeded(String),

    /// Container envelope is corrupt (e.g. a DOCX that is not a valid zip)
    #[error("{0}")]
    InvalidContainer(String),

    /// Non-200 answer from a sibling instance; the status is kept verbatim
    #[error("{detail}")]
    Remote { status: u16, detail: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Engine(String),
}

impl PartitionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EncryptedFile
            | Self::MalformedFile(_)
            | Self::UnsupportedFileType(_)
            | Self::UnknownModel(_)
            | Self::SchemaMismatch
            | Self::PageCountExceeded(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPdf | Self::InvalidContainer(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EncryptedFile => "encrypted_file",
            Self::InvalidPdf => "invalid_pdf",
            Self::MalformedFile(_) => "malformed_file",
            Self::UnsupportedFileType(_) => "unsupported_file_type",
            Self::UnknownModel(_) => "unknown_model",
            Self::SchemaMismatch => "schema_mismatch",
            Self::PageCountExceeded(_) => "page_count_exceeded",
            Self::InvalidContainer(_) => "invalid_container",
            Self::Remote { .. } => "remote",
            Self::Transport(_) => "transport",
            Self::Engine(_) => "engine",
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Map an engine failure body (`{"kind", "detail"}`) to a typed error
    pub fn from_engine_kind(kind: &str, detail: String) -> Self {
        match kind {
            "malformed_file" => Self::MalformedFile(detail),
            "unsupported_file_type" => Self::UnsupportedFileType(detail),
            "unknown_model" => Self::UnknownModel(detail),
            "schema_mismatch" => Self::SchemaMismatch,
            "page_count_exceeded" => Self::PageCountExceeded(detail),
            "invalid_container" => Self::InvalidContainer(detail),
            _ => Self::Engine(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_status_is_preserved() {
        let err = PartitionError::Remote {
            status: 429,
            detail: "slow down".into(),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.to_string(), "slow down");
    }

    #[test]
    fn test_engine_kind_mapping() {
        let err = PartitionError::from_engine_kind("invalid_container", "File is not a valid docx".into());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let err = PartitionError::from_engine_kind("segfault", "boom".into());
        assert!(matches!(err, PartitionError::Engine(_)));
        assert!(!err.is_client_error());
    }
}
