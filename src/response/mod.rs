//! Response assembly
//!
//! Turns per-file element sequences into the wire format the client asked
//! for: a JSON array (or array of arrays), one merged CSV table, or a
//! `multipart/mixed` stream with one part per file.

mod csv;
mod multipart;

use axum::http::StatusCode;
use bytes::Bytes;
use thiserror::Error;

use crate::engine::ElementRecord;

pub use self::csv::{merge_csv, render_csv, CsvTable, BASE_COLUMNS};
pub use self::multipart::MultipartEncoder;

/// Failures while rendering an already successful result
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Failed to render JSON: {0}")]
    Json(String),

    #[error("Failed to render CSV: {0}")]
    Csv(String),
}

impl AssemblyError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Body format of each file's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "application/json" => Some(Self::Json),
            "text/csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }
}

/// Renders and combines per-file results in one output format
#[derive(Debug, Clone, Copy)]
pub struct ResponseAssembler {
    format: OutputFormat,
}

impl ResponseAssembler {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Render one file's elements
    pub fn render_file(&self, elements: &[ElementRecord]) -> Result<Bytes, AssemblyError> {
        match self.format {
            OutputFormat::Json => serde_json::to_vec(elements)
                .map(Bytes::from)
                .map_err(|e| AssemblyError::Json(e.to_string())),
            OutputFormat::Csv => render_csv(elements).map(Bytes::from),
        }
    }

    /// Combine rendered files into one body.
    ///
    /// A single file is returned as is. Several JSON files become an array of
    /// arrays; several CSV files are outer-joined into one table.
    pub fn combine(&self, mut rendered: Vec<Bytes>) -> Result<Bytes, AssemblyError> {
        if rendered.len() == 1 {
            return Ok(rendered.remove(0));
        }

        match self.format {
            OutputFormat::Json => {
                let total = rendered.iter().map(|r| r.len() + 1).sum::<usize>() + 2;
                let mut body = Vec::with_capacity(total);
                body.push(b'[');
                for (i, file) in rendered.iter().enumerate() {
                    if i > 0 {
                        body.push(b',');
                    }
                    body.extend_from_slice(file);
                }
                body.push(b']');
                Ok(Bytes::from(body))
            }
            OutputFormat::Csv => {
                let documents = rendered
                    .iter()
                    .map(|r| String::from_utf8(r.to_vec()).map_err(|e| AssemblyError::Csv(e.to_string())))
                    .collect::<Result<Vec<_>, _>>()?;
                merge_csv(&documents).map(Bytes::from)
            }
        }
    }

    /// Encoder for a streamed response whose parts carry this format
    pub fn multipart(&self) -> MultipartEncoder {
        MultipartEncoder::new(self.format.mime())
    }
}
