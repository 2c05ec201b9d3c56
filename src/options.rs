//! Partition request parameters
//!
//! Multipart text fields arrive as loose strings. They are collected into
//! [`FormFields`] while the upload is read, then validated once into
//! [`RequestParams`].

use std::str::FromStr;

use axum::http::StatusCode;
use thiserror::Error;

use crate::engine::{ChunkingStrategy, PartitionOptions, Strategy};
use crate::response::OutputFormat;

/// Model names that cannot report coordinates
const CHIPPER_MODELS: [&str; 4] = ["chipper", "chipperv1", "chipperv2", "chipperv3"];

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("Invalid value \"{value}\" for parameter {field}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Invalid strategy: {0}. Must be one of {}", quoted_list(&Strategy::ALL.map(|s| s.as_str())))]
    InvalidStrategy(String),

    #[error("Invalid chunking strategy: {0}. Must be one of {}", quoted_list(&ChunkingStrategy::ALL.map(|s| s.as_str())))]
    InvalidChunkingStrategy(String),

    #[error("coordinates aren't available when using the {0} model type")]
    CoordinatesUnavailable(String),

    #[error("Unsupported media type {0}")]
    UnsupportedOutputFormat(String),
}

impl ParamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidValue { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnsupportedOutputFormat(_) => StatusCode::NOT_ACCEPTABLE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

fn quoted_list(values: &[&str]) -> String {
    let inner: Vec<String> = values.iter().map(|v| format!("'{}'", v)).collect();
    format!("[{}]", inner.join(", "))
}

// ============================================================================
// Raw fields
// ============================================================================

/// Text fields in arrival order; `key[]` is stored as `key`
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    fields: Vec<(String, String)>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: impl Into<String>) {
        let name = name.strip_suffix("[]").unwrap_or(name);
        self.fields.push((name.to_string(), value.into()));
    }

    /// First non-empty value sent for `name`
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.trim())
            .find(|v| !v.is_empty())
    }

    /// Every non-empty value sent for `name`
    pub fn all(&self, name: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(k, v)| k == name && !v.trim().is_empty())
            .map(|(_, v)| v.trim().to_string())
            .collect()
    }

    fn flag(&self, field: &'static str, default: bool) -> Result<bool, ParamError> {
        match self.first(field) {
            None => Ok(default),
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ParamError::InvalidValue {
                    field,
                    value: value.to_string(),
                }),
            },
        }
    }

    fn number<T: FromStr>(&self, field: &'static str) -> Result<Option<T>, ParamError> {
        self.first(field)
            .map(|value| {
                value.parse().map_err(|_| ParamError::InvalidValue {
                    field,
                    value: value.to_string(),
                })
            })
            .transpose()
    }
}

// ============================================================================
// Validated parameters
// ============================================================================

/// Everything the request asked for besides the files
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    pub options: PartitionOptions,
    pub output_format: OutputFormat,
    pub gz_uncompressed_content_type: Option<String>,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            options: PartitionOptions::default(),
            output_format: OutputFormat::Json,
            gz_uncompressed_content_type: None,
        }
    }
}

impl RequestParams {
    pub fn from_fields(fields: &FormFields) -> Result<Self, ParamError> {
        let defaults = PartitionOptions::default();

        let output_format = match fields.first("output_format") {
            None => OutputFormat::Json,
            Some(value) => {
                OutputFormat::parse(value).ok_or_else(|| ParamError::UnsupportedOutputFormat(value.to_string()))?
            }
        };

        let strategy = match fields.first("strategy") {
            None => defaults.strategy,
            Some(value) => Strategy::parse(value).ok_or_else(|| ParamError::InvalidStrategy(value.to_lowercase()))?,
        };

        let chunking_strategy = fields
            .first("chunking_strategy")
            .map(|value| ChunkingStrategy::parse(value).ok_or_else(|| ParamError::InvalidChunkingStrategy(value.to_lowercase())))
            .transpose()?;

        let coordinates = fields.flag("coordinates", defaults.coordinates)?;

        let hi_res_model_name = fields.first("hi_res_model_name").map(|name| match name {
            "chipper" => "chipperv2".to_string(),
            other => other.to_string(),
        });
        if let Some(model) = &hi_res_model_name {
            if coordinates && CHIPPER_MODELS.contains(&model.as_str()) {
                return Err(ParamError::CoordinatesUnavailable(model.clone()));
            }
        }

        let options = PartitionOptions {
            strategy,
            coordinates,
            encoding: fields.first("encoding").map(str::to_string).unwrap_or(defaults.encoding),
            hi_res_model_name,
            include_page_breaks: fields.flag("include_page_breaks", defaults.include_page_breaks)?,
            languages: fields.all("languages"),
            ocr_languages: fields.all("ocr_languages"),
            pdf_infer_table_structure: fields.flag("pdf_infer_table_structure", defaults.pdf_infer_table_structure)?,
            skip_infer_table_types: fields.all("skip_infer_table_types"),
            xml_keep_tags: fields.flag("xml_keep_tags", defaults.xml_keep_tags)?,
            extract_image_block_types: fields.all("extract_image_block_types"),
            unique_element_ids: fields.flag("unique_element_ids", defaults.unique_element_ids)?,
            chunking_strategy,
            combine_under_n_chars: fields.number("combine_under_n_chars")?,
            max_characters: fields.number("max_characters")?.unwrap_or(defaults.max_characters),
            multipage_sections: fields.flag("multipage_sections", defaults.multipage_sections)?,
            new_after_n_chars: fields.number("new_after_n_chars")?,
            overlap: fields.number("overlap")?.unwrap_or(defaults.overlap),
            overlap_all: fields.flag("overlap_all", defaults.overlap_all)?,
            starting_page_number: fields.number("starting_page_number")?,
        };

        Ok(Self {
            options,
            output_format,
            gz_uncompressed_content_type: fields.first("gz_uncompressed_content_type").map(str::to_string),
        })
    }
}
