//! Partition Engine types
//!
//! Element records returned by the engine and the option bag sent with
//! every partition call.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata keys the gateway rewrites or strips
pub mod metadata_keys {
    pub const PAGE_NUMBER: &str = "page_number";
    pub const FILENAME: &str = "filename";
    pub const COORDINATES: &str = "coordinates";
    pub const LAST_MODIFIED: &str = "last_modified";
    pub const FILE_DIRECTORY: &str = "file_directory";
    pub const DETECTION_CLASS_PROB: &str = "detection_class_prob";
}

// ============================================================================
// Elements
// ============================================================================

/// One structured unit of extracted content (paragraph, table, image, ...)
///
/// `metadata` is kept as an open JSON object: the engine owns its schema and
/// the gateway only touches the handful of keys in [`metadata_keys`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(rename = "element_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ElementRecord {
    pub fn new(element_type: impl Into<String>, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            element_type: element_type.into(),
            id: id.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }

    /// Page number (1-indexed) if the engine assigned one
    pub fn page_number(&self) -> Option<u64> {
        self.metadata
            .get(metadata_keys::PAGE_NUMBER)
            .and_then(Value::as_u64)
    }

    pub fn set_page_number(&mut self, page: u64) {
        self.metadata
            .insert(metadata_keys::PAGE_NUMBER.to_string(), Value::from(page));
    }

    pub fn with_page_number(mut self, page: u64) -> Self {
        self.set_page_number(page);
        self
    }

    /// Shift the page number by a chunk offset.
    ///
    /// Elements without a page number (e.g. page breaks) are left alone.
    pub fn rebase_page(&mut self, offset: u64) {
        if let Some(page) = self.page_number() {
            self.set_page_number(page + offset);
        }
    }

    pub fn set_filename(&mut self, filename: &str) {
        self.metadata.insert(
            metadata_keys::FILENAME.to_string(),
            Value::String(filename.to_string()),
        );
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<Value> {
        self.metadata.remove(key)
    }
}

// ============================================================================
// Input
// ============================================================================

/// A file handed to the engine (or a sibling instance)
#[derive(Debug, Clone)]
pub struct PartitionInput {
    pub data: Bytes,
    /// Logical filename as uploaded, never a temp path
    pub filename: String,
    /// Declared or detected media type
    pub content_type: Option<String>,
}

impl PartitionInput {
    pub fn new(data: impl Into<Bytes>, filename: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
            content_type,
        }
    }
}

// ============================================================================
// Options
// ============================================================================

/// Partitioning strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Fast,
    HiRes,
    Auto,
    OcrOnly,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [Self::Fast, Self::HiRes, Self::Auto, Self::OcrOnly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::HiRes => "hi_res",
            Self::Auto => "auto",
            Self::OcrOnly => "ocr_only",
        }
    }

    /// Case-insensitive lookup
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::Auto
    }
}

/// Chunking strategy applied by the engine after partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    Basic,
    ByTitle,
}

impl ChunkingStrategy {
    pub const ALL: [ChunkingStrategy; 2] = [Self::Basic, Self::ByTitle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::ByTitle => "by_title",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// Typed partitioning parameters, built once per request.
///
/// Every chunk of a file is partitioned with the same options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionOptions {
    pub strategy: Strategy,
    pub coordinates: bool,
    pub encoding: String,
    pub hi_res_model_name: Option<String>,
    pub include_page_breaks: bool,
    pub languages: Vec<String>,
    pub ocr_languages: Vec<String>,
    pub pdf_infer_table_structure: bool,
    pub skip_infer_table_types: Vec<String>,
    pub xml_keep_tags: bool,
    pub extract_image_block_types: Vec<String>,
    pub unique_element_ids: bool,
    pub chunking_strategy: Option<ChunkingStrategy>,
    pub combine_under_n_chars: Option<u32>,
    pub max_characters: u32,
    pub multipage_sections: bool,
    pub new_after_n_chars: Option<u32>,
    pub overlap: u32,
    pub overlap_all: bool,
    pub starting_page_number: Option<u32>,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Auto,
            coordinates: false,
            encoding: "utf-8".to_string(),
            hi_res_model_name: None,
            include_page_breaks: false,
            languages: Vec::new(),
            ocr_languages: Vec::new(),
            pdf_infer_table_structure: true,
            skip_infer_table_types: Vec::new(),
            xml_keep_tags: false,
            extract_image_block_types: Vec::new(),
            unique_element_ids: false,
            chunking_strategy: None,
            combine_under_n_chars: None,
            max_characters: 500,
            multipage_sections: true,
            new_after_n_chars: None,
            overlap: 0,
            overlap_all: false,
            starting_page_number: None,
        }
    }
}

impl PartitionOptions {
    /// Encode as multipart form fields, using the same names the
    /// `/general` endpoint accepts. Lists become repeated fields.
    pub fn to_form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("strategy", self.strategy.as_str().to_string()),
            ("coordinates", self.coordinates.to_string()),
            ("encoding", self.encoding.clone()),
            ("include_page_breaks", self.include_page_breaks.to_string()),
            ("pdf_infer_table_structure", self.pdf_infer_table_structure.to_string()),
            ("xml_keep_tags", self.xml_keep_tags.to_string()),
            ("unique_element_ids", self.unique_element_ids.to_string()),
            ("max_characters", self.max_characters.to_string()),
            ("multipage_sections", self.multipage_sections.to_string()),
            ("overlap", self.overlap.to_string()),
            ("overlap_all", self.overlap_all.to_string()),
        ];

        if let Some(model) = &self.hi_res_model_name {
            fields.push(("hi_res_model_name", model.clone()));
        }
        if let Some(chunking) = self.chunking_strategy {
            fields.push(("chunking_strategy", chunking.as_str().to_string()));
        }
        if let Some(n) = self.combine_under_n_chars {
            fields.push(("combine_under_n_chars", n.to_string()));
        }
        if let Some(n) = self.new_after_n_chars {
            fields.push(("new_after_n_chars", n.to_string()));
        }
        if let Some(n) = self.starting_page_number {
            fields.push(("starting_page_number", n.to_string()));
        }

        let lists: [(&'static str, &Vec<String>); 4] = [
            ("languages", &self.languages),
            ("ocr_languages", &self.ocr_languages),
            ("skip_infer_table_types", &self.skip_infer_table_types),
            ("extract_image_block_types", &self.extract_image_block_types),
        ];
        for (name, values) in lists {
            fields.extend(values.iter().map(|v| (name, v.clone())));
        }

        fields
    }
}
