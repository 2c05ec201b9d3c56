//! Partition Engine
//!
//! The engine does the actual document understanding (layout detection, OCR,
//! table extraction). The gateway treats it as an opaque collaborator: bytes,
//! a media type and a bag of options in; an ordered list of elements or a
//! typed error out.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use partition_gateway::engine::{HttpPartitionEngine, PartitionEngine, PartitionInput};
//!
//! let engine = HttpPartitionEngine::new("http://localhost:8500", Duration::from_secs(600))?;
//! let input = PartitionInput::new(bytes, "report.pdf", Some("application/pdf".into()));
//! let elements = engine.partition(&input, &PartitionOptions::default()).await?;
//! ```

mod error;
mod provider;
mod types;

pub use error::PartitionError;
pub use provider::{HttpPartitionEngine, PartitionEngine};
pub use types::{
    metadata_keys, ChunkingStrategy, ElementRecord, PartitionInput, PartitionOptions, Strategy,
};

pub(crate) use provider::partition_form;

#[cfg(test)]
pub(crate) use provider::mock;
