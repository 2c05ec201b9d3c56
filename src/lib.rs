//! Partition Gateway
//!
//! HTTP front for a document partition engine. Requests pass an admission
//! gate, large PDFs are split into page chunks and fanned out, and results
//! are merged back in page order.
//!
//! # Modules
//!
//! - `admission`: memory and concurrency admission control, probes
//! - `dispatch`: PDF splitting, retrying and parallel chunk dispatch
//! - `engine`: element model and the partition engine client
//! - `response`: JSON, CSV and multipart/mixed assembly
//! - `orchestrator`: per-request composition of the above

pub mod admission;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod response;
pub mod routes;
pub mod state;
