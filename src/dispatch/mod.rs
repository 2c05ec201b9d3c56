//! PDF fan-out dispatch
//!
//! Large PDFs are cut into page chunks, partitioned in parallel (in-process
//! or on a sibling instance) and stitched back together in page order.
//!
//! ```rust,ignore
//! let dispatcher = FanOutDispatcher::new(engine, backend, PageSplitter::new(3)?, RetryPolicy::default(), 3);
//! let elements = dispatcher.run(&input, pdf, &options, &context).await?;
//! ```

mod backend;
mod dispatcher;
mod retry;
mod splitter;

pub use backend::{ChunkBackend, DispatchContext, LocalBackend, RemoteBackend, API_KEY_HEADER};
pub use dispatcher::{merge_chunk_results, ChunkResult, FanOutDispatcher, DEFAULT_WORKERS};
pub use retry::{RetryAttempt, RetryPolicy, DEFAULT_RETRIES};
pub use splitter::{PageChunk, PageSplitter, PdfDocument, SplitError};

#[cfg(test)]
pub(crate) use splitter::fixtures;
