//! Fan-out / fan-in over PDF page chunks

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::backend::{ChunkBackend, DispatchContext};
use super::retry::RetryPolicy;
use super::splitter::{PageChunk, PageSplitter, PdfDocument};
use crate::engine::{ElementRecord, PartitionEngine, PartitionError, PartitionInput, PartitionOptions};

/// Default worker pool width
pub const DEFAULT_WORKERS: usize = 3;

/// Elements returned for one chunk, with their local page numbers
#[derive(Debug)]
pub struct ChunkResult {
    pub index: usize,
    pub starting_page_offset: usize,
    pub elements: Vec<ElementRecord>,
}

/// Concatenate chunk results in index order and rebase page numbers.
///
/// Completion order is irrelevant; the input may arrive in any order.
pub fn merge_chunk_results(mut results: Vec<ChunkResult>) -> Vec<ElementRecord> {
    results.sort_by_key(|r| r.index);

    let total = results.iter().map(|r| r.elements.len()).sum();
    let mut merged = Vec::with_capacity(total);
    for result in results {
        let offset = result.starting_page_offset as u64;
        merged.extend(result.elements.into_iter().map(|mut element| {
            element.rebase_page(offset);
            element
        }));
    }
    merged
}

/// Splits large PDFs and partitions the chunks in parallel
pub struct FanOutDispatcher {
    engine: Arc<dyn PartitionEngine>,
    backend: Arc<dyn ChunkBackend>,
    splitter: PageSplitter,
    retry: RetryPolicy,
    workers: usize,
}

impl FanOutDispatcher {
    pub fn new(
        engine: Arc<dyn PartitionEngine>,
        backend: Arc<dyn ChunkBackend>,
        splitter: PageSplitter,
        retry: RetryPolicy,
        workers: usize,
    ) -> Self {
        Self {
            engine,
            backend,
            splitter,
            retry,
            workers: workers.max(1),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Partition a PDF, fanning out when it has more pages than one chunk.
    ///
    /// Small documents go straight to the engine and come back unmodified.
    pub async fn run(
        &self,
        input: &PartitionInput,
        pdf: PdfDocument,
        options: &PartitionOptions,
        context: &DispatchContext,
    ) -> Result<Vec<ElementRecord>, PartitionError> {
        let page_count = pdf.page_count();
        if !self.splitter.needs_split(page_count) {
            tracing::debug!(
                filename = %input.filename,
                pages = page_count,
                "Document fits in one chunk, partitioning directly"
            );
            return self.engine.partition(input, options).await;
        }

        let splitter = self.splitter;
        let chunks = tokio::task::spawn_blocking(move || splitter.split(&pdf))
            .await
            .map_err(|e| PartitionError::Engine(format!("Split task failed: {}", e)))??;

        tracing::info!(
            filename = %input.filename,
            pages = page_count,
            chunks = chunks.len(),
            chunk_size = self.splitter.chunk_size(),
            backend = self.backend.name(),
            "Dispatching PDF chunks"
        );

        self.dispatch_chunks(input, chunks, options, context).await
    }

    /// Run every chunk through the backend on a bounded pool.
    ///
    /// The first chunk to fail terminally (by completion) ends the dispatch
    /// with its error. Chunks already running are detached, not aborted.
    pub async fn dispatch_chunks(
        &self,
        source: &PartitionInput,
        chunks: Vec<PageChunk>,
        options: &PartitionOptions,
        context: &DispatchContext,
    ) -> Result<Vec<ElementRecord>, PartitionError> {
        let pool = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut results = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let pool = pool.clone();
            let backend = self.backend.clone();
            let retry = self.retry.clone();
            let options = options.clone();
            let context = context.clone();
            let input = PartitionInput::new(chunk.data, source.filename.clone(), source.content_type.clone());
            let index = chunk.index;
            let offset = chunk.starting_page_offset;
            let pages = chunk.page_count;

            tasks.spawn(async move {
                let _slot = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| PartitionError::Engine("Dispatch pool closed".to_string()))?;

                tracing::debug!(chunk = index, offset, pages, "Chunk started");

                let backend = &backend;
                let input = &input;
                let options = &options;
                let context = &context;
                let elements = retry
                    .execute(move |_| backend.partition_chunk(input, options, context))
                    .await?;

                tracing::debug!(chunk = index, elements = elements.len(), "Chunk finished");

                Ok::<_, PartitionError>(ChunkResult {
                    index,
                    starting_page_offset: offset,
                    elements,
                })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|e| PartitionError::Engine(format!("Chunk task failed: {}", e)))
                .and_then(|result| result);

            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::error!(
                        filename = %source.filename,
                        kind = err.kind(),
                        status = err.status_code().as_u16(),
                        "Chunk failed, abandoning dispatch: {}",
                        err
                    );
                    tasks.detach_all();
                    return Err(err);
                }
            }
        }

        Ok(merge_chunk_results(results))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::dispatch::splitter::fixtures;
    use crate::dispatch::RemoteBackend;
    use crate::engine::mock::MockEngine;

    /// Backend scripted by the first byte of each chunk (its index)
    struct ScriptedBackend {
        calls: AtomicUsize,
        finished: Mutex<Vec<usize>>,
        failures: Mutex<Vec<(usize, PartitionError)>>,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                finished: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
            }
        }

        fn failing(self, chunk: usize, error: PartitionError) -> Self {
            self.failures.lock().push((chunk, error));
            self
        }
    }

    #[async_trait]
    impl ChunkBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn partition_chunk(
            &self,
            input: &PartitionInput,
            _options: &PartitionOptions,
            _context: &DispatchContext,
        ) -> Result<Vec<ElementRecord>, PartitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = input.data[0] as usize;

            // Earlier chunks finish last
            tokio::time::sleep(Duration::from_millis(10 * (4 - index as u64))).await;

            let failure = {
                let mut failures = self.failures.lock();
                failures
                    .iter()
                    .position(|(chunk, _)| *chunk == index)
                    .map(|pos| failures.remove(pos).1)
            };
            if let Some(error) = failure {
                return Err(error);
            }

            self.finished.lock().push(index);
            Ok(vec![
                ElementRecord::new("Title", format!("c{}-a", index), "").with_page_number(1),
                ElementRecord::new("NarrativeText", format!("c{}-b", index), "").with_page_number(2),
            ])
        }
    }

    fn chunks(count: usize, size: usize) -> Vec<PageChunk> {
        (0..count)
            .map(|index| PageChunk {
                index,
                starting_page_offset: index * size,
                page_count: size,
                data: Bytes::from(vec![index as u8]),
            })
            .collect()
    }

    fn dispatcher(engine: Arc<MockEngine>, backend: Arc<dyn ChunkBackend>, retry: RetryPolicy) -> FanOutDispatcher {
        FanOutDispatcher::new(engine, backend, PageSplitter::new(2).unwrap(), retry, 4)
    }

    fn source() -> PartitionInput {
        PartitionInput::new(Vec::new(), "report.pdf", Some("application/pdf".into()))
    }

    #[test]
    fn test_merge_orders_by_index_and_rebases() {
        let results = vec![
            ChunkResult {
                index: 1,
                starting_page_offset: 3,
                elements: vec![ElementRecord::new("Text", "b", "").with_page_number(1)],
            },
            ChunkResult {
                index: 0,
                starting_page_offset: 0,
                elements: vec![
                    ElementRecord::new("Text", "a", "").with_page_number(3),
                    ElementRecord::new("PageBreak", "p", ""),
                ],
            },
        ];

        let merged = merge_chunk_results(results);
        let ids: Vec<_> = merged.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "p", "b"]);
        assert_eq!(merged[0].page_number(), Some(3));
        assert_eq!(merged[1].page_number(), None);
        assert_eq!(merged[2].page_number(), Some(4));
    }

    #[tokio::test]
    async fn test_output_follows_chunk_order_not_completion_order() {
        let backend = Arc::new(ScriptedBackend::new());
        let dispatcher = dispatcher(Arc::new(MockEngine::returning(vec![])), backend.clone(), RetryPolicy::immediate(1));

        let merged = dispatcher
            .dispatch_chunks(&source(), chunks(4, 2), &PartitionOptions::default(), &DispatchContext::default())
            .await
            .unwrap();

        // The last chunk finished first
        assert_eq!(backend.finished.lock()[0], 3);

        let pages: Vec<_> = merged.iter().filter_map(|e| e.page_number()).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(merged[0].id, "c0-a");
        assert_eq!(merged[7].id, "c3-b");
    }

    #[tokio::test]
    async fn test_first_terminal_failure_is_returned() {
        let backend = Arc::new(ScriptedBackend::new().failing(
            2,
            PartitionError::Remote {
                status: 400,
                detail: "bad chunk".into(),
            },
        ));
        let dispatcher = dispatcher(Arc::new(MockEngine::returning(vec![])), backend.clone(), RetryPolicy::immediate(3));

        let err = dispatcher
            .dispatch_chunks(&source(), chunks(4, 2), &PartitionOptions::default(), &DispatchContext::default())
            .await
            .unwrap_err();

        assert_eq!(err.status_code().as_u16(), 400);
        assert_eq!(err.to_string(), "bad chunk");
    }

    #[tokio::test]
    async fn test_transient_chunk_failure_is_retried() {
        let backend = Arc::new(ScriptedBackend::new().failing(
            1,
            PartitionError::Remote {
                status: 500,
                detail: "flaky".into(),
            },
        ));
        let dispatcher = dispatcher(Arc::new(MockEngine::returning(vec![])), backend.clone(), RetryPolicy::immediate(3));

        let merged = dispatcher
            .dispatch_chunks(&source(), chunks(3, 2), &PartitionOptions::default(), &DispatchContext::default())
            .await
            .unwrap();

        assert_eq!(merged.len(), 6);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_small_pdf_goes_straight_to_engine() {
        let engine = Arc::new(MockEngine::returning(vec![
            ElementRecord::new("Title", "t", "Hello").with_page_number(2),
        ]));
        let backend = Arc::new(ScriptedBackend::new());
        let dispatcher = FanOutDispatcher::new(
            engine.clone(),
            backend.clone(),
            PageSplitter::new(3).unwrap(),
            RetryPolicy::immediate(1),
            3,
        );

        let pdf = PdfDocument::load(&fixtures::pdf_with_pages(2)).unwrap();
        let elements = dispatcher
            .run(&source(), pdf, &PartitionOptions::default(), &DispatchContext::default())
            .await
            .unwrap();

        assert_eq!(engine.call_count(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(elements[0].page_number(), Some(2));
    }

    /// Reports one element per page, five on the page of a one-page chunk
    struct PageCountingBackend;

    #[async_trait]
    impl ChunkBackend for PageCountingBackend {
        fn name(&self) -> &'static str {
            "page-counting"
        }

        async fn partition_chunk(
            &self,
            input: &PartitionInput,
            _options: &PartitionOptions,
            _context: &DispatchContext,
        ) -> Result<Vec<ElementRecord>, PartitionError> {
            let pages = PdfDocument::load(&input.data)?.page_count() as u64;
            if pages == 1 {
                return Ok((0..5)
                    .map(|i| ElementRecord::new("NarrativeText", format!("last-{}", i), "").with_page_number(1))
                    .collect());
            }
            Ok((1..=pages)
                .map(|page| ElementRecord::new("Title", format!("p{}", page), "").with_page_number(page))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_ten_pages_by_three_rebases_last_chunk() {
        let dispatcher = FanOutDispatcher::new(
            Arc::new(MockEngine::returning(vec![])),
            Arc::new(PageCountingBackend),
            PageSplitter::new(3).unwrap(),
            RetryPolicy::immediate(1),
            3,
        );

        let pdf = PdfDocument::load(&fixtures::pdf_with_pages(10)).unwrap();
        let elements = dispatcher
            .run(&source(), pdf, &PartitionOptions::default(), &DispatchContext::default())
            .await
            .unwrap();

        assert_eq!(elements.len(), 14);
        let on_last_page = elements.iter().filter(|e| e.page_number() == Some(10)).count();
        assert_eq!(on_last_page, 5);

        let pages: Vec<_> = elements.iter().filter_map(|e| e.page_number()).collect();
        assert!(pages.windows(2).all(|w| w[0] <= w[1]));
    }

    fn remote_chunk() -> Vec<PageChunk> {
        vec![PageChunk {
            index: 0,
            starting_page_offset: 2,
            page_count: 1,
            data: Bytes::from_static(b"%PDF-1.5"),
        }]
    }

    fn keyed(key: &str) -> DispatchContext {
        DispatchContext {
            api_key: Some(key.to_string()),
        }
    }

    async fn remote_dispatcher() -> (FanOutDispatcher, crate::dispatch::backend::sibling::Calls) {
        let (url, calls) = crate::dispatch::backend::sibling::serve().await;
        let backend = Arc::new(RemoteBackend::new(&url, Duration::from_secs(5)).unwrap());
        let dispatcher = dispatcher(Arc::new(MockEngine::returning(vec![])), backend, RetryPolicy::immediate(3));
        (dispatcher, calls)
    }

    #[tokio::test]
    async fn test_remote_unavailable_is_retried() {
        let (dispatcher, calls) = remote_dispatcher().await;

        let merged = dispatcher
            .dispatch_chunks(&source(), remote_chunk(), &PartitionOptions::default(), &keyed("flaky"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "flaky");
        assert_eq!(merged[0].page_number(), Some(3));
    }

    #[tokio::test]
    async fn test_remote_client_error_is_not_retried() {
        let (dispatcher, calls) = remote_dispatcher().await;

        let err = dispatcher
            .dispatch_chunks(&source(), remote_chunk(), &PartitionOptions::default(), &keyed("reject"))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.status_code().as_u16(), 400);
        assert_eq!(err.to_string(), "Chunk rejected");
    }

    #[tokio::test]
    async fn test_remote_unavailable_gives_up_after_max_attempts() {
        let (dispatcher, calls) = remote_dispatcher().await;

        let err = dispatcher
            .dispatch_chunks(&source(), remote_chunk(), &PartitionOptions::default(), &keyed("busy"))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.status_code().as_u16(), 503);
    }
}
