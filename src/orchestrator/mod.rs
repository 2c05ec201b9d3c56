//! Request orchestration
//!
//! Per uploaded file: prepare the upload, inspect PDFs, partition (directly
//! or through the fan-out dispatcher), clean the elements and render them.
//! Files are processed one after another; the first failure ends the batch.

mod files;

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;

use crate::admission::AdmissionPermit;
use crate::dispatch::{DispatchContext, FanOutDispatcher, PdfDocument};
use crate::engine::{metadata_keys, ElementRecord, PartitionEngine};
use crate::error::ApiError;
use crate::options::RequestParams;
use crate::response::ResponseAssembler;

pub use files::{basename, essence, gunzip, guess_mime, prepare_upload, resolve_mime, UploadedFile};

const PDF: &str = "application/pdf";

/// Strip fields clients must not see and stamp the logical filename
pub fn clean_elements(elements: &mut [ElementRecord], filename: &str, keep_coordinates: bool) {
    for element in elements.iter_mut() {
        element.set_filename(filename);
        if !keep_coordinates {
            element.remove_metadata(metadata_keys::COORDINATES);
        }
        element.remove_metadata(metadata_keys::LAST_MODIFIED);
        element.remove_metadata(metadata_keys::FILE_DIRECTORY);
        element.remove_metadata(metadata_keys::DETECTION_CLASS_PROB);
    }
}

/// Composes file preparation, partitioning and rendering
pub struct RequestOrchestrator {
    engine: Arc<dyn PartitionEngine>,
    /// Present when parallel mode is enabled
    dispatcher: Option<FanOutDispatcher>,
    /// `None` accepts every type
    allowed_mimetypes: Option<Vec<String>>,
    /// Cap on decompressed gzip uploads
    max_upload_bytes: usize,
}

impl RequestOrchestrator {
    pub fn new(
        engine: Arc<dyn PartitionEngine>,
        dispatcher: Option<FanOutDispatcher>,
        allowed_mimetypes: Option<Vec<String>>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            allowed_mimetypes,
            max_upload_bytes,
        }
    }

    pub fn parallel_enabled(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Partition one upload into cleaned elements
    pub async fn partition_upload(
        &self,
        file: UploadedFile,
        params: &RequestParams,
        context: &DispatchContext,
    ) -> Result<Vec<ElementRecord>, ApiError> {
        let file = if file.is_gzip() {
            let inner_type = params.gz_uncompressed_content_type.clone();
            let max_bytes = self.max_upload_bytes;
            tokio::task::spawn_blocking(move || gunzip(file, inner_type.as_deref(), max_bytes))
                .await
                .map_err(|e| ApiError::Internal(format!("Decompression task failed: {}", e)))??
        } else {
            file
        };
        let input = prepare_upload(file, self.allowed_mimetypes.as_deref())?;
        let options = &params.options;

        tracing::debug!(
            filename = %input.filename,
            content_type = ?input.content_type,
            size = input.data.len(),
            "Partitioning upload"
        );

        let mut elements = if input.content_type.as_deref() == Some(PDF) {
            let data = input.data.clone();
            let pdf = tokio::task::spawn_blocking(move || PdfDocument::load(&data))
                .await
                .map_err(|e| ApiError::Internal(format!("PDF inspection task failed: {}", e)))??;

            match &self.dispatcher {
                Some(dispatcher) => dispatcher.run(&input, pdf, options, context).await?,
                None => self.engine.partition(&input, options).await?,
            }
        } else {
            self.engine.partition(&input, options).await?
        };

        let display_name = basename(&input.filename).to_string();
        clean_elements(&mut elements, &display_name, options.coordinates);

        tracing::info!(
            filename = %display_name,
            elements = elements.len(),
            "Partitioned upload"
        );

        Ok(elements)
    }

    /// Partition and render one upload in the requested output format
    pub async fn render_upload(
        &self,
        file: UploadedFile,
        params: &RequestParams,
        context: &DispatchContext,
    ) -> Result<Bytes, ApiError> {
        let elements = self.partition_upload(file, params, context).await?;
        Ok(ResponseAssembler::new(params.output_format).render_file(&elements)?)
    }

    /// Process every file, then combine the results into one body
    pub async fn process_batch(
        &self,
        files: Vec<UploadedFile>,
        params: &RequestParams,
        context: &DispatchContext,
    ) -> Result<Bytes, ApiError> {
        let mut rendered = Vec::with_capacity(files.len());
        for file in files {
            rendered.push(self.render_upload(file, params, context).await?);
        }
        Ok(ResponseAssembler::new(params.output_format).combine(rendered)?)
    }

    /// Rendered payloads produced lazily, one file per poll.
    ///
    /// The admission permit travels with the stream and is released when the
    /// last file is done or the stream is dropped.
    pub fn payload_stream(
        self: Arc<Self>,
        files: Vec<UploadedFile>,
        params: RequestParams,
        context: DispatchContext,
        permit: AdmissionPermit,
    ) -> impl Stream<Item = Result<Bytes, ApiError>> + Send + 'static {
        let orchestrator = self;
        async_stream::try_stream! {
            let _permit = permit;
            let total = files.len();
            for (index, file) in files.into_iter().enumerate() {
                let filename = file.filename.clone();
                let rendered = match orchestrator.render_upload(file, &params, &context).await {
                    Ok(rendered) => rendered,
                    Err(err) => {
                        tracing::error!(
                            filename = %filename,
                            file = index + 1,
                            total,
                            "Streaming response aborted: {}",
                            err
                        );
                        Err(err)?
                    }
                };
                yield rendered;
            }
        }
    }
}
