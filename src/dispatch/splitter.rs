//! PDF page splitting
//!
//! Splits a multi-page PDF into contiguous, non-overlapping page chunks.
//! Chunk `k` covers pages `[k * size, min((k + 1) * size, page_count))` and
//! carries `k * size` as its starting page offset.

use std::collections::HashSet;
use std::ops::Range;

use bytes::Bytes;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use thiserror::Error;

use crate::engine::PartitionError;

/// Splitting failures
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("Chunk size must be a positive number of pages, got {0}")]
    InvalidChunkSize(usize),

    #[error("Failed to write pages {start}-{end}: {message}")]
    Write {
        start: usize,
        end: usize,
        message: String,
    },
}

impl From<SplitError> for PartitionError {
    fn from(err: SplitError) -> Self {
        PartitionError::Engine(err.to_string())
    }
}

/// A contiguous page range of the source document
#[derive(Debug, Clone)]
pub struct PageChunk {
    pub index: usize,
    /// Zero-based index of the chunk's first page in the source document
    pub starting_page_offset: usize,
    pub page_count: usize,
    pub data: Bytes,
}

// ============================================================================
// Planning
// ============================================================================

/// Computes chunk boundaries for a page count
#[derive(Debug, Clone, Copy)]
pub struct PageSplitter {
    chunk_size: usize,
}

impl PageSplitter {
    pub fn new(chunk_size: usize) -> Result<Self, SplitError> {
        if chunk_size == 0 {
            return Err(SplitError::InvalidChunkSize(chunk_size));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Whether a document is large enough to be worth fanning out
    pub fn needs_split(&self, page_count: usize) -> bool {
        page_count > self.chunk_size
    }

    /// Zero-based page ranges, one per chunk, in document order
    pub fn plan(&self, page_count: usize) -> Vec<Range<usize>> {
        if !self.needs_split(page_count) {
            return vec![0..page_count];
        }

        (0..page_count)
            .step_by(self.chunk_size)
            .map(|start| start..(start + self.chunk_size).min(page_count))
            .collect()
    }

    /// Cut a loaded PDF into chunks following [`PageSplitter::plan`].
    ///
    /// CPU-bound; callers on the async runtime should use `spawn_blocking`.
    pub fn split(&self, pdf: &PdfDocument) -> Result<Vec<PageChunk>, SplitError> {
        self.plan(pdf.page_count())
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let data = pdf.extract(&range)?;
                Ok(PageChunk {
                    index,
                    starting_page_offset: range.start,
                    page_count: range.len(),
                    data: Bytes::from(data),
                })
            })
            .collect()
    }
}

// ============================================================================
// PDF access
// ============================================================================

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITED_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Deepest page tree walked when resolving inherited attributes
const MAX_TREE_DEPTH: usize = 64;

/// A parsed PDF, opened once per upload
#[derive(Debug, Clone)]
pub struct PdfDocument {
    doc: Document,
    /// Page object ids in document order
    pages: Vec<ObjectId>,
    page_set: HashSet<ObjectId>,
}

impl PdfDocument {
    /// Parse and validate a PDF.
    ///
    /// Encrypted documents are rejected as a client error; anything lopdf
    /// cannot read is reported as an invalid PDF.
    pub fn load(data: &[u8]) -> Result<Self, PartitionError> {
        let doc = Document::load_mem(data).map_err(|e| {
            let message = e.to_string().to_lowercase();
            if message.contains("encrypt") || message.contains("decrypt") {
                PartitionError::EncryptedFile
            } else {
                tracing::debug!("PDF rejected: {}", e);
                PartitionError::InvalidPdf
            }
        })?;

        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(PartitionError::EncryptedFile);
        }

        // get_pages() is keyed by 1-based page number, so values come out in order
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let page_set = pages.iter().copied().collect();

        Ok(Self { doc, pages, page_set })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serialize a standalone PDF holding only the pages in `range`.
    ///
    /// Only the objects reachable from the kept pages are copied, so the cost
    /// follows the size of the chunk rather than the whole document.
    /// References to pages outside the chunk (link targets, for instance) are
    /// left dangling and read back as null.
    pub fn extract(&self, range: &Range<usize>) -> Result<Vec<u8>, SplitError> {
        let write_error = |message: String| SplitError::Write {
            start: range.start,
            end: range.end,
            message,
        };

        let kept = self
            .pages
            .get(range.clone())
            .ok_or_else(|| write_error(format!("document has {} pages", self.pages.len())))?;

        let mut chunk = Document::with_version(self.doc.version.clone());
        chunk.max_id = self.doc.max_id;
        let pages_id = chunk.new_object_id();

        let mut visited: HashSet<ObjectId> = HashSet::new();
        let mut pending: Vec<ObjectId> = Vec::new();

        for &page_id in kept {
            let mut page = self.page_dictionary(page_id).map_err(write_error)?;
            page.set("Parent", pages_id);

            let page = Object::Dictionary(page);
            collect_references(&page, &mut pending);
            visited.insert(page_id);
            chunk.objects.insert(page_id, page);
        }

        while let Some(id) = pending.pop() {
            if !visited.insert(id) || self.page_set.contains(&id) {
                continue;
            }
            let Some(object) = self.doc.objects.get(&id) else {
                continue;
            };
            collect_references(object, &mut pending);
            chunk.objects.insert(id, object.clone());
        }

        let kids: Vec<Object> = kept.iter().map(|id| Object::Reference(*id)).collect();
        chunk.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => kept.len() as i64,
            }),
        );
        let catalog_id = chunk.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        chunk.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        chunk
            .save_to(&mut buffer)
            .map_err(|e| write_error(e.to_string()))?;

        Ok(buffer)
    }

    /// A page's own dictionary with inherited attributes copied in
    fn page_dictionary(&self, page_id: ObjectId) -> Result<Dictionary, String> {
        let mut page = self
            .doc
            .get_object(page_id)
            .and_then(|object| object.as_dict())
            .map_err(|e| format!("page {:?} unreadable: {}", page_id, e))?
            .clone();

        let mut parent = page.get(b"Parent").and_then(|p| p.as_reference()).ok();
        for _ in 0..MAX_TREE_DEPTH {
            let Some(node) = parent
                .and_then(|id| self.doc.get_object(id).ok())
                .and_then(|object| object.as_dict().ok())
            else {
                break;
            };

            for key in INHERITED_KEYS {
                if !page.has(key) {
                    if let Ok(value) = node.get(key) {
                        page.set(key.to_vec(), value.clone());
                    }
                }
            }
            parent = node.get(b"Parent").and_then(|p| p.as_reference()).ok();
        }

        Ok(page)
    }
}

/// Push every indirect reference inside `object`, except page tree parents
fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|item| collect_references(item, out)),
        Object::Dictionary(dict) => collect_dictionary_references(dict, out),
        Object::Stream(stream) => collect_dictionary_references(&stream.dict, out),
        _ => {}
    }
}

fn collect_dictionary_references(dict: &Dictionary, out: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            collect_references(value, out);
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        assert!(matches!(PageSplitter::new(0), Err(SplitError::InvalidChunkSize(0))));
    }

    #[test]
    fn test_plan_ten_pages_by_three() {
        let splitter = PageSplitter::new(3).unwrap();
        let plan = splitter.plan(10);

        assert_eq!(plan, vec![0..3, 3..6, 6..9, 9..10]);
        let offsets: Vec<_> = plan.iter().map(|r| r.start).collect();
        assert_eq!(offsets, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_plan_small_document_is_single_chunk() {
        let splitter = PageSplitter::new(5).unwrap();
        assert!(!splitter.needs_split(5));
        assert_eq!(splitter.plan(5), vec![0..5]);
        assert_eq!(splitter.plan(2), vec![0..2]);
    }

    #[test]
    fn test_plan_covers_every_page_once() {
        for chunk_size in 1..6 {
            let splitter = PageSplitter::new(chunk_size).unwrap();
            for pages in 0..20 {
                let covered: Vec<usize> = splitter.plan(pages).into_iter().flatten().collect();
                assert_eq!(covered, (0..pages).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_load_rejects_garbage() {
        let result = PdfDocument::load(b"definitely not a pdf");
        assert!(matches!(result, Err(PartitionError::InvalidPdf)));
    }

    #[test]
    fn test_split_real_pdf() {
        let data = fixtures::pdf_with_pages(5);
        let pdf = PdfDocument::load(&data).unwrap();
        assert_eq!(pdf.page_count(), 5);

        let chunks = PageSplitter::new(2).unwrap().split(&pdf).unwrap();
        assert_eq!(chunks.len(), 3);

        let pages: Vec<_> = chunks
            .iter()
            .map(|c| PdfDocument::load(&c.data).unwrap().page_count())
            .collect();
        assert_eq!(pages, vec![2, 2, 1]);
        assert_eq!(chunks[2].starting_page_offset, 4);
        assert_eq!(chunks[2].page_count, 1);
    }

    fn page_text(data: &[u8]) -> String {
        let doc = Document::load_mem(data).unwrap();
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
    }

    #[test]
    fn test_chunks_keep_their_own_pages() {
        let pdf = PdfDocument::load(&fixtures::pdf_with_pages(12)).unwrap();
        let chunks = PageSplitter::new(5).unwrap().split(&pdf).unwrap();

        assert!(page_text(&chunks[1].data).contains("Page 6"));
        assert!(page_text(&chunks[2].data).contains("Page 11"));

        // Inherited resources travel with the page
        let doc = Document::load_mem(&chunks[2].data).unwrap();
        let (_, page_id) = doc.get_pages().into_iter().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        assert!(page.has(b"Resources"));
        assert!(page.has(b"MediaBox"));
    }

    #[test]
    fn test_split_scales_with_chunk_size() {
        let data = fixtures::pdf_with_pages(400);
        let pdf = PdfDocument::load(&data).unwrap();

        let started = Instant::now();
        let chunks = PageSplitter::new(1).unwrap().split(&pdf).unwrap();
        let elapsed = started.elapsed();

        assert_eq!(chunks.len(), 400);
        assert!(elapsed < Duration::from_secs(5), "splitting 400 pages took {:?}", elapsed);

        // A one-page chunk carries one page's objects, not the whole file
        assert!(chunks[199].data.len() * 20 < data.len());
        assert!(page_text(&chunks[199].data).contains("Page 200"));
        assert_eq!(PdfDocument::load(&chunks[399].data).unwrap().page_count(), 1);
    }
}
