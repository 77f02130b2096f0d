//! PDF text layer access via MuPDF

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use mupdf::{Document, TextPageOptions};

use super::types::{run_blocking_bounded, ExtractionError, PageBatch};

/// Reads the embedded text layer of a PDF without rendering pixels
#[async_trait]
pub trait TextLayerReader: Send + Sync {
    /// Number of pages, from document metadata only
    async fn page_count(&self, pdf_path: &Path) -> Result<u32, ExtractionError>;

    /// Plain text of the pages in `batch`, pages separated by newlines
    async fn extract_text(&self, pdf_path: &Path, batch: PageBatch) -> Result<String, ExtractionError>;
}

/// MuPDF-backed text layer reader
///
/// Every call opens a fresh document on the blocking pool; MuPDF contexts
/// are not shared across threads.
pub struct MupdfTextLayer {
    timeout: Duration,
}

impl MupdfTextLayer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn mupdf_err(e: mupdf::Error) -> ExtractionError {
    ExtractionError::Engine(format!("MuPDF: {}", e))
}

fn open(path: &str) -> Result<Document, ExtractionError> {
    Document::open(path).map_err(mupdf_err)
}

#[async_trait]
impl TextLayerReader for MupdfTextLayer {
    async fn page_count(&self, pdf_path: &Path) -> Result<u32, ExtractionError> {
        let path = pdf_path.to_string_lossy().into_owned();
        run_blocking_bounded("PDF page count", self.timeout, move || {
            let doc = open(&path)?;
            let count = doc.page_count().map_err(mupdf_err)?;
            Ok(count.max(0) as u32)
        })
        .await
    }

    async fn extract_text(&self, pdf_path: &Path, batch: PageBatch) -> Result<String, ExtractionError> {
        let path = pdf_path.to_string_lossy().into_owned();
        run_blocking_bounded("PDF text extraction", self.timeout, move || {
            let doc = open(&path)?;
            let mut pages = Vec::with_capacity(batch.page_count() as usize);
            for page_no in batch.pages() {
                let page = doc.load_page(page_no as i32 - 1).map_err(mupdf_err)?;
                let text_page = page
                    .to_text_page(TextPageOptions::empty())
                    .map_err(mupdf_err)?;
                pages.push(text_page.to_text().map_err(mupdf_err)?);
            }
            Ok(pages.join("\n"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreadable_pdf_is_engine_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.pdf");

        let reader = MupdfTextLayer::new(Duration::from_secs(5));
        let result = reader.page_count(&path).await;
        assert!(matches!(result, Err(ExtractionError::Engine(_))));
    }
}
