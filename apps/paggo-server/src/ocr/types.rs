//! OCR Types
//!
//! Value types shared by the extraction pipeline: requests, results,
//! page batches and the error taxonomy.

use std::future::Future;
use std::ops::RangeInclusive;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which engine produced the returned text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionMethod {
    /// Embedded PDF text layer
    DirectText,
    /// PDF pages rendered to images, then OCR'd
    RasterOcr,
    /// Uploaded image OCR'd directly
    ImageOcr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectText => "DIRECT_TEXT",
            Self::RasterOcr => "RASTER_OCR",
            Self::ImageOcr => "IMAGE_OCR",
        }
    }
}

impl FromStr for ExtractionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DIRECT_TEXT" => Ok(Self::DirectText),
            "RASTER_OCR" => Ok(Self::RasterOcr),
            "IMAGE_OCR" => Ok(Self::ImageOcr),
            other => Err(format!("unknown extraction method: {}", other)),
        }
    }
}

/// Page accounting for PDF results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMeta {
    pub total_pages: u32,
    pub processed_pages: u32,
    pub truncated: bool,
}

impl ExtractionMeta {
    /// Build page accounting; `truncated` is derived, never passed in.
    pub fn new(total_pages: u32, processed_pages: u32) -> Self {
        Self {
            total_pages,
            processed_pages,
            truncated: total_pages > 0 && processed_pages < total_pages,
        }
    }
}

/// Normalized extraction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub text: String,
    pub method: ExtractionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ExtractionMeta>,
}

/// Input descriptor for one extraction call
///
/// Engines may ignore `buffer` and always re-read from `absolute_path`.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionRequest<'a> {
    pub absolute_path: &'a Path,
    pub declared_mime_type: Option<&'a str>,
    pub buffer: Option<&'a [u8]>,
}

impl<'a> ExtractionRequest<'a> {
    pub fn from_path(absolute_path: &'a Path) -> Self {
        Self {
            absolute_path,
            declared_mime_type: None,
            buffer: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: &'a str) -> Self {
        self.declared_mime_type = Some(mime_type);
        self
    }

    pub fn with_buffer(mut self, buffer: &'a [u8]) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

/// Contiguous inclusive page range (1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBatch {
    pub first: u32,
    pub last: u32,
}

impl PageBatch {
    pub fn new(first: u32, last: u32) -> Self {
        debug_assert!(first >= 1 && first <= last);
        Self { first, last }
    }

    pub fn page_count(&self) -> u32 {
        self.last - self.first + 1
    }

    pub fn pages(&self) -> RangeInclusive<u32> {
        self.first..=self.last
    }

    /// Split pages `1..=page_count` into ascending batches of at most `batch_size`.
    pub fn split(page_count: u32, batch_size: u32) -> Vec<PageBatch> {
        let size = batch_size.max(1);
        let mut batches = Vec::new();
        let mut first = 1;
        while first <= page_count {
            let last = first.saturating_add(size - 1).min(page_count);
            batches.push(PageBatch::new(first, last));
            first = last + 1;
        }
        batches
    }
}

/// Extraction error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Unsupported media type for OCR: {0}")]
    UnsupportedMedia(String),

    #[error("Rasterization failed: {0}")]
    Rasterization(String),

    #[error("OCR engine failed: {0}")]
    Engine(String),

    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    #[error("OCR engine not available: {0}")]
    EngineUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Await `fut`, failing with [`ExtractionError::Timeout`] once `limit` elapses.
pub(crate) async fn run_bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, ExtractionError>
where
    F: Future<Output = Result<T, ExtractionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ExtractionError::Timeout { operation, limit }),
    }
}

/// Run CPU-bound work on the blocking pool under a time limit.
///
/// A timed-out closure keeps running on its thread; only the caller is released.
pub(crate) async fn run_blocking_bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    work: F,
) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractionError> + Send + 'static,
{
    run_bounded(operation, limit, async move {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| ExtractionError::Engine(format!("Task join error: {}", e)))?
    })
    .await
}
