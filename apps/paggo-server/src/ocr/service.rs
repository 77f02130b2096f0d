//! Extraction Orchestrator
//!
//! Picks the extraction path for a document (PDF text layer, rasterized OCR
//! or direct image OCR), batches large PDFs and normalizes the output.

use std::path::Path;
use std::sync::Arc;

use super::{
    provider::OcrEngine,
    rasterizer::{PageRasterizer, TempRasters},
    sniff::{self, MediaKind},
    text_layer::TextLayerReader,
    types::{
        ExtractionError, ExtractionMeta, ExtractionMethod, ExtractionRequest, ExtractionResult,
        PageBatch,
    },
};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Trimmed text-layer length below which a PDF counts as scanned
    pub min_direct_text_chars: usize,
    /// Pages per text-layer call
    pub text_batch_pages: u32,
    /// Pages scanned for a text layer at most
    pub text_max_pages: u32,
    /// Pages per rasterizer call
    pub raster_batch_pages: u32,
    /// Pages OCR'd at most; the rest is reported as truncated
    pub raster_max_pages: u32,
    /// Rasterization resolution
    pub dpi: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_direct_text_chars: 80,
            text_batch_pages: 10,
            text_max_pages: 200,
            raster_batch_pages: 5,
            raster_max_pages: 30,
            dpi: 200,
        }
    }
}

pub fn page_marker(page: u32) -> String {
    format!("[[PAGE {}]]", page)
}

pub fn page_range_marker(batch: PageBatch) -> String {
    format!("[[PAGES {}-{}]]", batch.first, batch.last)
}

/// Text layer outcome, before the threshold decision
struct DirectText {
    text: String,
    /// Characters of trimmed page text, markers excluded. Summed over the
    /// trimmed batches; this only differs from trimming the joined text by
    /// whitespace between batches, which never counts either way.
    content_chars: usize,
    total_pages: u32,
    scanned_pages: u32,
}

/// Extraction orchestrator
///
/// Engine, text layer and rasterizer are injected so the strategy is fixed
/// per instance.
pub struct ExtractionOrchestrator {
    config: ExtractionConfig,
    engine: Arc<dyn OcrEngine>,
    text_layer: Arc<dyn TextLayerReader>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl ExtractionOrchestrator {
    pub fn new(
        config: ExtractionConfig,
        engine: Arc<dyn OcrEngine>,
        text_layer: Arc<dyn TextLayerReader>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            config,
            engine,
            text_layer,
            rasterizer,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract text from an uploaded document
    pub async fn extract(
        &self,
        request: &ExtractionRequest<'_>,
    ) -> Result<ExtractionResult, ExtractionError> {
        let mime_type = self.resolve_mime_type(request).await;
        let path = request.absolute_path;

        match MediaKind::classify(&mime_type) {
            Some(MediaKind::Pdf) => self.extract_pdf(path).await,
            Some(MediaKind::Image) => self.extract_image(path).await,
            None => Err(ExtractionError::UnsupportedMedia(mime_type)),
        }
    }

    /// Sniffed type wins over the declared one.
    ///
    /// Without a buffer the stored file's header is sniffed instead, so an
    /// upload resolves to the same type whether or not its bytes were forwarded.
    pub async fn resolve_mime_type(&self, request: &ExtractionRequest<'_>) -> String {
        let sniffed = match request.buffer {
            Some(buffer) => sniff::sniff_bytes(buffer),
            None => match sniff::sniff_file(request.absolute_path).await {
                Ok(sniffed) => sniffed,
                Err(e) => {
                    tracing::debug!(
                        path = %request.absolute_path.display(),
                        "Could not sniff stored file: {}",
                        e
                    );
                    None
                }
            },
        };

        match (sniffed, request.declared_mime_type) {
            (Some(sniffed), Some(declared)) => {
                if sniff::normalize(declared) != sniffed {
                    tracing::debug!(declared, sniffed, "Declared MIME type overridden by content");
                }
                sniffed.to_string()
            }
            (Some(sniffed), None) => sniffed.to_string(),
            (None, Some(declared)) => sniff::normalize(declared),
            (None, None) => "application/octet-stream".to_string(),
        }
    }

    async fn extract_image(&self, path: &Path) -> Result<ExtractionResult, ExtractionError> {
        let text = self.engine.recognize(path).await?;
        Ok(ExtractionResult {
            text,
            method: ExtractionMethod::ImageOcr,
            meta: None,
        })
    }

    async fn extract_pdf(&self, path: &Path) -> Result<ExtractionResult, ExtractionError> {
        let known_total = match self.read_text_layer(path).await {
            Ok(direct) => {
                if direct.content_chars >= self.config.min_direct_text_chars {
                    tracing::info!(
                        path = %path.display(),
                        chars = direct.content_chars,
                        pages = direct.scanned_pages,
                        "Using PDF text layer"
                    );
                    return Ok(ExtractionResult {
                        text: direct.text,
                        method: ExtractionMethod::DirectText,
                        meta: Some(ExtractionMeta::new(direct.total_pages, direct.scanned_pages)),
                    });
                }
                tracing::info!(
                    path = %path.display(),
                    chars = direct.content_chars,
                    threshold = self.config.min_direct_text_chars,
                    "Text layer below threshold, falling back to raster OCR"
                );
                Some(direct.total_pages)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Text layer extraction failed, falling back to raster OCR: {}",
                    e
                );
                None
            }
        };

        self.raster_ocr(path, known_total).await
    }

    /// Concatenated, trimmed text layer of the first `text_max_pages` pages.
    async fn read_text_layer(&self, path: &Path) -> Result<DirectText, ExtractionError> {
        let total_pages = self.text_layer.page_count(path).await?;
        let scanned_pages = total_pages.min(self.config.text_max_pages);

        let mut sections = Vec::new();
        let mut content_chars = 0;
        for batch in PageBatch::split(scanned_pages, self.config.text_batch_pages) {
            let text = self.text_layer.extract_text(path, batch).await?;
            let text = text.trim();
            if !text.is_empty() {
                content_chars += text.chars().count();
                sections.push(format!("{}\n{}", page_range_marker(batch), text));
            }
        }

        Ok(DirectText {
            text: sections.join("\n\n"),
            content_chars,
            total_pages,
            scanned_pages,
        })
    }

    async fn raster_ocr(
        &self,
        path: &Path,
        known_total: Option<u32>,
    ) -> Result<ExtractionResult, ExtractionError> {
        let total_pages = match known_total {
            Some(total) => total,
            None => self.text_layer.page_count(path).await?,
        };
        let processed_pages = total_pages.min(self.config.raster_max_pages);

        let mut sections = Vec::with_capacity(processed_pages as usize);
        for batch in PageBatch::split(processed_pages, self.config.raster_batch_pages) {
            let images = self.rasterizer.rasterize(path, batch, self.config.dpi).await?;
            let mut rasters = TempRasters::new(images);

            if rasters.remaining() != batch.page_count() as usize {
                return Err(ExtractionError::Rasterization(format!(
                    "expected {} images for pages {}-{}, got {}",
                    batch.page_count(),
                    batch.first,
                    batch.last,
                    rasters.remaining()
                )));
            }

            for page in batch.pages() {
                let Some(image) = rasters.front().map(Path::to_path_buf) else {
                    break;
                };
                let recognized = self.engine.recognize(&image).await;
                rasters.discard_front().await;

                let text = recognized?;
                sections.push(format!("{}\n{}", page_marker(page), text.trim()));
            }

            tracing::debug!(
                path = %path.display(),
                first = batch.first,
                last = batch.last,
                "OCR batch complete"
            );
        }

        let meta = ExtractionMeta::new(total_pages, processed_pages);
        if meta.truncated {
            tracing::info!(
                path = %path.display(),
                total_pages,
                processed_pages,
                "PDF exceeds OCR page limit, result truncated"
            );
        }

        Ok(ExtractionResult {
            text: sections.join("\n\n"),
            method: ExtractionMethod::RasterOcr,
            meta: Some(meta),
        })
    }
}
