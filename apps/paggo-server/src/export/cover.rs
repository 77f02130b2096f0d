//! Rendering the original upload as the export's first page

use std::path::Path;
use std::time::Duration;

use image::{DynamicImage, RgbImage};
use mupdf::{Colorspace, Document, Matrix};

use super::appendix::CoverPage;
use crate::ocr::sniff::{self, MediaKind};
use crate::ocr::{run_blocking_bounded, ExtractionError};

/// PDF first pages are rendered at this resolution
const COVER_DPI: f32 = 150.0;

/// Longest side of an embedded cover image, in pixels
const COVER_MAX_SIDE: u32 = 2000;

/// Render the original document. Failures become a notice page so the
/// export itself still succeeds.
pub async fn render_cover(
    path: &Path,
    mime_type: &str,
    original_name: &str,
    timeout: Duration,
) -> CoverPage {
    let is_pdf = MediaKind::classify(mime_type) == Some(MediaKind::Pdf)
        || original_name.to_ascii_lowercase().ends_with(".pdf");

    let rendered = if is_pdf {
        render_pdf_first_page(path, timeout).await
    } else if sniff::normalize(mime_type).starts_with("image/") {
        decode_image(path, timeout).await
    } else {
        return CoverPage::Notice(format!(
            "Original file cannot be rendered as an image or PDF:\n{}\n({})",
            original_name, mime_type
        ));
    };

    match rendered {
        Ok(image) => CoverPage::Image(image),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Failed to render original for export: {}", e);
            CoverPage::Notice(format!("Failed to insert the original into the PDF.\n{}", e))
        }
    }
}

fn mupdf_err(e: mupdf::Error) -> ExtractionError {
    ExtractionError::Rasterization(format!("MuPDF: {}", e))
}

async fn render_pdf_first_page(path: &Path, timeout: Duration) -> Result<RgbImage, ExtractionError> {
    let path = path.to_string_lossy().into_owned();
    run_blocking_bounded("PDF cover render", timeout, move || {
        let doc = Document::open(&path).map_err(mupdf_err)?;
        let page = doc.load_page(0).map_err(mupdf_err)?;

        let scale = COVER_DPI / 72.0;
        let matrix = Matrix::new_scale(scale, scale);
        let pixmap = page
            .to_pixmap(&matrix, &Colorspace::device_rgb(), false, true)
            .map_err(mupdf_err)?;

        let width = pixmap.width() as u32;
        let height = pixmap.height() as u32;
        let samples = pixmap.samples();
        let n = (pixmap.n() as usize).max(1);

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for pixel in 0..(width as usize * height as usize) {
            let offset = pixel * n;
            let r = samples.get(offset).copied().unwrap_or(255);
            let g = samples.get(offset + 1).copied().unwrap_or(r);
            let b = samples.get(offset + 2).copied().unwrap_or(r);
            rgb.extend_from_slice(&[r, g, b]);
        }

        RgbImage::from_raw(width, height, rgb)
            .map(|image| fit(DynamicImage::ImageRgb8(image)))
            .ok_or_else(|| ExtractionError::Rasterization("pixmap size mismatch".to_string()))
    })
    .await
}

async fn decode_image(path: &Path, timeout: Duration) -> Result<RgbImage, ExtractionError> {
    let bytes = tokio::fs::read(path).await?;
    run_blocking_bounded("image decode", timeout, move || {
        image::load_from_memory(&bytes)
            .map(fit)
            .map_err(|e| ExtractionError::UnsupportedMedia(format!("undecodable image: {}", e)))
    })
    .await
}

fn fit(image: DynamicImage) -> RgbImage {
    if image.width().max(image.height()) > COVER_MAX_SIDE {
        image.thumbnail(COVER_MAX_SIDE, COVER_MAX_SIDE).to_rgb8()
    } else {
        image.to_rgb8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[tokio::test]
    async fn test_image_cover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nota.png");
        write_png(&path, 30, 12);

        let cover = render_cover(&path, "image/png", "nota.png", Duration::from_secs(5)).await;
        assert!(matches!(cover, CoverPage::Image(ref img) if img.dimensions() == (30, 12)));
    }

    #[tokio::test]
    async fn test_large_images_are_downscaled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scan.png");
        write_png(&path, 4000, 1000);

        let cover = render_cover(&path, "image/png", "scan.png", Duration::from_secs(5)).await;
        assert!(matches!(cover, CoverPage::Image(ref img) if img.width() == COVER_MAX_SIDE));
    }

    #[tokio::test]
    async fn test_unrenderable_originals_become_notices() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"plain text").unwrap();

        let cover = render_cover(&path, "text/plain", "notes.txt", Duration::from_secs(5)).await;
        assert!(matches!(cover, CoverPage::Notice(ref t) if t.contains("notes.txt")));

        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"\x89PNG not really").unwrap();
        let cover = render_cover(&broken, "image/png", "broken.png", Duration::from_secs(5)).await;
        assert!(matches!(cover, CoverPage::Notice(ref t) if t.starts_with("Failed to insert")));
    }
}
