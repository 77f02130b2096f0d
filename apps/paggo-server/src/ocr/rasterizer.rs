//! Page Rasterizer
//!
//! Renders PDF page ranges to PNG files with poppler's `pdftoppm` so scanned
//! documents can go through OCR.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use uuid::Uuid;

use super::types::{run_bounded, ExtractionError, PageBatch};

/// Renders PDF pages to image files
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `batch`; one image path per page, ascending.
    ///
    /// The caller owns the returned files and must delete them.
    async fn rasterize(
        &self,
        source_path: &Path,
        batch: PageBatch,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, ExtractionError>;
}

/// `pdftoppm` based rasterizer
pub struct PdftoppmRasterizer {
    binary: String,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl PdftoppmRasterizer {
    pub fn new(binary: impl Into<String>, temp_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            temp_dir: temp_dir.into(),
            timeout,
        }
    }

    /// Output prefix unique to one invocation
    fn unique_prefix(&self) -> PathBuf {
        self.temp_dir.join(format!(
            "page_{}_{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        ))
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn rasterize(
        &self,
        source_path: &Path,
        batch: PageBatch,
        dpi: u32,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        let prefix = self.unique_prefix();

        tracing::debug!(
            source = %source_path.display(),
            first = batch.first,
            last = batch.last,
            dpi,
            "Rasterizing PDF pages"
        );

        let output = run_bounded("pdftoppm", self.timeout, async {
            Command::new(&self.binary)
                .arg("-png")
                .arg("-r")
                .arg(dpi.to_string())
                .arg("-f")
                .arg(batch.first.to_string())
                .arg("-l")
                .arg(batch.last.to_string())
                .arg(source_path)
                .arg(&prefix)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| ExtractionError::Rasterization(format!("Failed to run pdftoppm: {}", e)))
        })
        .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                // A killed pdftoppm may have written some pages already.
                remove_outputs(&prefix, batch).await;
                return Err(e);
            }
        };

        if !output.status.success() {
            remove_outputs(&prefix, batch).await;
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Rasterization(format!(
                "pdftoppm failed: {}",
                stderr.trim()
            )));
        }

        let mut images = Vec::with_capacity(batch.page_count() as usize);
        for page in batch.pages() {
            match resolve_page_output(&prefix, page).await {
                Some(path) => images.push(path),
                None => {
                    remove_outputs(&prefix, batch).await;
                    return Err(ExtractionError::Rasterization(format!(
                        "pdftoppm produced no image for page {} (prefix {})",
                        page,
                        prefix.display()
                    )));
                }
            }
        }

        Ok(images)
    }
}

/// Filenames `pdftoppm` may use for `page`: unpadded first, then zero-padded
/// (the pad width follows the document's page count digits).
pub(crate) fn candidate_paths(prefix: &Path, page: u32) -> Vec<PathBuf> {
    let stem = prefix.to_string_lossy();
    let unpadded = page.to_string();
    let mut names = vec![format!("{}-{}.png", stem, unpadded)];
    for width in unpadded.len().max(2)..=6 {
        let padded = format!("{}-{:0width$}.png", stem, page, width = width);
        if !names.contains(&padded) {
            names.push(padded);
        }
    }
    names.into_iter().map(PathBuf::from).collect()
}

/// Resolve whichever candidate file actually exists.
pub(crate) async fn resolve_page_output(prefix: &Path, page: u32) -> Option<PathBuf> {
    for candidate in candidate_paths(prefix, page) {
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

async fn remove_outputs(prefix: &Path, batch: PageBatch) {
    for page in batch.pages() {
        for candidate in candidate_paths(prefix, page) {
            let _ = tokio::fs::remove_file(&candidate).await;
        }
    }
}

/// Raster files of one batch, consumed in page order
///
/// A file leaves the guard only after it is deleted. Whatever is still held
/// when this is dropped (an OCR failure or a cancelled request mid-batch) is
/// deleted synchronously.
pub struct TempRasters {
    pending: VecDeque<PathBuf>,
}

impl TempRasters {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            pending: paths.into(),
        }
    }

    /// The next image, still owned by the guard
    pub fn front(&self) -> Option<&Path> {
        self.pending.front().map(PathBuf::as_path)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Delete the front image, then release it from the guard.
    pub async fn discard_front(&mut self) {
        let Some(path) = self.pending.front() else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), "Failed to delete raster file: {}", e);
        }
        self.pending.pop_front();
    }
}

impl Drop for TempRasters {
    fn drop(&mut self) {
        for path in self.pending.drain(..) {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_candidate_paths() {
        let prefix = Path::new("/tmp/page_1");
        let names: Vec<String> = candidate_paths(prefix, 3)
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        assert_eq!(names[0], "/tmp/page_1-3.png");
        assert_eq!(names[1], "/tmp/page_1-03.png");
        assert!(names.contains(&"/tmp/page_1-003.png".to_string()));

        let names = candidate_paths(prefix, 12);
        assert_eq!(names[0], PathBuf::from("/tmp/page_1-12.png"));
        assert_eq!(names[1], PathBuf::from("/tmp/page_1-012.png"));
    }

    #[tokio::test]
    async fn test_resolve_padded_and_unpadded_outputs() {
        let dir = TempDir::new().unwrap();
        let prefix = dir.path().join("page_x");

        std::fs::write(dir.path().join("page_x-1.png"), b"png").unwrap();
        std::fs::write(dir.path().join("page_x-02.png"), b"png").unwrap();

        assert_eq!(
            resolve_page_output(&prefix, 1).await,
            Some(dir.path().join("page_x-1.png"))
        );
        assert_eq!(
            resolve_page_output(&prefix, 2).await,
            Some(dir.path().join("page_x-02.png"))
        );
        assert_eq!(resolve_page_output(&prefix, 3).await, None);
    }

    #[tokio::test]
    async fn test_temp_rasters_drop_removes_pending() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        let c = dir.path().join("c.png");
        for path in [&a, &b, &c] {
            std::fs::write(path, b"png").unwrap();
        }

        let mut rasters = TempRasters::new(vec![a.clone(), b.clone(), c.clone()]);
        rasters.discard_front().await;
        assert!(!a.exists());
        assert_eq!(rasters.front(), Some(b.as_path()));
        assert_eq!(rasters.remaining(), 2);

        // b is in use but still guarded
        drop(rasters);
        assert!(!b.exists());
        assert!(!c.exists());
    }

    #[tokio::test]
    async fn test_missing_pdftoppm_is_rasterization_error() {
        let dir = TempDir::new().unwrap();
        let rasterizer = PdftoppmRasterizer::new(
            "/nonexistent/pdftoppm",
            dir.path(),
            Duration::from_secs(5),
        );

        let result = rasterizer
            .rasterize(&dir.path().join("in.pdf"), PageBatch::new(1, 1), 150)
            .await;
        assert!(matches!(result, Err(ExtractionError::Rasterization(_))));
    }
}
