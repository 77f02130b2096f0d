//! OCR Engines
//!
//! Defines the engine trait and the two tesseract backends: the native
//! command-line binary and the in-process library binding.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::types::{run_bounded, ExtractionError};

/// OCR engine backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OcrEngineKind {
    /// `tesseract` executable, one process per image
    Native,
    /// libtesseract linked into this process
    InProcess,
}

impl Default for OcrEngineKind {
    fn default() -> Self {
        Self::Native
    }
}

impl FromStr for OcrEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "cli" => Ok(Self::Native),
            "in-process" | "inprocess" | "library" => Ok(Self::InProcess),
            other => Err(format!("unknown OCR engine: {}", other)),
        }
    }
}

/// OCR engine trait
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Get the engine kind
    fn kind(&self) -> OcrEngineKind;

    /// Recognize the text in an image file
    async fn recognize(&self, image_path: &Path) -> Result<String, ExtractionError>;
}

/// Settings shared by both engine backends
#[derive(Debug, Clone)]
pub struct OcrEngineSettings {
    pub kind: OcrEngineKind,
    /// Tesseract language hint, e.g. `eng` or `por+eng`
    pub language: String,
    /// Executable used by the native engine
    pub tesseract_cmd: String,
    /// Optional tessdata directory for the in-process engine
    pub tessdata_dir: Option<String>,
    /// Upper bound for one image
    pub timeout: Duration,
}

impl Default for OcrEngineSettings {
    fn default() -> Self {
        Self {
            kind: OcrEngineKind::Native,
            language: "eng".to_string(),
            tesseract_cmd: "tesseract".to_string(),
            tessdata_dir: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Build the configured engine.
pub fn build_engine(settings: &OcrEngineSettings) -> Result<Arc<dyn OcrEngine>, ExtractionError> {
    match settings.kind {
        OcrEngineKind::Native => Ok(Arc::new(TesseractCliEngine::new(settings))),
        #[cfg(feature = "ocr-tesseract")]
        OcrEngineKind::InProcess => Ok(Arc::new(TesseractLibEngine::new(settings))),
        #[cfg(not(feature = "ocr-tesseract"))]
        OcrEngineKind::InProcess => Err(ExtractionError::EngineUnavailable(
            "in-process engine requires the `ocr-tesseract` feature".to_string(),
        )),
    }
}

/// Tesseract command-line engine
pub struct TesseractCliEngine {
    binary: String,
    language: String,
    timeout: Duration,
}

impl TesseractCliEngine {
    pub fn new(settings: &OcrEngineSettings) -> Self {
        Self {
            binary: settings.tesseract_cmd.clone(),
            language: settings.language.clone(),
            timeout: settings.timeout,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractCliEngine {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::Native
    }

    async fn recognize(&self, image_path: &Path) -> Result<String, ExtractionError> {
        let output = run_bounded("tesseract", self.timeout, async {
            Command::new(&self.binary)
                .arg(image_path)
                .arg("stdout")
                .arg("-l")
                .arg(&self.language)
                .arg("--psm")
                .arg("3")
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| ExtractionError::Engine(format!("Failed to run tesseract: {}", e)))
        })
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Engine(format!(
                "Tesseract failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// In-process tesseract engine
///
/// A recognition worker is created per call and dropped when the call
/// finishes, which releases the native handle on success and on failure.
#[cfg(feature = "ocr-tesseract")]
pub struct TesseractLibEngine {
    language: String,
    tessdata_dir: Option<String>,
    timeout: Duration,
}

#[cfg(feature = "ocr-tesseract")]
impl TesseractLibEngine {
    pub fn new(settings: &OcrEngineSettings) -> Self {
        Self {
            language: settings.language.clone(),
            tessdata_dir: settings.tessdata_dir.clone(),
            timeout: settings.timeout,
        }
    }
}

#[cfg(feature = "ocr-tesseract")]
#[async_trait]
impl OcrEngine for TesseractLibEngine {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::InProcess
    }

    async fn recognize(&self, image_path: &Path) -> Result<String, ExtractionError> {
        use super::types::run_blocking_bounded;

        let path = image_path.to_string_lossy().into_owned();
        let language = self.language.clone();
        let tessdata_dir = self.tessdata_dir.clone();

        let text = run_blocking_bounded("in-process OCR", self.timeout, move || {
            let engine_err = |stage: &str, e: String| {
                ExtractionError::Engine(format!("tesseract {}: {}", stage, e))
            };

            let mut worker = tesseract::Tesseract::new(tessdata_dir.as_deref(), Some(&language))
                .map_err(|e| engine_err("init", e.to_string()))?
                .set_image(&path)
                .map_err(|e| engine_err("set_image", e.to_string()))?
                .recognize()
                .map_err(|e| engine_err("recognize", e.to_string()))?;

            worker
                .get_text()
                .map_err(|e| engine_err("get_text", e.to_string()))
        })
        .await?;

        Ok(text.trim().to_string())
    }
}
