//! OCR Module
//!
//! Text extraction for uploaded invoices.
//!
//! PDFs are read through their embedded text layer first; when that yields
//! too little text the pages are rasterized with `pdftoppm` and OCR'd.
//! Images go straight to the OCR engine.
//!
//! Supports two OCR backends:
//! - Tesseract command-line binary (default)
//! - Tesseract linked in-process (`ocr-tesseract` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use paggo_server::ocr::{
//!     build_engine, ExtractionConfig, ExtractionOrchestrator, ExtractionRequest,
//!     MupdfTextLayer, OcrEngineSettings, PdftoppmRasterizer,
//! };
//!
//! let orchestrator = ExtractionOrchestrator::new(
//!     ExtractionConfig::default(),
//!     build_engine(&OcrEngineSettings::default())?,
//!     Arc::new(MupdfTextLayer::new(Duration::from_secs(30))),
//!     Arc::new(PdftoppmRasterizer::new("pdftoppm", "storage/tmp", Duration::from_secs(120))),
//! );
//!
//! let result = orchestrator
//!     .extract(&ExtractionRequest::from_path(&path).with_mime_type("application/pdf"))
//!     .await?;
//! ```

mod provider;
mod rasterizer;
mod service;
pub mod sniff;
mod text_layer;
mod types;

pub use provider::{build_engine, OcrEngine, OcrEngineKind, OcrEngineSettings, TesseractCliEngine};
pub use rasterizer::{PageRasterizer, PdftoppmRasterizer, TempRasters};
pub use service::{page_marker, page_range_marker, ExtractionConfig, ExtractionOrchestrator};
pub use text_layer::{MupdfTextLayer, TextLayerReader};
pub use types::{
    ExtractionError, ExtractionMeta, ExtractionMethod, ExtractionRequest, ExtractionResult,
    PageBatch,
};
pub(crate) use types::run_blocking_bounded;

#[cfg(feature = "ocr-tesseract")]
pub use provider::TesseractLibEngine;
