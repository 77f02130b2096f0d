//! Ingestion
//!
//! Stores an upload, runs text extraction on it and records the outcome on
//! the document's lifecycle status.

mod observer;
mod service;

pub use observer::{FailureReport, IngestObserver, ProcessingError, TracingObserver};
pub use service::{storage_extension, IngestConfig, IngestError, IngestionService, UploadedFile};
