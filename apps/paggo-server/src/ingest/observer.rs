//! Ingestion observers

use crate::db::SourceDocument;
use crate::error::AppError;
use crate::ocr::ExtractionError;

/// Why a stored document ended up FAILED
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Failed to record extraction result: {0}")]
    Persistence(#[from] AppError),
}

/// Diagnostic for a document whose extraction failed
#[derive(Debug)]
pub struct FailureReport<'a> {
    pub document_id: &'a str,
    pub file_name: &'a str,
    pub mime_type: &'a str,
    pub storage_path: &'a str,
    pub error: &'a ProcessingError,
}

/// Receives lifecycle events from the ingestion service
pub trait IngestObserver: Send + Sync {
    /// Called after each persisted status change
    fn status_changed(&self, document: &SourceDocument);

    /// Called before a document is marked FAILED
    fn extraction_failed(&self, report: &FailureReport<'_>);
}

/// Observer that writes events to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl IngestObserver for TracingObserver {
    fn status_changed(&self, document: &SourceDocument) {
        tracing::info!(
            document_id = %document.id,
            status = document.status.as_str(),
            "Document status changed"
        );
    }

    fn extraction_failed(&self, report: &FailureReport<'_>) {
        tracing::error!(
            document_id = %report.document_id,
            file_name = %report.file_name,
            mime_type = %report.mime_type,
            storage_path = %report.storage_path,
            error = %report.error,
            "Text extraction failed"
        );
    }
}
