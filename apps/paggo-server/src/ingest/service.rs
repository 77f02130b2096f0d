//! Ingestion service

use std::path::Path;
use std::sync::Arc;

use sqlx::SqlitePool;

use super::observer::{FailureReport, IngestObserver, ProcessingError, TracingObserver};
use crate::db::{DocumentRepository, DocumentStatus, NewDocument, SourceDocument};
use crate::error::AppError;
use crate::ocr::{sniff, ExtractionOrchestrator, ExtractionRequest, ExtractionResult};
use crate::storage::{LocalStorage, StorageError};

/// Ingestion errors
///
/// Extraction failures are not errors here; they end in a FAILED document.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to store upload: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] AppError),
}

impl From<IngestError> for AppError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Storage(e) => AppError::Storage(e),
            IngestError::Repository(e) => e,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Uploads smaller than this are handed to the extractor in memory;
    /// larger ones are re-read from disk
    pub inline_buffer_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            inline_buffer_limit: 8 * 1024 * 1024,
        }
    }
}

/// A received upload
#[derive(Debug, Clone, Copy)]
pub struct UploadedFile<'a> {
    pub bytes: &'a [u8],
    pub file_name: &'a str,
    pub declared_mime_type: &'a str,
}

/// File extension for a stored upload: from the declared MIME type, else
/// from the original file name, else none.
pub fn storage_extension(mime_type: &str, file_name: &str) -> String {
    let from_mime = match sniff::normalize(mime_type).as_str() {
        "image/png" => Some(".png"),
        "image/jpeg" => Some(".jpg"),
        "image/webp" => Some(".webp"),
        "application/pdf" => Some(".pdf"),
        _ => None,
    };
    if let Some(ext) = from_mime {
        return ext.to_string();
    }

    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Drives one upload through storage, extraction and status updates
#[derive(Clone)]
pub struct IngestionService {
    pool: SqlitePool,
    storage: LocalStorage,
    orchestrator: Arc<ExtractionOrchestrator>,
    observer: Arc<dyn IngestObserver>,
    config: IngestConfig,
}

impl IngestionService {
    pub fn new(
        pool: SqlitePool,
        storage: LocalStorage,
        orchestrator: Arc<ExtractionOrchestrator>,
        config: IngestConfig,
    ) -> Self {
        Self {
            pool,
            storage,
            orchestrator,
            observer: Arc::new(TracingObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Ingest an upload for `owner_id` and return the final document.
    ///
    /// Extraction runs inline. A failure to extract or to record the result
    /// leaves the document FAILED and still returns `Ok`.
    pub async fn ingest(
        &self,
        owner_id: &str,
        upload: UploadedFile<'_>,
    ) -> Result<SourceDocument, IngestError> {
        let repo = DocumentRepository::new(&self.pool);

        let document = repo
            .create(&NewDocument {
                owner_id,
                original_name: upload.file_name,
                mime_type: upload.declared_mime_type,
                size_bytes: upload.bytes.len() as u64,
                storage_path: "",
            })
            .await?;
        self.observer.status_changed(&document);

        let key = format!(
            "{}{}",
            document.id,
            storage_extension(upload.declared_mime_type, upload.file_name)
        );
        let stored = match self.storage.put(&key, upload.bytes).await {
            Ok(stored) => stored,
            Err(e) => {
                self.mark_failed(&repo, &document.id).await;
                return Err(e.into());
            }
        };
        let storage_path = stored.absolute_path.to_string_lossy().into_owned();
        if let Err(e) = repo.update_storage_path(&document.id, &storage_path).await {
            if let Err(remove_err) = self.storage.remove(&stored.absolute_path).await {
                tracing::warn!(
                    document_id = %document.id,
                    "Failed to remove orphaned upload: {}",
                    remove_err
                );
            }
            self.mark_failed(&repo, &document.id).await;
            return Err(e.into());
        }

        let document = match repo
            .update_status(&document.id, DocumentStatus::OcrProcessing)
            .await
        {
            Ok(document) => document,
            Err(e) => {
                self.mark_failed(&repo, &document.id).await;
                return Err(e.into());
            }
        };
        self.observer.status_changed(&document);

        let mut request = ExtractionRequest::from_path(&stored.absolute_path)
            .with_mime_type(upload.declared_mime_type);
        if upload.bytes.len() < self.config.inline_buffer_limit {
            request = request.with_buffer(upload.bytes);
        }

        let outcome = match self.orchestrator.extract(&request).await {
            Ok(result) => {
                tracing::debug!(
                    document_id = %document.id,
                    method = result.method.as_str(),
                    chars = result.text.len(),
                    "Extraction finished"
                );
                Self::record_extraction(&repo, &document.id, &result)
                    .await
                    .map_err(ProcessingError::from)
            }
            Err(e) => Err(e.into()),
        };

        let document = match outcome {
            Ok(document) => document,
            Err(error) => {
                self.observer.extraction_failed(&FailureReport {
                    document_id: &document.id,
                    file_name: upload.file_name,
                    mime_type: upload.declared_mime_type,
                    storage_path: &storage_path,
                    error: &error,
                });
                repo.update_status(&document.id, DocumentStatus::Failed).await?
            }
        };
        self.observer.status_changed(&document);

        Ok(document)
    }

    async fn record_extraction(
        repo: &DocumentRepository<'_>,
        id: &str,
        result: &ExtractionResult,
    ) -> Result<SourceDocument, AppError> {
        repo.upsert_extraction(id, result).await?;
        repo.update_status(id, DocumentStatus::OcrDone).await
    }

    async fn mark_failed(&self, repo: &DocumentRepository<'_>, id: &str) {
        match repo.update_status(id, DocumentStatus::Failed).await {
            Ok(document) => self.observer.status_changed(&document),
            Err(e) => tracing::warn!(document_id = %id, "Failed to mark document FAILED: {}", e),
        }
    }
}
