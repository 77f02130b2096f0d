//! Document export
//!
//! Produces a PDF of the original upload followed by appendices holding
//! its OCR text and the owner's chat transcript.

mod appendix;
mod cover;

pub use appendix::{AppendixSection, CoverPage};
pub use cover::render_cover;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::ask::truncate_context;
use crate::db::{ChatMessage, DocumentRepository, DocumentStatus};
use crate::error::AppError;

pub const OCR_APPENDIX_MAX_CHARS: usize = 120_000;
pub const CHAT_APPENDIX_MAX_CHARS: usize = 80_000;
/// Most recent chat messages included in the transcript
pub const CHAT_APPENDIX_MESSAGES: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Document not found")]
    DocumentNotFound,

    #[error("Failed to build PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("PDF task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Repository(#[from] AppError),
}

impl From<ExportError> for AppError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::DocumentNotFound => AppError::NotFound(e.to_string()),
            ExportError::Pdf(_) | ExportError::Task(_) => AppError::Internal(e.to_string()),
            ExportError::Repository(e) => e,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportedPdf {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// `<name>_with_ocr_chat.pdf`, with the upload's own extension dropped
pub fn export_file_name(original_name: &str, document_id: &str) -> String {
    let base = if original_name.is_empty() {
        format!("document_{}", document_id)
    } else {
        original_name.to_string()
    };

    let mut safe = String::with_capacity(base.len());
    let mut replacing = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ') {
            safe.push(c);
            replacing = false;
        } else if !replacing {
            safe.push('_');
            replacing = true;
        }
    }

    let lower = safe.to_ascii_lowercase();
    let stem_len = [".png", ".jpg", ".jpeg", ".webp", ".pdf"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| safe.len() - ext.len())
        .unwrap_or(safe.len());

    format!("{}_with_ocr_chat.pdf", &safe[..stem_len])
}

fn transcript_line(message: &ChatMessage) -> String {
    let at = DateTime::parse_from_rfc3339(&message.created_at)
        .map(|t| t.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| message.created_at.clone());
    format!("[{}] {}: {}", at, message.role.as_str(), message.content)
}

#[derive(Clone)]
pub struct ExportService {
    pool: SqlitePool,
    render_timeout: Duration,
}

impl ExportService {
    pub fn new(pool: SqlitePool, render_timeout: Duration) -> Self {
        Self {
            pool,
            render_timeout,
        }
    }

    /// Build the appendix PDF for one of the owner's documents.
    ///
    /// OCR text is included only once the document is `OCR_DONE`.
    pub async fn export(&self, owner_id: &str, document_id: &str) -> Result<ExportedPdf, ExportError> {
        let repo = DocumentRepository::new(&self.pool);

        let document = repo
            .find_for_owner(document_id, owner_id)
            .await?
            .ok_or(ExportError::DocumentNotFound)?;

        let ocr_text = if document.status == DocumentStatus::OcrDone {
            repo.get_ocr_text(document_id).await?
        } else {
            None
        };

        let session = repo.get_or_create_chat_session(document_id, owner_id).await?;
        let messages = repo
            .list_chat_messages(&session.id, CHAT_APPENDIX_MESSAGES)
            .await?;

        let cover = render_cover(
            Path::new(&document.storage_path),
            &document.mime_type,
            &document.original_name,
            self.render_timeout,
        )
        .await;

        let ocr = truncate_context(ocr_text.as_deref().unwrap_or_default(), OCR_APPENDIX_MAX_CHARS);
        let chat = if messages.is_empty() {
            "(No LLM interactions yet)".to_string()
        } else {
            let transcript = messages
                .iter()
                .map(transcript_line)
                .collect::<Vec<_>>()
                .join("\n\n");
            truncate_context(&transcript, CHAT_APPENDIX_MAX_CHARS)
        };

        let sections = vec![
            AppendixSection {
                title: "OCR - Extracted text".to_string(),
                body: if ocr.trim().is_empty() {
                    "(OCR not available or empty)".to_string()
                } else {
                    ocr
                },
            },
            AppendixSection {
                title: "Chat - LLM interactions".to_string(),
                body: chat,
            },
        ];

        let bytes = tokio::task::spawn_blocking(move || appendix::build(&cover, &sections))
            .await
            .map_err(|e| ExportError::Task(e.to_string()))??;

        tracing::info!(
            document_id,
            messages = messages.len(),
            size = bytes.len(),
            "Exported document with appendix"
        );

        Ok(ExportedPdf {
            file_name: export_file_name(&document.original_name, &document.id),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_memory_pool, ChatRole, NewDocument};
    use crate::ocr::{ExtractionMethod, ExtractionResult};
    use image::{DynamicImage, RgbImage};
    use lopdf::Document;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name("nota.png", "id"), "nota_with_ocr_chat.pdf");
        assert_eq!(export_file_name("Fatura Março.PDF", "id"), "Fatura Mar_o_with_ocr_chat.pdf");
        assert_eq!(export_file_name("a/b\\c.jpeg", "id"), "a_b_c_with_ocr_chat.pdf");
        assert_eq!(export_file_name("scan.tiff", "id"), "scan.tiff_with_ocr_chat.pdf");
        assert_eq!(export_file_name("", "abc"), "document_abc_with_ocr_chat.pdf");
    }

    #[test]
    fn test_transcript_line() {
        let message = ChatMessage {
            id: "m1".to_string(),
            session_id: "s1".to_string(),
            role: ChatRole::Assistant,
            content: "The total is 10.".to_string(),
            created_at: "2026-03-04T05:06:07.123Z".to_string(),
        };
        assert_eq!(
            transcript_line(&message),
            "[2026-03-04 05:06:07] ASSISTANT: The total is 10."
        );
    }

    fn all_page_text(doc: &Document) -> String {
        doc.get_pages()
            .values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(*id).unwrap()).into_owned())
            .collect()
    }

    fn stored_png(dir: &TempDir) -> String {
        let path = dir.path().join("nota.png");
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(8, 8))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        std::fs::write(&path, bytes).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_export_includes_ocr_and_chat() {
        let dir = TempDir::new().unwrap();
        let pool = create_memory_pool().await.unwrap();
        let repo = DocumentRepository::new(&pool);
        let storage_path = stored_png(&dir);

        let document = repo
            .create(&NewDocument {
                owner_id: "alice",
                original_name: "nota.png",
                mime_type: "image/png",
                size_bytes: 10,
                storage_path: &storage_path,
            })
            .await
            .unwrap();
        repo.update_status(&document.id, DocumentStatus::OcrProcessing).await.unwrap();
        repo.upsert_extraction(
            &document.id,
            &ExtractionResult {
                text: "TOTAL R$ 10,00".to_string(),
                method: ExtractionMethod::ImageOcr,
                meta: None,
            },
        )
        .await
        .unwrap();
        repo.update_status(&document.id, DocumentStatus::OcrDone).await.unwrap();
        let session = repo.get_or_create_chat_session(&document.id, "alice").await.unwrap();
        repo.create_chat_message(&session.id, ChatRole::User, "What is the total?")
            .await
            .unwrap();

        let service = ExportService::new(pool.clone(), Duration::from_secs(5));
        let exported = service.export("alice", &document.id).await.unwrap();

        assert_eq!(exported.file_name, "nota_with_ocr_chat.pdf");
        let doc = Document::load_mem(&exported.bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        let text = all_page_text(&doc);
        assert!(text.contains("/Im1 Do"));
        assert!(text.contains("(TOTAL R$ 10,00)"));
        assert!(text.contains("USER: What is the total?"));

        assert!(matches!(
            service.export("bob", &document.id).await,
            Err(ExportError::DocumentNotFound)
        ));
    }

    #[tokio::test]
    async fn test_export_before_ocr_done_has_placeholders() {
        let dir = TempDir::new().unwrap();
        let pool = create_memory_pool().await.unwrap();
        let storage_path = stored_png(&dir);

        let document = DocumentRepository::new(&pool)
            .create(&NewDocument {
                owner_id: "alice",
                original_name: "nota.png",
                mime_type: "image/png",
                size_bytes: 10,
                storage_path: &storage_path,
            })
            .await
            .unwrap();

        let exported = ExportService::new(pool, Duration::from_secs(5))
            .export("alice", &document.id)
            .await
            .unwrap();

        let text = all_page_text(&Document::load_mem(&exported.bytes).unwrap());
        assert!(text.contains("OCR not available or empty"));
        assert!(text.contains("No LLM interactions yet"));
    }
}
