//! Document, extraction result and chat persistence

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::ocr::{ExtractionMeta, ExtractionMethod, ExtractionResult};

/// Document lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploaded,
    OcrProcessing,
    OcrDone,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::OcrProcessing => "OCR_PROCESSING",
            Self::OcrDone => "OCR_DONE",
            Self::Failed => "FAILED",
        }
    }

    /// States a document may move into this one from
    fn predecessors(&self) -> &'static [DocumentStatus] {
        match self {
            Self::Uploaded => &[],
            Self::OcrProcessing => &[Self::Uploaded],
            Self::OcrDone => &[Self::OcrProcessing],
            Self::Failed => &[Self::Uploaded, Self::OcrProcessing],
        }
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "UPLOADED" => Ok(Self::Uploaded),
            "OCR_PROCESSING" => Ok(Self::OcrProcessing),
            "OCR_DONE" => Ok(Self::OcrDone),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// Chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Self::User),
            "ASSISTANT" => Ok(Self::Assistant),
            other => Err(format!("unknown chat role: {}", other)),
        }
    }
}

/// Uploaded document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDocument {
    pub id: String,
    pub owner_id: String,
    pub status: DocumentStatus,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Absolute location of the stored bytes
    #[serde(skip_serializing)]
    pub storage_path: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields supplied when a document row is created
#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub owner_id: &'a str,
    pub original_name: &'a str,
    pub mime_type: &'a str,
    pub size_bytes: u64,
    pub storage_path: &'a str,
}

/// Persisted extraction result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredExtraction {
    pub text: String,
    pub method: ExtractionMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ExtractionMeta>,
}

/// Document together with its extraction result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetails {
    #[serde(flatten)]
    pub document: SourceDocument,
    pub ocr: Option<StoredExtraction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub document_id: String,
    pub owner_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    owner_id: String,
    status: String,
    original_name: String,
    mime_type: String,
    size_bytes: i64,
    storage_path: String,
    created_at: String,
    updated_at: String,
}

impl DocumentRow {
    fn into_document(self) -> Result<SourceDocument> {
        Ok(SourceDocument {
            status: self.status.parse().map_err(AppError::Internal)?,
            id: self.id,
            owner_id: self.owner_id,
            original_name: self.original_name,
            mime_type: self.mime_type,
            size_bytes: self.size_bytes.max(0) as u64,
            storage_path: self.storage_path,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OcrResultRow {
    text: String,
    method: String,
    total_pages: Option<i64>,
    processed_pages: Option<i64>,
}

impl OcrResultRow {
    fn into_extraction(self) -> Result<StoredExtraction> {
        let meta = match (self.total_pages, self.processed_pages) {
            (Some(total), Some(processed)) => Some(ExtractionMeta::new(
                total.max(0) as u32,
                processed.max(0) as u32,
            )),
            _ => None,
        };

        Ok(StoredExtraction {
            method: self.method.parse().map_err(AppError::Internal)?,
            text: self.text,
            meta,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChatMessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    created_at: String,
}

impl ChatMessageRow {
    fn into_message(self) -> Result<ChatMessage> {
        Ok(ChatMessage {
            role: self.role.parse().map_err(AppError::Internal)?,
            id: self.id,
            session_id: self.session_id,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

/// Fixed-width timestamps so text ordering matches time ordering
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, status, original_name, mime_type, size_bytes, \
                                storage_path, created_at, updated_at";

/// Document repository
pub struct DocumentRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DocumentRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a document by id
    pub async fn get(&self, id: &str) -> Result<Option<SourceDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// Get a document only if it belongs to `owner_id`
    pub async fn find_for_owner(&self, id: &str, owner_id: &str) -> Result<Option<SourceDocument>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE id = ? AND owner_id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(DocumentRow::into_document).transpose()
    }

    /// List an owner's documents, newest first
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<SourceDocument>> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {} FROM documents WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC",
            DOCUMENT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::into_document).collect()
    }

    /// Create a new document in the UPLOADED state
    pub async fn create(&self, data: &NewDocument<'_>) -> Result<SourceDocument> {
        let id = Uuid::new_v4().to_string();
        let now = now();

        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, status, original_name, mime_type, size_bytes, storage_path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(data.owner_id)
        .bind(DocumentStatus::Uploaded.as_str())
        .bind(data.original_name)
        .bind(data.mime_type)
        .bind(data.size_bytes as i64)
        .bind(data.storage_path)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| AppError::Internal("Failed to fetch created document".to_string()))
    }

    /// Point a document at its stored file
    pub async fn update_storage_path(&self, id: &str, storage_path: &str) -> Result<SourceDocument> {
        let result = sqlx::query("UPDATE documents SET storage_path = ?, updated_at = ? WHERE id = ?")
            .bind(storage_path)
            .bind(now())
            .bind(id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Document {} not found", id)));
        }

        self.fetch(id).await
    }

    /// Move a document to `status`.
    ///
    /// The update only applies when the current status may precede `status`,
    /// checked in the same statement.
    pub async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<SourceDocument> {
        let allowed = status.predecessors();
        let placeholders = vec!["?"; allowed.len().max(1)].join(", ");
        let query = format!(
            "UPDATE documents SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut sql_query = sqlx::query(&query).bind(status.as_str()).bind(now()).bind(id);
        if allowed.is_empty() {
            // Nothing may move back to the initial state.
            sql_query = sql_query.bind("");
        }
        for predecessor in allowed {
            sql_query = sql_query.bind(predecessor.as_str());
        }

        let result = sql_query.execute(self.pool).await?;

        if result.rows_affected() == 0 {
            let current = self
                .get(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))?;
            return Err(AppError::Conflict(format!(
                "Document {} cannot move from {} to {}",
                id,
                current.status.as_str(),
                status.as_str()
            )));
        }

        self.fetch(id).await
    }

    /// Insert or replace the extraction result of a document
    pub async fn upsert_extraction(&self, document_id: &str, result: &ExtractionResult) -> Result<()> {
        let now = now();
        let meta = result.meta;

        sqlx::query(
            r#"
            INSERT INTO ocr_results (document_id, text, method, total_pages, processed_pages, truncated, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                text = excluded.text,
                method = excluded.method,
                total_pages = excluded.total_pages,
                processed_pages = excluded.processed_pages,
                truncated = excluded.truncated,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(document_id)
        .bind(&result.text)
        .bind(result.method.as_str())
        .bind(meta.map(|m| m.total_pages as i64))
        .bind(meta.map(|m| m.processed_pages as i64))
        .bind(meta.map(|m| m.truncated))
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Get the stored extraction result of a document
    pub async fn get_extraction(&self, document_id: &str) -> Result<Option<StoredExtraction>> {
        let row = sqlx::query_as::<_, OcrResultRow>(
            r#"
            SELECT text, method, total_pages, processed_pages
            FROM ocr_results
            WHERE document_id = ?
            "#,
        )
        .bind(document_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(OcrResultRow::into_extraction).transpose()
    }

    /// Stored OCR text, if any
    pub async fn get_ocr_text(&self, document_id: &str) -> Result<Option<String>> {
        let text: Option<(String,)> = sqlx::query_as("SELECT text FROM ocr_results WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(text.map(|(t,)| t))
    }

    /// Get the chat session of (document, owner), creating it on first use
    pub async fn get_or_create_chat_session(&self, document_id: &str, owner_id: &str) -> Result<ChatSession> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (id, document_id, owner_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id, owner_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(owner_id)
        .bind(now())
        .execute(self.pool)
        .await?;

        let session = sqlx::query_as::<_, ChatSession>(
            r#"
            SELECT id, document_id, owner_id, created_at
            FROM chat_sessions
            WHERE document_id = ? AND owner_id = ?
            "#,
        )
        .bind(document_id)
        .bind(owner_id)
        .fetch_one(self.pool)
        .await?;

        Ok(session)
    }

    /// The last `limit` messages of a session, oldest first
    pub async fn list_chat_messages(&self, session_id: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            SELECT id, session_id, role, content, created_at
            FROM (
                SELECT id, session_id, role, content, created_at, rowid AS seq
                FROM chat_messages
                WHERE session_id = ?
                ORDER BY created_at DESC, seq DESC
                LIMIT ?
            )
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(ChatMessageRow::into_message).collect()
    }

    /// Append a message to a session
    pub async fn create_chat_message(
        &self,
        session_id: &str,
        role: ChatRole,
        content: &str,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now(),
        };

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, session_id, role, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&message.created_at)
        .execute(self.pool)
        .await?;

        Ok(message)
    }

    async fn fetch(&self, id: &str) -> Result<SourceDocument> {
        self.get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    fn new_doc<'a>(owner: &'a str, name: &'a str) -> NewDocument<'a> {
        NewDocument {
            owner_id: owner,
            original_name: name,
            mime_type: "application/pdf",
            size_bytes: 1024,
            storage_path: "",
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_document() {
        let pool = create_memory_pool().await.unwrap();
        let repo = DocumentRepository::new(&pool);

        let doc = repo.create(&new_doc("alice", "invoice.pdf")).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(doc.size_bytes, 1024);

        assert_eq!(repo.get(&doc.id).await.unwrap(), Some(doc.clone()));
        assert!(repo.find_for_owner(&doc.id, "alice").await.unwrap().is_some());
        assert!(repo.find_for_owner(&doc.id, "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let pool = create_memory_pool().await.unwrap();
        let repo = DocumentRepository::new(&pool);

        let first = repo.create(&new_doc("alice", "a.pdf")).await.unwrap();
        let second = repo.create(&new_doc("alice", "b.pdf")).await.unwrap();
        repo.create(&new_doc("bob", "c.pdf")).await.unwrap();

        let ids: Vec<String> = repo
            .list_for_owner("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_status_transitions_are_monotonic() {
        let pool = create_memory_pool().await.unwrap();
        let repo = DocumentRepository::new(&pool);
        let doc = repo.create(&new_doc("alice", "a.pdf")).await.unwrap();

        let updated = repo.update_status(&doc.id, DocumentStatus::OcrProcessing).await.unwrap();
        assert_eq!(updated.status, DocumentStatus::OcrProcessing);

        let updated = repo.update_status(&doc.id, DocumentStatus::Failed).await.unwrap();
        assert_eq!(updated.status, DocumentStatus::Failed);

        let err = repo.update_status(&doc.id, DocumentStatus::OcrDone).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        let err = repo.update_status(&doc.id, DocumentStatus::Uploaded).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = repo.update_status("missing", DocumentStatus::OcrDone).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_transition_table() {
        use DocumentStatus::*;
        assert!(Uploaded.can_transition_to(OcrProcessing));
        assert!(Uploaded.can_transition_to(Failed));
        assert!(OcrProcessing.can_transition_to(OcrDone));
        assert!(!OcrDone.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(OcrProcessing));
        assert!(!OcrProcessing.can_transition_to(Uploaded));
    }

    #[tokio::test]
    async fn test_update_storage_path() {
        let pool = create_memory_pool().await.unwrap();
        let repo = DocumentRepository::new(&pool);
        let doc = repo.create(&new_doc("alice", "a.pdf")).await.unwrap();

        let updated = repo.update_storage_path(&doc.id, "/data/a.pdf").await.unwrap();
        assert_eq!(updated.storage_path, "/data/a.pdf");

        assert!(matches!(
            repo.update_storage_path("missing", "/x").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_extraction() {
        let pool = create_memory_pool().await.unwrap();
        let repo = DocumentRepository::new(&pool);
        let doc = repo.create(&new_doc("alice", "a.pdf")).await.unwrap();

        assert!(repo.get_extraction(&doc.id).await.unwrap().is_none());

        let first = ExtractionResult {
            text: "first".to_string(),
            method: ExtractionMethod::ImageOcr,
            meta: None,
        };
        repo.upsert_extraction(&doc.id, &first).await.unwrap();

        let second = ExtractionResult {
            text: "second".to_string(),
            method: ExtractionMethod::RasterOcr,
            meta: Some(ExtractionMeta::new(45, 30)),
        };
        repo.upsert_extraction(&doc.id, &second).await.unwrap();

        let stored = repo.get_extraction(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.text, "second");
        assert_eq!(stored.method, ExtractionMethod::RasterOcr);
        assert_eq!(stored.meta, Some(ExtractionMeta::new(45, 30)));
        assert!(stored.meta.unwrap().truncated);
        assert_eq!(repo.get_ocr_text(&doc.id).await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_chat_session_and_messages() {
        let pool = create_memory_pool().await.unwrap();
        let repo = DocumentRepository::new(&pool);
        let doc = repo.create(&new_doc("alice", "a.pdf")).await.unwrap();

        let session = repo.get_or_create_chat_session(&doc.id, "alice").await.unwrap();
        let again = repo.get_or_create_chat_session(&doc.id, "alice").await.unwrap();
        assert_eq!(session.id, again.id);

        for i in 0..5 {
            let role = if i % 2 == 0 { ChatRole::User } else { ChatRole::Assistant };
            repo.create_chat_message(&session.id, role, &format!("m{}", i))
                .await
                .unwrap();
        }

        let last_three: Vec<String> = repo
            .list_chat_messages(&session.id, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(last_three, vec!["m2", "m3", "m4"]);

        let all = repo.list_chat_messages(&session.id, 100).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].role, ChatRole::User);
        assert_eq!(all[1].role, ChatRole::Assistant);
    }
}
