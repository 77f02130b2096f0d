//! Document API endpoints
//!
//! Upload, listing, detail, original file download, PDF export and
//! per-document chat.
//! Every route is scoped to the caller identified by the `x-owner-id`
//! header, which a trusted gateway sets after authentication.

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::ask::{AskAnswer, ChatHistory};
use crate::db::{DocumentDetails, DocumentRepository, SourceDocument};
use crate::error::{AppError, Result};
use crate::ingest::UploadedFile;
use crate::ocr::sniff;
use crate::state::AppState;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Declared content types accepted on upload
const ACCEPTED_UPLOAD_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "application/pdf"];

/// Room for multipart framing on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Authenticated document owner
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| OwnerId(v.to_string()))
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", OWNER_HEADER)))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListResponse {
    pub documents: Vec<SourceDocument>,
    pub total: usize,
}

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

/// Create the documents router
pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", get(list_documents).post(upload_document))
        .route("/:id", get(get_document))
        .route("/:id/file", get(download_file))
        .route("/:id/export", get(export_document))
        .route("/:id/chat", get(list_chat).post(ask_document))
        .layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_OVERHEAD))
}

/// Content type used for an upload: the part's header, else a guess from
/// the file name
fn declared_type(content_type: Option<&str>, file_name: &str) -> Option<String> {
    content_type
        .map(sniff::normalize)
        .filter(|t| !t.is_empty() && t != "application/octet-stream")
        .or_else(|| mime_guess::from_path(file_name).first_raw().map(str::to_string))
}

/// Upload a document and run OCR on it
async fn upload_document(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SourceDocument>)> {
    let max_bytes = state.config().storage.max_upload_bytes;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let mime_type = declared_type(field.content_type(), &file_name)
            .filter(|t| ACCEPTED_UPLOAD_TYPES.contains(&t.as_str()))
            .ok_or_else(|| {
                AppError::BadRequest("Only PNG, JPEG, WEBP and PDF files are accepted".to_string())
            })?;

        let data = field.bytes().await?;
        if data.is_empty() {
            return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
        }
        if data.len() > max_bytes {
            return Err(AppError::BadRequest(format!(
                "File exceeds the {} byte upload limit",
                max_bytes
            )));
        }

        tracing::debug!(
            owner_id = %owner_id,
            file_name = %file_name,
            mime_type = %mime_type,
            size = data.len(),
            "Received upload"
        );

        let document = state
            .ingestion()
            .ingest(
                &owner_id,
                UploadedFile {
                    bytes: &data,
                    file_name: &file_name,
                    declared_mime_type: &mime_type,
                },
            )
            .await?;

        tracing::info!(
            document_id = %document.id,
            status = document.status.as_str(),
            "Document uploaded"
        );

        return Ok((StatusCode::CREATED, Json(document)));
    }

    Err(AppError::BadRequest("No file provided. Use field name 'file'".to_string()))
}

/// List the caller's documents, newest first
async fn list_documents(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
) -> Result<Json<DocumentListResponse>> {
    let documents = DocumentRepository::new(state.db())
        .list_for_owner(&owner_id)
        .await?;
    let total = documents.len();

    Ok(Json(DocumentListResponse { documents, total }))
}

async fn find_document(state: &AppState, id: &str, owner_id: &str) -> Result<SourceDocument> {
    DocumentRepository::new(state.db())
        .find_for_owner(id, owner_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Document not found".to_string()))
}

/// Document metadata together with its OCR result
async fn get_document(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetails>> {
    let document = find_document(&state, &id, &owner_id).await?;
    let ocr = DocumentRepository::new(state.db()).get_extraction(&id).await?;

    Ok(Json(DocumentDetails { document, ocr }))
}

/// Original uploaded bytes
async fn download_file(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<Response> {
    let document = find_document(&state, &id, &owner_id).await?;
    let bytes = state
        .storage()
        .read(std::path::Path::new(&document.storage_path))
        .await?;

    let safe_name: String = document
        .original_name
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();

    Ok((
        [
            (header::CONTENT_TYPE, document.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", safe_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Original with the OCR text and chat transcript appended, as a PDF
async fn export_document(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<Response> {
    let exported = state.export().export(&owner_id, &id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", exported.file_name),
            ),
        ],
        exported.bytes,
    )
        .into_response())
}

/// Ask a question about a document
async fn ask_document(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskAnswer>> {
    let answer = state.ask().ask(&owner_id, &id, &request.question).await?;
    Ok(Json(answer))
}

/// Chat session and messages for a document
async fn list_chat(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(id): Path<String>,
) -> Result<Json<ChatHistory>> {
    let history = state.ask().history(&owner_id, &id).await?;
    Ok(Json(history))
}
