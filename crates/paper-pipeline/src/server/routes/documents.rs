//! Document upload, listing and record endpoints

use axum::{
    extract::{multipart::Field, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{DocumentPage, DocumentRecord, DocumentStatus};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

/// Query for the document listing
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Comma-separated statuses, e.g. `uploaded,error`
    pub status: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// A file the upload endpoint did not accept
#[derive(Debug, Serialize)]
pub struct RejectedFile {
    pub filename: String,
    pub error: String,
}

/// Response from upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<DocumentRecord>,
    pub rejected: Vec<RejectedFile>,
}

/// GET /api/documents - Paginated listing, newest first
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentPage>> {
    let statuses = match query.status.as_deref() {
        Some(list) => DocumentStatus::parse_list(list)?,
        None => Vec::new(),
    };
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let page = state.pipeline().list_documents(&statuses, offset, limit)?;
    Ok(Json(page))
}

/// POST /api/documents - Upload one or more PDFs
pub async fn upload_documents(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response> {
    let max_file_size = state.config().server.max_upload_size;
    let mut response = UploadResponse {
        uploaded: Vec::new(),
        rejected: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload.pdf").to_string();
        let data = match read_file(field, max_file_size).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("Failed to read file {}: {}", filename, e);
                response.rejected.push(RejectedFile {
                    filename,
                    error: e.to_string(),
                });
                continue;
            }
        };

        match state.pipeline().upload_document(&filename, data).await {
            Ok(record) => response.uploaded.push(record),
            Err(e) => response.rejected.push(RejectedFile {
                filename,
                error: e.to_string(),
            }),
        }
    }

    if response.uploaded.is_empty() {
        let reasons = response
            .rejected
            .iter()
            .map(|r| r.error.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::validation(if reasons.is_empty() {
            "No files provided".to_string()
        } else {
            reasons
        }));
    }

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Buffer one file field, giving up as soon as it grows past `max_size`
async fn read_file(mut field: Field<'_>, max_size: usize) -> Result<Bytes> {
    let mut data = BytesMut::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| Error::validation(format!("Failed to read file: {}", e)))?
    {
        if data.len() + chunk.len() > max_size {
            return Err(Error::validation(format!(
                "file exceeds the {} byte limit",
                max_size
            )));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data.freeze())
}

/// GET /api/documents/stats - Count per status
pub fn stats(state: &AppState) -> Result<Response> {
    Ok(Json(state.pipeline().stats()?).into_response())
}

/// GET /api/documents/{key}
pub fn get_document(state: &AppState, doc_key: &str) -> Result<Response> {
    Ok(Json(state.pipeline().get_document(doc_key)?).into_response())
}

/// GET /api/documents/{key}/artifact - Extracted markdown
pub async fn get_artifact(state: &AppState, doc_key: &str) -> Result<Response> {
    let content = state.pipeline().artifact(doc_key).await?;
    Ok(Json(serde_json::json!({
        "doc_key": doc_key,
        "content": content,
    }))
    .into_response())
}

/// DELETE /api/documents/{key}
pub async fn delete_document(state: &AppState, doc_key: &str) -> Result<Response> {
    state.pipeline().delete_document(doc_key).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "doc_key": doc_key,
    }))
    .into_response())
}
