//! Extraction start/stop endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::DocumentStatus;

/// Response from starting extraction
#[derive(Debug, Serialize)]
pub struct ExtractionStarted {
    pub doc_key: String,
    pub job_id: String,
    pub status: DocumentStatus,
}

/// Response from a stop request
#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

impl StopResponse {
    pub fn new(doc_key: &str, stopped: bool, stage: &str) -> Self {
        let message = if stopped {
            format!("Stop requested for {} of {}", stage, doc_key)
        } else {
            format!("No {} in progress for {}", stage, doc_key)
        };
        Self {
            success: stopped,
            message,
        }
    }
}

/// POST /api/documents/{key}/extraction
pub async fn start(state: &AppState, doc_key: &str) -> Result<Response> {
    let job_id = state.pipeline().start_extraction(doc_key).await?;
    let body = ExtractionStarted {
        doc_key: doc_key.to_string(),
        job_id,
        status: DocumentStatus::Parsing,
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

/// DELETE /api/documents/{key}/extraction
pub fn stop(state: &AppState, doc_key: &str) -> Result<Response> {
    let stopped = state.pipeline().stop_extraction(doc_key)?;
    Ok(Json(StopResponse::new(doc_key, stopped, "extraction")).into_response())
}
