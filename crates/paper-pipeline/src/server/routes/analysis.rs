//! Analysis start/stop/result endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::Result;
use crate::server::routes::extraction::StopResponse;
use crate::server::state::AppState;
use crate::types::DocumentStatus;

/// POST /api/documents/{key}/analysis
pub fn start(state: &AppState, doc_key: &str) -> Result<Response> {
    state.pipeline().start_analysis(doc_key)?;
    let body = serde_json::json!({
        "doc_key": doc_key,
        "status": DocumentStatus::Analyzing,
    });
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

/// DELETE /api/documents/{key}/analysis
pub fn stop(state: &AppState, doc_key: &str) -> Result<Response> {
    let stopped = state.pipeline().stop_analysis(doc_key)?;
    Ok(Json(StopResponse::new(doc_key, stopped, "analysis")).into_response())
}

/// GET /api/documents/{key}/analysis
pub fn get_results(state: &AppState, doc_key: &str) -> Result<Response> {
    let results = state.pipeline().analysis(doc_key)?;
    Ok(Json(serde_json::json!({
        "doc_key": doc_key,
        "results": results,
    }))
    .into_response())
}
