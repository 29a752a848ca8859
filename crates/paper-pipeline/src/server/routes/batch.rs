//! Batch endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::error::Result;
use crate::processing::BatchTarget;
use crate::server::state::AppState;

/// Response from a batch start
#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub target: BatchTarget,
    pub eligible: usize,
}

/// POST /api/batch/extraction - Extract every `uploaded` document
pub async fn start_extraction_batch(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<BatchAccepted>)> {
    spawn(&state, BatchTarget::Extraction)
}

/// POST /api/batch/analysis - Analyze every `extracted` document
pub async fn start_analysis_batch(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<BatchAccepted>)> {
    spawn(&state, BatchTarget::Analysis)
}

fn spawn(state: &AppState, target: BatchTarget) -> Result<(StatusCode, Json<BatchAccepted>)> {
    let eligible = state.pipeline().spawn_batch(target)?;
    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { target, eligible })))
}
