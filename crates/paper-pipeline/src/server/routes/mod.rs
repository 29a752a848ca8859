//! API routes for the pipeline server
//!
//! Document keys contain `/` (`papers/<date>/<uuid>.pdf`), so everything below
//! `/documents/` is one wildcard route; the trailing segment (`/extraction`,
//! `/analysis`, `/artifact`) selects the operation.

pub mod analysis;
pub mod batch;
pub mod documents;
pub mod extraction;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};

use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Build all API routes
///
/// `max_request_size` bounds a whole upload request; each file is checked
/// against `server.max_upload_size` as it streams in.
pub fn api_routes(max_request_size: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/documents",
            get(documents::list_documents)
                .post(documents::upload_documents)
                .layer(DefaultBodyLimit::max(max_request_size)),
        )
        .route(
            "/documents/*path",
            get(get_dispatch).post(post_dispatch).delete(delete_dispatch),
        )
        .route("/batch/extraction", post(batch::start_extraction_batch))
        .route("/batch/analysis", post(batch::start_analysis_batch))
        .route("/info", get(info))
}

/// Which operation a `/documents/...` path addresses
#[derive(Debug, PartialEq, Eq)]
enum DocumentRoute<'a> {
    Stats,
    Record(&'a str),
    Extraction(&'a str),
    Analysis(&'a str),
    Artifact(&'a str),
}

impl<'a> DocumentRoute<'a> {
    fn parse(path: &'a str) -> Self {
        let path = path.trim_start_matches('/');
        if path == "stats" {
            return DocumentRoute::Stats;
        }
        if let Some(key) = path.strip_suffix("/extraction") {
            return DocumentRoute::Extraction(key);
        }
        if let Some(key) = path.strip_suffix("/analysis") {
            return DocumentRoute::Analysis(key);
        }
        if let Some(key) = path.strip_suffix("/artifact") {
            return DocumentRoute::Artifact(key);
        }
        DocumentRoute::Record(path)
    }
}

async fn get_dispatch(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response> {
    match DocumentRoute::parse(&path) {
        DocumentRoute::Stats => documents::stats(&state),
        DocumentRoute::Record(key) | DocumentRoute::Extraction(key) => {
            documents::get_document(&state, key)
        }
        DocumentRoute::Analysis(key) => analysis::get_results(&state, key),
        DocumentRoute::Artifact(key) => documents::get_artifact(&state, key).await,
    }
}

async fn post_dispatch(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response> {
    match DocumentRoute::parse(&path) {
        DocumentRoute::Extraction(key) => extraction::start(&state, key).await,
        DocumentRoute::Analysis(key) => analysis::start(&state, key),
        _ => Err(Error::NotFound(format!("POST /documents/{}", path))),
    }
}

async fn delete_dispatch(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response> {
    match DocumentRoute::parse(&path) {
        DocumentRoute::Extraction(key) => extraction::stop(&state, key),
        DocumentRoute::Analysis(key) => analysis::stop(&state, key),
        DocumentRoute::Record(key) => documents::delete_document(&state, key).await,
        _ => Err(Error::NotFound(format!("DELETE /documents/{}", path))),
    }
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "paper-pipeline",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "PDF extraction and analysis pipeline with per-document lifecycle",
        "endpoints": {
            "GET /api/documents?status=&offset=&limit=": "List documents",
            "POST /api/documents": "Upload PDFs (multipart, field `file`)",
            "GET /api/documents/stats": "Count per status",
            "GET /api/documents/{key}": "Get one document",
            "DELETE /api/documents/{key}": "Delete a document and its files",
            "POST /api/documents/{key}/extraction": "Start extraction",
            "DELETE /api/documents/{key}/extraction": "Stop extraction",
            "POST /api/documents/{key}/analysis": "Start analysis",
            "DELETE /api/documents/{key}/analysis": "Stop analysis",
            "GET /api/documents/{key}/analysis": "Analysis results",
            "GET /api/documents/{key}/artifact": "Extracted markdown",
            "POST /api/batch/extraction": "Extract every uploaded document",
            "POST /api/batch/analysis": "Analyze every extracted document"
        }
    }))
}
