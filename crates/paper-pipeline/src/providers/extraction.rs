//! Extraction job client trait (remote OCR / structure extraction)

use async_trait::async_trait;
use serde::Serialize;

use crate::config::MineruConfig;
use crate::error::Result;

/// Per-submission options
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub model_version: String,
    pub enable_formula: bool,
    pub enable_table: bool,
    pub language: String,
    pub is_ocr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
}

impl ExtractionOptions {
    pub fn from_config(config: &MineruConfig) -> Self {
        Self {
            model_version: config.model_version.clone(),
            enable_formula: config.enable_formula,
            enable_table: config.enable_table,
            language: config.language.clone(),
            is_ocr: config.is_ocr,
            data_id: None,
            page_ranges: config.page_ranges.clone(),
        }
    }
}

/// Remote job state as reported by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionJobState {
    Pending {
        /// e.g. `"12/30 pages"` when the service reports it
        progress: Option<String>,
    },
    Done {
        bundle_url: String,
    },
    Failed {
        reason: String,
    },
}

/// Trait for the remote extraction service
///
/// Implementations:
/// - `MineruClient`: MinerU v4 precise-extraction API
#[async_trait]
pub trait ExtractionJobClient: Send + Sync {
    /// Submit one document, returning the job id
    async fn submit(&self, source_url: &str, options: &ExtractionOptions) -> Result<String>;

    /// Query one job
    async fn status(&self, job_id: &str) -> Result<ExtractionJobState>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
