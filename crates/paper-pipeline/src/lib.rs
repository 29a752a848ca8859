//! paper-pipeline: per-document lifecycle orchestration for PDF extraction and analysis
//!
//! Uploaded PDFs move through remote structure extraction (MinerU), local
//! materialization of the extracted markdown and LLM analysis (DeepSeek). Each
//! document's status is persisted in SQLite and only changes along the edges of
//! the lifecycle state machine; at most one orchestration runs per document.

pub mod config;
pub mod error;
pub mod processing;
pub mod providers;
pub mod server;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use processing::{BatchTarget, Pipeline};
pub use types::{DocumentRecord, DocumentStatus};
