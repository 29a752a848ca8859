//! Core types for the document pipeline

pub mod document;

pub use document::{DocumentPage, DocumentRecord, DocumentStatus, StatusStats};
