//! Document record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Lifecycle status of a document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Upload in progress (owned by the upload path, never persisted)
    Uploading,
    /// Stored in the blob store, waiting for extraction
    Uploaded,
    /// Extraction job submitted and being polled
    Parsing,
    /// Extraction job finished, bundle being materialized
    Downloading,
    /// Artifact written locally
    Extracted,
    /// Analysis request in flight
    Analyzing,
    /// Analysis results stored
    Done,
    /// Last orchestration failed; see `last_error`
    Error,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 8] = [
        DocumentStatus::Uploading,
        DocumentStatus::Uploaded,
        DocumentStatus::Parsing,
        DocumentStatus::Downloading,
        DocumentStatus::Extracted,
        DocumentStatus::Analyzing,
        DocumentStatus::Done,
        DocumentStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Parsing => "parsing",
            DocumentStatus::Downloading => "downloading",
            DocumentStatus::Extracted => "extracted",
            DocumentStatus::Analyzing => "analyzing",
            DocumentStatus::Done => "done",
            DocumentStatus::Error => "error",
        }
    }

    /// Statuses in which an orchestration owns the record
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Parsing | DocumentStatus::Downloading | DocumentStatus::Analyzing
        )
    }

    /// Statuses that carry a materialized artifact
    pub fn has_artifact(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Extracted | DocumentStatus::Analyzing | DocumentStatus::Done
        )
    }

    /// Parse a comma-separated status filter such as `"parsing,downloading"`
    pub fn parse_list(value: &str) -> Result<Vec<DocumentStatus>> {
        let mut statuses = Vec::new();
        for part in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let status = part.parse::<DocumentStatus>()?;
            if !statuses.contains(&status) {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DocumentStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::validation(format!("Unknown document status: {}", s)))
    }
}

/// Persisted state for one uploaded file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    /// Storage key, unique and never reused
    pub doc_key: String,
    /// Location in blob storage
    pub source_url: String,
    /// Original filename
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Most recent extraction job (current while parsing/downloading, history afterwards)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_job_id: Option<String>,
    pub status: DocumentStatus,
    /// Artifact path relative to the working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    /// Section name to answer text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_results: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Create the record written after a successful upload
    pub fn uploaded(
        doc_key: impl Into<String>,
        source_url: impl Into<String>,
        display_name: impl Into<String>,
        size_bytes: Option<u64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            doc_key: doc_key.into(),
            source_url: source_url.into(),
            display_name: display_name.into(),
            size_bytes,
            extraction_job_id: None,
            status: DocumentStatus::Uploaded,
            artifact_path: None,
            analysis_results: None,
            last_error: None,
            uploaded_at: now,
            extracted_at: None,
            analyzed_at: None,
            updated_at: now,
        }
    }

    /// Check the field-presence rules for the current status
    pub fn check_invariants(&self) -> Result<()> {
        let artifact_ok = match self.status {
            s if s.has_artifact() => self.artifact_path.is_some(),
            // a failed analysis keeps its artifact so it can be retried
            DocumentStatus::Error => true,
            _ => self.artifact_path.is_none(),
        };
        if !artifact_ok {
            return Err(Error::internal(format!(
                "[{}] artifact_path {} in status {}",
                self.doc_key,
                if self.artifact_path.is_some() { "set" } else { "missing" },
                self.status
            )));
        }

        let results_ok = (self.status == DocumentStatus::Done) == self.analysis_results.is_some();
        if !results_ok {
            return Err(Error::internal(format!(
                "[{}] analysis_results inconsistent with status {}",
                self.doc_key, self.status
            )));
        }

        if self.status != DocumentStatus::Error && self.last_error.is_some() {
            return Err(Error::internal(format!(
                "[{}] last_error set in status {}",
                self.doc_key, self.status
            )));
        }

        Ok(())
    }
}

/// Count of documents per status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusStats {
    pub total: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub parsing: usize,
    pub downloading: usize,
    pub extracted: usize,
    pub analyzing: usize,
    pub done: usize,
    pub error: usize,
}

impl StatusStats {
    pub fn add(&mut self, status: DocumentStatus, count: usize) {
        let slot = match status {
            DocumentStatus::Uploading => &mut self.uploading,
            DocumentStatus::Uploaded => &mut self.uploaded,
            DocumentStatus::Parsing => &mut self.parsing,
            DocumentStatus::Downloading => &mut self.downloading,
            DocumentStatus::Extracted => &mut self.extracted,
            DocumentStatus::Analyzing => &mut self.analyzing,
            DocumentStatus::Done => &mut self.done,
            DocumentStatus::Error => &mut self.error,
        };
        *slot += count;
        self.total += count;
    }
}

/// One page of a filtered listing
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPage {
    pub items: Vec<DocumentRecord>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in DocumentStatus::ALL {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("finished".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_parse_list_dedupes_and_trims() {
        let statuses = DocumentStatus::parse_list("parsing, downloading,parsing,").unwrap();
        assert_eq!(statuses, vec![DocumentStatus::Parsing, DocumentStatus::Downloading]);
        assert!(DocumentStatus::parse_list("parsing,bogus").is_err());
        assert!(DocumentStatus::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_uploaded_record_is_consistent() {
        let record = DocumentRecord::uploaded("papers/a.pdf", "http://blob/a.pdf", "a.pdf", Some(10));
        assert_eq!(record.status, DocumentStatus::Uploaded);
        assert!(record.check_invariants().is_ok());

        let mut broken = record.clone();
        broken.artifact_path = Some("x/full.md".to_string());
        assert!(broken.check_invariants().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&DocumentStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }
}
