//! Document lifecycle state machine
//!
//! The single authority on which status changes are legal. Every mutation of a
//! [`DocumentRecord`] goes through [`apply`], which validates the edge, updates the
//! status-dependent fields and leaves the input untouched when the edge is illegal.
//!
//! ```text
//! uploaded -> parsing -> downloading -> extracted -> analyzing -> done
//!     \          \            \             \            \
//!      +----------+------------+-------------+------------+--> error
//! error -> parsing | analyzing          (manual retry)
//! parsing | downloading -> uploaded     (stop)
//! analyzing -> extracted                (stop)
//! ```

use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::types::{DocumentRecord, DocumentStatus};

/// A requested status change
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `uploaded | error -> parsing`
    StartExtraction,
    /// Record the submitted extraction job (`parsing -> parsing`)
    RecordJob { job_id: String },
    /// Extraction job reported success (`parsing -> downloading`)
    ExtractionSucceeded,
    /// Artifact written locally (`downloading -> extracted`)
    Materialized { artifact_path: String },
    /// `extracted | error -> analyzing`
    StartAnalysis,
    /// `analyzing -> done`
    AnalysisSucceeded { results: BTreeMap<String, String> },
    /// Any non-terminal state to `error`
    Fail { reason: String },
    /// User stop: back to the state the run started from
    Stop,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::StartExtraction => "start_extraction",
            Transition::RecordJob { .. } => "record_job",
            Transition::ExtractionSucceeded => "extraction_succeeded",
            Transition::Materialized { .. } => "materialized",
            Transition::StartAnalysis => "start_analysis",
            Transition::AnalysisSucceeded { .. } => "analysis_succeeded",
            Transition::Fail { .. } => "fail",
            Transition::Stop => "stop",
        }
    }

    /// Status reached when applying this transition from `record`, if legal
    pub fn target(&self, record: &DocumentRecord) -> Option<DocumentStatus> {
        use DocumentStatus::*;

        match (self, record.status) {
            (Transition::StartExtraction, Uploaded | Error) => Some(Parsing),
            (Transition::RecordJob { .. }, Parsing) => Some(Parsing),
            (Transition::ExtractionSucceeded, Parsing) => Some(Downloading),
            (Transition::Materialized { .. }, Downloading) => Some(Extracted),
            (Transition::StartAnalysis, Extracted) => Some(Analyzing),
            (Transition::StartAnalysis, Error) if record.artifact_path.is_some() => {
                Some(Analyzing)
            }
            (Transition::AnalysisSucceeded { .. }, Analyzing) => Some(Done),
            (
                Transition::Fail { .. },
                Uploaded | Parsing | Downloading | Extracted | Analyzing,
            ) => Some(Error),
            (Transition::Stop, Parsing | Downloading) => Some(Uploaded),
            (Transition::Stop, Analyzing) => Some(Extracted),
            _ => None,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check whether `transition` is legal for `record`
pub fn check(record: &DocumentRecord, transition: &Transition) -> Result<DocumentStatus> {
    transition.target(record).ok_or_else(|| {
        Error::validation(format!(
            "[{}] illegal transition {} from status {}",
            record.doc_key, transition, record.status
        ))
    })
}

/// Apply `transition` to a copy of `record`
pub fn apply(record: &DocumentRecord, transition: Transition) -> Result<DocumentRecord> {
    let target = check(record, &transition)?;
    let now = Utc::now();
    let mut next = record.clone();

    match transition {
        Transition::StartExtraction => {
            next.extraction_job_id = None;
            next.artifact_path = None;
            next.analysis_results = None;
            next.extracted_at = None;
            next.analyzed_at = None;
        }
        Transition::RecordJob { job_id } => {
            next.extraction_job_id = Some(job_id);
        }
        Transition::ExtractionSucceeded => {}
        Transition::Materialized { artifact_path } => {
            next.artifact_path = Some(artifact_path);
            next.extracted_at = Some(now);
        }
        Transition::StartAnalysis => {
            next.analysis_results = None;
            next.analyzed_at = None;
        }
        Transition::AnalysisSucceeded { results } => {
            next.analysis_results = Some(results);
            next.analyzed_at = Some(now);
        }
        Transition::Fail { reason } => {
            next.last_error = Some(reason);
        }
        Transition::Stop => {
            if target == DocumentStatus::Uploaded {
                next.artifact_path = None;
            }
        }
    }

    if target != DocumentStatus::Error {
        next.last_error = None;
    }
    next.status = target;
    next.updated_at = now;

    next.check_invariants()?;
    Ok(next)
}
