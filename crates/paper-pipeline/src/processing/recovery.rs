//! Startup reconciliation of records left in flight by a previous process
//!
//! The registry is empty after a restart, so any `parsing`, `downloading` or
//! `analyzing` record has no owner. Extraction jobs with a known remote id are
//! re-attached when configured; everything else steps back to its resting
//! status through the `Stop` transition.

use serde::Serialize;

use crate::error::Result;
use crate::processing::extraction::ExtractionOrchestrator;
use crate::processing::lifecycle::Transition;
use crate::processing::registry::TaskRegistry;
use crate::storage::DocumentStore;
use crate::types::DocumentStatus;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Extraction runs re-attached to their remote job
    pub resumed: Vec<String>,
    /// Records moved back to `uploaded` or `extracted`
    pub reverted: Vec<String>,
    pub failed: Vec<String>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.resumed.is_empty() && self.reverted.is_empty() && self.failed.is_empty()
    }
}

pub fn recover_interrupted(
    store: &DocumentStore,
    registry: &TaskRegistry,
    extraction: &ExtractionOrchestrator,
    resume: bool,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for status in [
        DocumentStatus::Parsing,
        DocumentStatus::Downloading,
        DocumentStatus::Analyzing,
    ] {
        for record in store.list_by_status(status)? {
            let doc_key = record.doc_key;
            if registry.is_active(&doc_key) {
                continue;
            }

            let resumable = resume
                && status != DocumentStatus::Analyzing
                && record.extraction_job_id.is_some();

            let outcome = if resumable {
                extraction.resume(&doc_key).map(|_| true)
            } else {
                store.transition(&doc_key, Transition::Stop).map(|_| false)
            };

            match outcome {
                Ok(true) => report.resumed.push(doc_key),
                Ok(false) => {
                    tracing::info!("[{}] Reverted interrupted {} record", doc_key, status);
                    report.reverted.push(doc_key);
                }
                Err(e) => {
                    tracing::warn!("[{}] Recovery failed: {}", doc_key, e);
                    report.failed.push(doc_key);
                }
            }
        }
    }

    if !report.is_empty() {
        tracing::info!(
            "Recovery: {} resumed, {} reverted, {} failed",
            report.resumed.len(),
            report.reverted.len(),
            report.failed.len()
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use crate::processing::lifecycle::Transition;
    use crate::processing::testing::Harness;
    use crate::storage::DocumentStore;
    use crate::types::{DocumentRecord, DocumentStatus};

    fn seed(store: &DocumentStore, key: &str, steps: Vec<Transition>) {
        let url = format!("http://blobs.test/blobs/{}", key);
        store
            .insert(&DocumentRecord::uploaded(key, url, "p.pdf", Some(10)))
            .unwrap();
        for step in steps {
            store.transition(key, step).unwrap();
        }
    }

    fn job(id: &str) -> Transition {
        Transition::RecordJob {
            job_id: id.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resumes_and_reverts() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::in_memory().unwrap();

        seed(&store, "papers/a.pdf", vec![Transition::StartExtraction, job("job-a")]);
        seed(&store, "papers/b.pdf", vec![Transition::StartExtraction]);
        seed(
            &store,
            "papers/c.pdf",
            vec![
                Transition::StartExtraction,
                job("job-c"),
                Transition::ExtractionSucceeded,
                Transition::Materialized {
                    artifact_path: "job-c/full.md".to_string(),
                },
                Transition::StartAnalysis,
            ],
        );

        let h = Harness::with_store(dir, store, |_| {});
        let report = h.pipeline.recover_interrupted().unwrap();
        assert_eq!(report.resumed, vec!["papers/a.pdf".to_string()]);
        assert_eq!(report.reverted.len(), 2);
        assert!(report.failed.is_empty());

        assert_eq!(h.status("papers/b.pdf"), DocumentStatus::Uploaded);
        assert_eq!(h.status("papers/c.pdf"), DocumentStatus::Extracted);

        h.pipeline.wait_idle().await;
        let a = h.record("papers/a.pdf");
        assert_eq!(a.status, DocumentStatus::Extracted);
        assert_eq!(a.artifact_path.as_deref(), Some("job-a/full.md"));
        assert_eq!(h.extraction.submits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_resumes_interrupted_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::in_memory().unwrap();
        seed(
            &store,
            "papers/d.pdf",
            vec![
                Transition::StartExtraction,
                job("job-d"),
                Transition::ExtractionSucceeded,
            ],
        );

        let h = Harness::with_store(dir, store, |_| {});
        let report = h.pipeline.recover_interrupted().unwrap();
        assert_eq!(report.resumed, vec!["papers/d.pdf".to_string()]);
        assert_eq!(h.status("papers/d.pdf"), DocumentStatus::Downloading);

        h.pipeline.wait_idle().await;
        let d = h.record("papers/d.pdf");
        assert_eq!(d.status, DocumentStatus::Extracted);
        assert_eq!(d.artifact_path.as_deref(), Some("job-d/full.md"));
        assert_eq!(h.fetcher.fetches(), 1);
        assert_eq!(h.extraction.submits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_without_resume_reverts_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::in_memory().unwrap();
        seed(&store, "papers/a.pdf", vec![Transition::StartExtraction, job("job-a")]);

        let h = Harness::with_store(dir, store, |c| c.processing.resume_on_startup = false);
        let report = h.pipeline.recover_interrupted().unwrap();
        assert!(report.resumed.is_empty());
        assert_eq!(report.reverted, vec!["papers/a.pdf".to_string()]);
        assert_eq!(h.status("papers/a.pdf"), DocumentStatus::Uploaded);
        assert!(h.pipeline.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_is_noop_on_resting_records() {
        let h = Harness::new().await;
        h.upload("a.pdf").await;
        let report = h.pipeline.recover_interrupted().unwrap();
        assert!(report.is_empty());
    }
}
