//! Batch starts over every eligible document
//!
//! Starts are paced by a fixed delay and bounded by a semaphore; each started
//! run carries its permit until it finishes. One document failing to start is
//! recorded and the batch moves on.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::processing::analysis::AnalysisOrchestrator;
use crate::processing::extraction::ExtractionOrchestrator;
use crate::storage::DocumentStore;
use crate::types::DocumentStatus;

/// Which orchestration a batch starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTarget {
    Extraction,
    Analysis,
}

impl BatchTarget {
    /// Status a document must be in to be picked up
    pub fn source_status(&self) -> DocumentStatus {
        match self {
            BatchTarget::Extraction => DocumentStatus::Uploaded,
            BatchTarget::Analysis => DocumentStatus::Extracted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchTarget::Extraction => "extraction",
            BatchTarget::Analysis => "analysis",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub doc_key: String,
    pub error: String,
}

/// What a batch did
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub target: BatchTarget,
    pub eligible: usize,
    pub started: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Clone)]
pub struct BatchCoordinator {
    store: DocumentStore,
    extraction: ExtractionOrchestrator,
    analysis: AnalysisOrchestrator,
    permits: Arc<Semaphore>,
    start_delay: Duration,
}

impl BatchCoordinator {
    pub fn new(
        store: DocumentStore,
        extraction: ExtractionOrchestrator,
        analysis: AnalysisOrchestrator,
        max_concurrent: usize,
        start_delay: Duration,
    ) -> Self {
        Self {
            store,
            extraction,
            analysis,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            start_delay,
        }
    }

    /// Documents a batch for `target` would pick up right now
    pub fn eligible(&self, target: BatchTarget) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_by_status(target.source_status())?
            .into_iter()
            .map(|record| record.doc_key)
            .collect())
    }

    /// Start `target` for every eligible document, oldest upload first
    pub async fn start_all_eligible(&self, target: BatchTarget) -> Result<BatchReport> {
        let keys = self.eligible(target)?;
        self.run(target, keys).await
    }

    /// Kick off a batch in the background; returns the number of eligible documents
    pub fn spawn(&self, target: BatchTarget) -> Result<usize> {
        let keys = self.eligible(target)?;
        let eligible = keys.len();

        let this = self.clone();
        tokio::spawn(async move {
            match this.run(target, keys).await {
                Ok(report) => tracing::info!(
                    "Batch {} finished: {} started, {} failed",
                    target.as_str(),
                    report.started.len(),
                    report.failed.len()
                ),
                Err(e) => tracing::error!("Batch {} aborted: {}", target.as_str(), e),
            }
        });

        Ok(eligible)
    }

    async fn run(&self, target: BatchTarget, keys: Vec<String>) -> Result<BatchReport> {
        tracing::info!("Batch {}: {} eligible documents", target.as_str(), keys.len());

        let mut report = BatchReport {
            target,
            eligible: keys.len(),
            started: Vec::new(),
            failed: Vec::new(),
        };

        for (i, doc_key) in keys.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.start_delay).await;
            }

            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::internal(format!("Batch semaphore closed: {}", e)))?;

            let started = match target {
                BatchTarget::Extraction => self
                    .extraction
                    .start_with_permit(&doc_key, permit)
                    .await
                    .map(|_| ()),
                BatchTarget::Analysis => self.analysis.start_with_permit(&doc_key, permit),
            };

            match started {
                Ok(()) => report.started.push(doc_key),
                Err(e) => {
                    tracing::warn!("[{}] Batch {} start failed: {}", doc_key, target.as_str(), e);
                    report.failed.push(BatchFailure {
                        doc_key,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::testing::{Harness, JobScript};

    #[tokio::test(start_paused = true)]
    async fn test_extraction_batch_skips_failures_and_paces_starts() {
        let h = Harness::with_config(|c| c.processing.max_concurrent_jobs = Some(8)).await;

        let mut uploaded = Vec::new();
        for i in 0..5 {
            uploaded.push(h.upload(&format!("paper-{}.pdf", i)).await);
        }
        let done_a = h.extracted("done-a.pdf").await;
        let done_b = h.extracted("done-b.pdf").await;
        let already = h.extraction.submits();

        // oldest first: the third upload is the third start
        h.extraction.fail_submit_for(&h.record(&uploaded[2]).source_url);

        let report = h
            .pipeline
            .start_all_eligible(BatchTarget::Extraction)
            .await
            .unwrap();
        assert_eq!(report.eligible, 5);
        assert_eq!(report.started.len(), 4);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].doc_key, uploaded[2]);

        let times = h.extraction.submit_times();
        let batch_times = &times[already..];
        assert_eq!(batch_times.len(), 5);
        for pair in batch_times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }

        h.pipeline.wait_idle().await;
        for (i, key) in uploaded.iter().enumerate() {
            let expected = if i == 2 {
                DocumentStatus::Error
            } else {
                DocumentStatus::Extracted
            };
            assert_eq!(h.status(key), expected);
        }
        assert_eq!(h.status(&done_a), DocumentStatus::Extracted);
        assert_eq!(h.status(&done_b), DocumentStatus::Extracted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_respects_concurrency_limit() {
        let h = Harness::with_config(|c| c.processing.max_concurrent_jobs = Some(2)).await;
        h.extraction.set_script(JobScript::SucceedAfter(3));
        for i in 0..4 {
            h.upload(&format!("paper-{}.pdf", i)).await;
        }

        let coordinator = h.pipeline.batch().clone();
        let batch = tokio::spawn(async move {
            coordinator.start_all_eligible(BatchTarget::Extraction).await
        });

        // two runs hold both permits for 30s of polling
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.extraction.submits(), 2);
        assert_eq!(h.pipeline.registry().len(), 2);

        let report = batch.await.unwrap().unwrap();
        assert_eq!(report.started.len(), 4);
        h.pipeline.wait_idle().await;
        assert_eq!(h.pipeline.stats().unwrap().extracted, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_batch_picks_extracted_only() {
        let h = Harness::new().await;
        let a = h.extracted("a.pdf").await;
        let b = h.extracted("b.pdf").await;
        let pending = h.upload("c.pdf").await;

        let report = h
            .pipeline
            .start_all_eligible(BatchTarget::Analysis)
            .await
            .unwrap();
        assert_eq!(report.eligible, 2);
        h.pipeline.wait_idle().await;

        assert_eq!(h.status(&a), DocumentStatus::Done);
        assert_eq!(h.status(&b), DocumentStatus::Done);
        assert_eq!(h.status(&pending), DocumentStatus::Uploaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch() {
        let h = Harness::new().await;
        let report = h
            .pipeline
            .start_all_eligible(BatchTarget::Analysis)
            .await
            .unwrap();
        assert_eq!(report.eligible, 0);
        assert!(report.started.is_empty());
        assert_eq!(h.pipeline.spawn_batch(BatchTarget::Extraction).unwrap(), 0);
    }
}
