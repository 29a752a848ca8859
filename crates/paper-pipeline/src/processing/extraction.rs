//! Extraction orchestration
//!
//! One run per document: submit -> poll -> materialize. Everything after the
//! `uploaded -> parsing` edge runs in a spawned task that owns the
//! [`TaskHandle`]; the caller only waits for the job id, so dropping the caller
//! never strands a record in `parsing`.

use std::sync::Arc;
use tokio::sync::{oneshot, OwnedSemaphorePermit};

use crate::error::{Error, Result};
use crate::processing::lifecycle::{self, Transition};
use crate::processing::materialize::Materializer;
use crate::processing::poller::{JobPoller, PollOutcome, PollStatus};
use crate::processing::registry::{TaskHandle, TaskKind, TaskRegistry};
use crate::providers::{BlobStore, ExtractionJobClient, ExtractionJobState, ExtractionOptions};
use crate::storage::DocumentStore;
use crate::types::DocumentStatus;

/// Drives documents from `uploaded` to `extracted`
#[derive(Clone)]
pub struct ExtractionOrchestrator {
    store: DocumentStore,
    registry: TaskRegistry,
    client: Arc<dyn ExtractionJobClient>,
    blobs: Arc<dyn BlobStore>,
    materializer: Materializer,
    poller: JobPoller,
    options: ExtractionOptions,
    delete_source: bool,
}

impl ExtractionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: DocumentStore,
        registry: TaskRegistry,
        client: Arc<dyn ExtractionJobClient>,
        blobs: Arc<dyn BlobStore>,
        materializer: Materializer,
        poller: JobPoller,
        options: ExtractionOptions,
        delete_source: bool,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            blobs,
            materializer,
            poller,
            options,
            delete_source,
        }
    }

    /// Start extraction for one document, returning the remote job id
    pub async fn start(&self, doc_key: &str) -> Result<String> {
        self.start_inner(doc_key, None).await
    }

    /// Start extraction holding a batch concurrency permit for the whole run
    pub async fn start_with_permit(
        &self,
        doc_key: &str,
        permit: OwnedSemaphorePermit,
    ) -> Result<String> {
        self.start_inner(doc_key, Some(permit)).await
    }

    async fn start_inner(
        &self,
        doc_key: &str,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<String> {
        let handle = self.registry.try_acquire(doc_key, TaskKind::Extraction)?;

        let record = self.store.require(doc_key)?;
        lifecycle::check(&record, &Transition::StartExtraction)?;

        if let Some(previous) = &record.extraction_job_id {
            // a retry from error resubmits the source, which must still exist
            if !self.blobs.exists(doc_key).await? {
                return Err(Error::validation(format!(
                    "[{}] source PDF is gone; upload it again to re-extract",
                    doc_key
                )));
            }
            self.materializer.remove_job(previous).await?;
        }

        self.store.transition(doc_key, Transition::StartExtraction)?;

        // from here on the spawned task owns the record, even if the caller goes away
        let (submitted_tx, submitted_rx) = oneshot::channel();
        let this = self.clone();
        let source_url = record.source_url;
        tokio::spawn(async move {
            let _permit = permit;
            let job_id = match this.submit(&handle, &source_url).await {
                Ok(job_id) => job_id,
                Err(e) => {
                    this.settle(handle.doc_key(), &e);
                    drop(handle);
                    let _ = submitted_tx.send(Err(e));
                    return;
                }
            };
            let _ = submitted_tx.send(Ok(job_id.clone()));
            this.run(handle, job_id).await;
        });

        submitted_rx.await.map_err(|_| {
            Error::Internal(format!("[{}] extraction task ended before submitting", doc_key))
        })?
    }

    async fn submit(&self, handle: &TaskHandle, source_url: &str) -> Result<String> {
        let doc_key = handle.doc_key();
        tracing::info!("[{}] Submitting extraction job ({})", doc_key, self.client.name());

        let job_id = tokio::select! {
            biased;
            _ = handle.token().cancelled() => return Err(Error::Canceled),
            job_id = self.client.submit(source_url, &self.options) => job_id?,
        };

        self.store.transition(
            doc_key,
            Transition::RecordJob {
                job_id: job_id.clone(),
            },
        )?;
        tracing::info!("[{}] Extraction job submitted: {}", doc_key, job_id);
        Ok(job_id)
    }

    /// Re-attach to a job that was in flight when the process stopped
    pub fn resume(&self, doc_key: &str) -> Result<String> {
        let handle = self.registry.try_acquire(doc_key, TaskKind::Extraction)?;

        let record = self.store.require(doc_key)?;
        if !matches!(
            record.status,
            DocumentStatus::Parsing | DocumentStatus::Downloading
        ) {
            return Err(Error::validation(format!(
                "[{}] cannot resume extraction from status {}",
                doc_key, record.status
            )));
        }
        let job_id = record.extraction_job_id.ok_or_else(|| {
            Error::validation(format!("[{}] no extraction job to resume", doc_key))
        })?;

        tracing::info!("[{}] Resuming extraction job {} ({})", doc_key, job_id, record.status);

        let this = self.clone();
        let job = job_id.clone();
        tokio::spawn(async move {
            this.run(handle, job).await;
        });

        Ok(job_id)
    }

    async fn run(&self, handle: TaskHandle, job_id: String) {
        if let Err(e) = self.drive(&handle, &job_id).await {
            self.settle(handle.doc_key(), &e);
        }
        drop(handle);
    }

    async fn drive(&self, handle: &TaskHandle, job_id: &str) -> Result<()> {
        let doc_key = handle.doc_key();
        let cancel = handle.token();

        let client = self.client.clone();
        let store = self.store.clone();
        let outcome = self
            .poller
            .poll(
                || {
                    let client = client.clone();
                    let job_id = job_id.to_string();
                    async move {
                        Ok(match client.status(&job_id).await? {
                            ExtractionJobState::Pending { .. } => PollStatus::Pending,
                            ExtractionJobState::Done { bundle_url } => PollStatus::Success(bundle_url),
                            ExtractionJobState::Failed { reason } => PollStatus::Failure(reason),
                        })
                    }
                },
                cancel,
                |attempt, status| {
                    tracing::debug!("[{}] poll {} of job {}: {:?}", doc_key, attempt, job_id, status);
                    if matches!(status, PollStatus::Pending) {
                        if let Err(e) = store.record_poll(doc_key) {
                            tracing::warn!("[{}] Failed to persist poll tick: {}", doc_key, e);
                        }
                    }
                },
            )
            .await?;

        let bundle_url = match outcome {
            PollOutcome::Succeeded(url) => url,
            PollOutcome::Failed(reason) => return Err(Error::Collaborator(reason)),
            PollOutcome::TimedOut { attempts } => {
                return Err(Error::Timeout {
                    job_id: job_id.to_string(),
                    attempts,
                })
            }
            PollOutcome::Canceled => return Err(Error::Canceled),
        };

        if self.store.require(doc_key)?.status == DocumentStatus::Parsing {
            self.store.transition(doc_key, Transition::ExtractionSucceeded)?;
        }

        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let artifact_path = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled),
            path = self.materializer.materialize(doc_key, job_id, &bundle_url) => path?,
        };

        self.store
            .transition(doc_key, Transition::Materialized { artifact_path })?;
        tracing::info!("[{}] Extraction complete", doc_key);

        if self.delete_source {
            if let Err(e) = self.blobs.delete(doc_key).await {
                tracing::warn!("[{}] Failed to delete source blob: {}", doc_key, e);
            }
        }

        Ok(())
    }

    /// Apply the edge for a run that ended early: stop or fail
    fn settle(&self, doc_key: &str, error: &Error) {
        let transition = if error.is_canceled() {
            tracing::info!("[{}] Extraction stopped", doc_key);
            Transition::Stop
        } else {
            tracing::error!("[{}] Extraction failed: {}", doc_key, error);
            Transition::Fail {
                reason: error.reason(),
            }
        };
        if let Err(e) = self.store.transition(doc_key, transition) {
            tracing::error!("[{}] Failed to record end of extraction: {}", doc_key, e);
        }
    }
}
