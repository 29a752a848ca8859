//! Pipeline facade
//!
//! Owns the record store, the task registry and both orchestrators, and is the
//! only entry point the HTTP layer and the binary talk to.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::processing::analysis::AnalysisOrchestrator;
use crate::processing::batch::{BatchCoordinator, BatchReport, BatchTarget};
use crate::processing::extraction::ExtractionOrchestrator;
use crate::processing::lifecycle::Transition;
use crate::processing::materialize::Materializer;
use crate::processing::poller::JobPoller;
use crate::processing::recovery::{self, RecoveryReport};
use crate::processing::registry::{TaskKind, TaskRegistry};
use crate::providers::{
    AnalysisClient, BlobStore, BundleFetcher, DeepSeekClient, ExtractionJobClient,
    ExtractionOptions, HttpFetcher, LocalBlobStore, MineruClient,
};
use crate::storage::DocumentStore;
use crate::types::{DocumentPage, DocumentRecord, DocumentStatus, StatusStats};

/// External services the pipeline drives
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub extraction: Arc<dyn ExtractionJobClient>,
    pub analysis: Arc<dyn AnalysisClient>,
    pub fetcher: Arc<dyn BundleFetcher>,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: DocumentStore,
    registry: TaskRegistry,
    blobs: Arc<dyn BlobStore>,
    materializer: Materializer,
    extraction: ExtractionOrchestrator,
    analysis: AnalysisOrchestrator,
    batch: BatchCoordinator,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: DocumentStore, collaborators: Collaborators) -> Self {
        let registry = TaskRegistry::new();
        let materializer = Materializer::new(
            config.storage.working_dir.clone(),
            config.processing.artifact_name.clone(),
            collaborators.fetcher,
        );

        let extraction = ExtractionOrchestrator::new(
            store.clone(),
            registry.clone(),
            collaborators.extraction,
            collaborators.blobs.clone(),
            materializer.clone(),
            JobPoller::from_config(&config.processing),
            ExtractionOptions::from_config(&config.mineru),
            config.processing.delete_source_after_extraction,
        );
        let analysis = AnalysisOrchestrator::new(
            store.clone(),
            registry.clone(),
            collaborators.analysis,
            materializer.clone(),
        );
        let batch = BatchCoordinator::new(
            store.clone(),
            extraction.clone(),
            analysis.clone(),
            config.processing.max_concurrent_jobs(),
            config.processing.batch_start_delay(),
        );

        Self {
            config: Arc::new(config),
            store,
            registry,
            blobs: collaborators.blobs,
            materializer,
            extraction,
            analysis,
            batch,
        }
    }

    /// Wire the real collaborators from configuration
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.storage.working_dir)?;
        let store = DocumentStore::new(config.storage.database_path())?;

        let blobs = LocalBlobStore::new(
            config.storage.blob_dir(),
            config.server.public_base_url.clone(),
        )?;
        let extraction = MineruClient::new(&config.mineru)?;
        let analysis = DeepSeekClient::new(&config.analysis)?;
        let fetcher = HttpFetcher::new(Duration::from_secs(config.mineru.download_timeout_secs))?;

        tracing::info!(
            "Pipeline ready (working dir {}, {} analysis questions)",
            config.storage.working_dir.display(),
            config.analysis.questions.len()
        );

        Ok(Self::new(
            config,
            store,
            Collaborators {
                blobs: Arc::new(blobs),
                extraction: Arc::new(extraction),
                analysis: Arc::new(analysis),
                fetcher: Arc::new(fetcher),
            },
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn batch(&self) -> &BatchCoordinator {
        &self.batch
    }

    /// Store one PDF and create its `uploaded` record
    pub async fn upload_document(&self, filename: &str, data: Bytes) -> Result<DocumentRecord> {
        let is_pdf = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);
        if !is_pdf {
            return Err(Error::validation(format!("{}: only PDF files are accepted", filename)));
        }
        if data.is_empty() {
            return Err(Error::validation(format!("{}: file is empty", filename)));
        }
        if data.len() > self.config.server.max_upload_size {
            return Err(Error::validation(format!(
                "{}: {} bytes exceeds the {} byte limit",
                filename,
                data.len(),
                self.config.server.max_upload_size
            )));
        }

        let size = data.len() as u64;
        let blob = self.blobs.put(filename, data).await?;
        let record = DocumentRecord::uploaded(blob.key.clone(), blob.url, filename, Some(size));

        if let Err(e) = self.store.insert(&record) {
            if let Err(cleanup) = self.blobs.delete(&blob.key).await {
                tracing::warn!("[{}] Failed to remove orphaned blob: {}", blob.key, cleanup);
            }
            return Err(e);
        }

        tracing::info!("[{}] Uploaded {} ({} bytes)", record.doc_key, filename, size);
        Ok(record)
    }

    pub fn get_document(&self, doc_key: &str) -> Result<DocumentRecord> {
        self.store.require(doc_key)
    }

    pub fn list_documents(
        &self,
        statuses: &[DocumentStatus],
        offset: usize,
        limit: usize,
    ) -> Result<DocumentPage> {
        self.store.list(statuses, offset, limit)
    }

    pub fn stats(&self) -> Result<StatusStats> {
        self.store.stats()
    }

    /// Start extraction; returns the remote job id
    pub async fn start_extraction(&self, doc_key: &str) -> Result<String> {
        self.extraction.start(doc_key).await
    }

    /// Request a stop of extraction; `false` if the document was not extracting
    pub fn stop_extraction(&self, doc_key: &str) -> Result<bool> {
        self.stop(
            doc_key,
            TaskKind::Extraction,
            &[DocumentStatus::Parsing, DocumentStatus::Downloading],
        )
    }

    pub fn start_analysis(&self, doc_key: &str) -> Result<()> {
        self.analysis.start(doc_key)
    }

    /// Request a stop of analysis; `false` if the document was not analyzing
    pub fn stop_analysis(&self, doc_key: &str) -> Result<bool> {
        self.stop(doc_key, TaskKind::Analysis, &[DocumentStatus::Analyzing])
    }

    fn stop(&self, doc_key: &str, kind: TaskKind, stoppable: &[DocumentStatus]) -> Result<bool> {
        if self.registry.active_kind(doc_key) == Some(kind) {
            // the run applies the stop edge itself once it observes the token
            return Ok(self.registry.cancel(doc_key));
        }

        // no run owns the record, e.g. left behind by a crashed process;
        // hold the key so no run can start or finish underneath the stop edge
        let _handle = match self.registry.try_acquire(doc_key, kind) {
            Ok(handle) => handle,
            Err(Error::Conflict(_)) => {
                self.store.require(doc_key)?;
                return Ok(self.registry.active_kind(doc_key) == Some(kind)
                    && self.registry.cancel(doc_key));
            }
            Err(e) => return Err(e),
        };

        let record = self.store.require(doc_key)?;
        if !stoppable.contains(&record.status) {
            tracing::debug!("[{}] Nothing to stop in status {}", doc_key, record.status);
            return Ok(false);
        }

        tracing::info!("[{}] Stopping orphaned {} record", doc_key, record.status);
        self.store.transition(doc_key, Transition::Stop)?;
        Ok(true)
    }

    /// Text of the extracted artifact
    pub async fn artifact(&self, doc_key: &str) -> Result<String> {
        let record = self.store.require(doc_key)?;
        let path = record
            .artifact_path
            .ok_or_else(|| Error::NotFound(format!("artifact for {}", doc_key)))?;
        self.materializer.read_artifact(&path).await
    }

    /// Analysis results of a `done` document
    pub fn analysis(&self, doc_key: &str) -> Result<BTreeMap<String, String>> {
        let record = self.store.require(doc_key)?;
        match (record.status, record.analysis_results) {
            (DocumentStatus::Done, Some(results)) => Ok(results),
            (status, _) => Err(Error::NotFound(format!(
                "analysis for {} (status {})",
                doc_key, status
            ))),
        }
    }

    /// Delete the record, its source blob and its local artifacts
    pub async fn delete_document(&self, doc_key: &str) -> Result<()> {
        let _handle = self.registry.try_acquire(doc_key, TaskKind::Deletion)?;
        let record = self.store.require(doc_key)?;

        // the record goes last so a failed cleanup can be retried
        self.blobs.delete(doc_key).await?;
        if let Some(job_id) = &record.extraction_job_id {
            self.materializer.remove_job(job_id).await?;
        }

        self.store.delete(doc_key)?;
        tracing::info!("[{}] Deleted", doc_key);
        Ok(())
    }

    /// Start `target` for every eligible document and wait for all starts
    pub async fn start_all_eligible(&self, target: BatchTarget) -> Result<BatchReport> {
        self.batch.start_all_eligible(target).await
    }

    /// Start `target` for every eligible document in the background
    pub fn spawn_batch(&self, target: BatchTarget) -> Result<usize> {
        self.batch.spawn(target)
    }

    /// Reconcile records left in flight by a previous process
    pub fn recover_interrupted(&self) -> Result<RecoveryReport> {
        recovery::recover_interrupted(
            &self.store,
            &self.registry,
            &self.extraction,
            self.config.processing.resume_on_startup,
        )
    }

    /// Wait for every active run to finish
    pub async fn wait_idle(&self) {
        self.registry.wait_idle().await
    }
}
